use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseDurationError {
    #[error("empty duration value")]
    Empty,
    #[error("invalid duration {value:?}: {source}")]
    Invalid { value: String, source: humantime::DurationError },
}

/// Parses a config value that is either a bare integer (milliseconds) or a
/// humantime duration string (`"30s"`, `"2m"`). Bare integers are the
/// common case for this server's millisecond-denominated config keys;
/// humantime strings are accepted so an operator can write `WRITE_DEADLINE_MS=5s`
/// without doing the arithmetic themselves.
pub fn parse_duration_ms(raw: &str) -> Result<Duration, ParseDurationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseDurationError::Empty);
    }

    if let Ok(ms) = trimmed.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    humantime::parse_duration(trimmed).map_err(|source| ParseDurationError::Invalid {
        value: trimmed.to_string(),
        source,
    })
}
