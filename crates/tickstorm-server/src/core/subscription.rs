use std::time::Instant;

use tickstorm_proto::SubscriptionMode;

/// A session's single subscription. At most one per connection; immutable
/// once created — a later `SUBSCRIBE` frame is always rejected, whether it
/// repeats the same mode (`AlreadySubscribed`) or asks for a different one
/// (`ModeSwitchNotAllowed`).
#[derive(Debug, Clone)]
pub struct Subscription {
    pub mode: SubscriptionMode,
    pub symbols: Vec<String>,
    pub created_at: Instant,
}

impl Subscription {
    pub fn new(mode: SubscriptionMode, symbols: Vec<String>) -> Self {
        Self { mode, symbols, created_at: Instant::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_mode_and_symbols() {
        let sub = Subscription::new(SubscriptionMode::Second, vec!["BTC-USD".into()]);
        assert_eq!(sub.mode, SubscriptionMode::Second);
        assert_eq!(sub.symbols, vec!["BTC-USD".to_string()]);
    }
}
