use thiserror::Error;
use tickstorm_proto::{ErrorCode, FrameError, PayloadError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("already authenticated")]
    AlreadyAuthenticated,
    #[error("rate limited")]
    RateLimited,
    #[error("malformed auth payload: {0}")]
    MalformedPayload(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message not valid for current session state")]
    InvalidMessage,
    #[error("invalid heartbeat sequence")]
    InvalidSequence,
    #[error("invalid subscription request")]
    InvalidSubscription,
    #[error("connection already subscribed")]
    AlreadySubscribed,
    #[error("subscription mode cannot be changed after creation")]
    ModeSwitchNotAllowed,
}

/// Top-level error a session task can terminate with. Every variant maps
/// to a `Closing` transition; most also map to a wire `ErrorCode` sent
/// best-effort before the socket closes.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
    #[error("write deadline exceeded")]
    WriteTimeout,
    #[error("auth deadline exceeded")]
    AuthTimeout,
    #[error("shutdown requested")]
    Shutdown,
}

impl SessionError {
    /// The `ErrorCode` to report to the peer before closing, if any.
    /// Transport-level failures (`Io`, most `Frame` variants, shutdown)
    /// have no peer to report to or nothing meaningful to say.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            SessionError::Frame(FrameError::MessageTooLarge(_)) => Some(ErrorCode::InvalidMessage),
            SessionError::Frame(FrameError::ChecksumMismatch) => Some(ErrorCode::InvalidMessage),
            SessionError::Frame(FrameError::UnsupportedVersion(_)) => {
                Some(ErrorCode::InvalidMessage)
            }
            SessionError::Frame(_) => None,
            SessionError::Payload(_) => Some(ErrorCode::InvalidMessage),
            SessionError::Auth(AuthError::InvalidCredentials) => Some(ErrorCode::InvalidAuth),
            SessionError::Auth(AuthError::AlreadyAuthenticated) => Some(ErrorCode::InvalidAuth),
            SessionError::Auth(AuthError::RateLimited) => Some(ErrorCode::RateLimited),
            SessionError::Auth(AuthError::MalformedPayload(_)) => Some(ErrorCode::InvalidMessage),
            SessionError::Protocol(ProtocolError::InvalidMessage) => Some(ErrorCode::InvalidMessage),
            SessionError::Protocol(ProtocolError::InvalidSequence) => Some(ErrorCode::InvalidSequence),
            SessionError::Protocol(ProtocolError::InvalidSubscription) => {
                Some(ErrorCode::InvalidSubscription)
            }
            SessionError::Protocol(ProtocolError::AlreadySubscribed) => {
                Some(ErrorCode::AlreadySubscribed)
            }
            SessionError::Protocol(ProtocolError::ModeSwitchNotAllowed) => {
                Some(ErrorCode::ModeSwitchNotAllowed)
            }
            SessionError::HeartbeatTimeout => Some(ErrorCode::HeartbeatTimeout),
            SessionError::WriteTimeout => Some(ErrorCode::WriteTimeout),
            SessionError::AuthTimeout => None,
            SessionError::Io(_) => None,
            SessionError::Shutdown => None,
        }
    }
}
