//! Payload schemas carried inside a [`crate::frame::Frame`].
//!
//! Field numbers are not literal wire tags here (the payload is JSON, not a
//! varint-tagged binary format) but the *set* of fields is the stable
//! contract: once a field is added it is never renamed, and a field that is
//! dropped is kept around as `#[serde(default)]` rather than removed, so
//! older payload bytes still deserialize.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub version_string: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionMode {
    Second,
    Minute,
}

impl SubscriptionMode {
    pub fn cadence_ms(self) -> u64 {
        match self {
            SubscriptionMode::Second => 1_000,
            SubscriptionMode::Minute => 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscribeRequest {
    pub mode: SubscriptionMode,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub start_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub timestamp_ms: u64,
    pub sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub timestamp_ms: u64,
    pub mode: SubscriptionMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataBatch {
    pub schema_version: u8,
    pub ticks: Vec<Tick>,
}

pub const DATA_BATCH_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AckType {
    Auth,
    Subscribe,
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckResponse {
    pub ack_type: AckType,
    pub success: bool,
    pub message: String,
    pub timestamp_ms: u64,
}

/// Error codes surfaced to peers in [`ErrorResponse`]. Kept as a plain
/// string enum (rather than an integer) so logs and client error handling
/// both read the same value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMessage,
    InvalidAuth,
    InvalidSequence,
    InvalidSubscription,
    AlreadySubscribed,
    ModeSwitchNotAllowed,
    RateLimited,
    HeartbeatTimeout,
    WriteTimeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload encode error: {0}")]
    Encode(String),
    #[error("payload decode error: {0}")]
    Decode(String),
}

pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, PayloadError> {
    serde_json::to_vec(value).map_err(|err| PayloadError::Encode(err.to_string()))
}

pub fn decode_payload<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
) -> Result<T, PayloadError> {
    serde_json::from_slice(bytes).map_err(|err| PayloadError::Decode(err.to_string()))
}
