mod frame;
mod messages;

pub use frame::{
    decode, encode, BufferPool, Frame, FrameError, FrameType, CURRENT_VERSION,
    DEFAULT_MAX_MSG_SIZE, MAGIC, SUPPORTED_VERSIONS,
};
#[cfg(feature = "tokio")]
pub use frame::{read_frame_async, write_frame_async};

pub use messages::{
    decode_payload, encode_payload, AckResponse, AckType, AuthRequest, DataBatch,
    ErrorCode, ErrorResponse, HeartbeatRequest, PayloadError, SubscribeRequest,
    SubscriptionMode, Tick, DATA_BATCH_SCHEMA_VERSION,
};
