use std::convert::TryFrom;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
#[cfg(feature = "tokio")]
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Two-byte sentinel at the start of every frame, distinguishing this
/// protocol from unrelated traffic arriving on the same port.
pub const MAGIC: [u8; 2] = *b"TS";

/// Protocol versions this build understands. Only the first is currently
/// emitted; the set exists so a future version bump can accept both during
/// a rollout window.
pub const SUPPORTED_VERSIONS: &[u8] = &[1];

/// Current protocol version written by the encoder.
pub const CURRENT_VERSION: u8 = 1;

/// Default cap on payload bytes, matching `MAX_MSG_SIZE`'s configuration
/// default. Callers read from `Config` rather than this constant at
/// runtime; it exists for tests and as the fallback default.
pub const DEFAULT_MAX_MSG_SIZE: u32 = 65536;

const HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 4;

/// Wire frame type tag (header byte 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Auth = 0x01,
    Subscribe = 0x02,
    Heartbeat = 0x03,
    DataBatch = 0x04,
    Error = 0x05,
    Ack = 0x06,
}

impl FrameType {
    /// `HEARTBEAT` is the only type permitted to carry an empty payload.
    pub fn allows_empty_payload(self) -> bool {
        matches!(self, FrameType::Heartbeat)
    }
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameType::Auth),
            0x02 => Ok(FrameType::Subscribe),
            0x03 => Ok(FrameType::Heartbeat),
            0x04 => Ok(FrameType::DataBatch),
            0x05 => Ok(FrameType::Error),
            0x06 => Ok(FrameType::Ack),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame magic mismatch")]
    BadMagic,
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),
    #[error("unknown frame type: {0:#x}")]
    UnknownType(u8),
    #[error("payload too large: {0} bytes")]
    MessageTooLarge(u32),
    #[error("empty payload not permitted for this frame type")]
    EmptyPayloadNotAllowed,
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded frame. Payload bytes are returned uninterpreted; the caller
/// deserializes them according to `frame_type`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub version: u8,
    pub frame_type: FrameType,
    pub payload: Bytes,
}

/// Encodes a frame: header + payload + CRC32C trailer.
///
/// Buffers are drawn from the caller-supplied scratch `BytesMut` (see
/// [`BufferPool`]) to avoid a fresh heap allocation per frame.
pub fn encode(
    frame_type: FrameType,
    payload: &[u8],
    scratch: &mut BytesMut,
) -> Result<Bytes, FrameError> {
    let length = u32::try_from(payload.len())
        .map_err(|_| FrameError::MessageTooLarge(u32::MAX))?;

    if length == 0 && !frame_type.allows_empty_payload() {
        return Err(FrameError::EmptyPayloadNotAllowed);
    }

    scratch.clear();
    scratch.reserve(HEADER_LEN + payload.len() + TRAILER_LEN);

    scratch.put_slice(&MAGIC);
    scratch.put_u8(CURRENT_VERSION);
    scratch.put_u8(frame_type as u8);
    scratch.put_u32(length);
    scratch.put_slice(payload);

    let checksum = checksum_body(CURRENT_VERSION, frame_type as u8, length, payload);
    scratch.put_u32(checksum);

    Ok(scratch.split().freeze())
}

/// Synchronous decoder over an in-memory buffer, used by tests and by the
/// reference client. Returns `Ok(None)` if `buf` does not yet hold a
/// complete frame (a partial read): the caller must not discard `buf` in
/// that case and should retry after reading more bytes.
pub fn decode(buf: &[u8], max_msg_size: u32) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let (magic, rest) = buf.split_at(2);
    if magic != MAGIC {
        return Err(FrameError::BadMagic);
    }

    let version = rest[0];
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(FrameError::UnsupportedVersion(version));
    }

    let frame_type = FrameType::try_from(rest[1])?;
    let length = u32::from_be_bytes([rest[2], rest[3], rest[4], rest[5]]);

    if length > max_msg_size {
        return Err(FrameError::MessageTooLarge(length));
    }
    if length == 0 && !frame_type.allows_empty_payload() {
        return Err(FrameError::EmptyPayloadNotAllowed);
    }

    let total = HEADER_LEN + length as usize + TRAILER_LEN;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = &buf[HEADER_LEN..HEADER_LEN + length as usize];
    let trailer = &buf[HEADER_LEN + length as usize..total];
    let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = checksum_body(version, rest[1], length, payload);

    if actual != expected {
        return Err(FrameError::ChecksumMismatch);
    }

    Ok(Some((
        Frame { version, frame_type, payload: Bytes::copy_from_slice(payload) },
        total,
    )))
}

/// Reads exactly one frame from an async stream, single-pass: the 8-byte
/// header is read first so the length can be validated before the
/// `length + 4` remaining bytes are pulled. Never buffers more than one
/// frame's worth of bytes.
#[cfg(feature = "tokio")]
pub async fn read_frame_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_msg_size: u32,
) -> Result<Frame, FrameError> {
    let mut header = [0_u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    if header[0..2] != MAGIC {
        return Err(FrameError::BadMagic);
    }

    let version = header[2];
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(FrameError::UnsupportedVersion(version));
    }

    let frame_type = FrameType::try_from(header[3])?;
    let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

    if length > max_msg_size {
        return Err(FrameError::MessageTooLarge(length));
    }
    if length == 0 && !frame_type.allows_empty_payload() {
        return Err(FrameError::EmptyPayloadNotAllowed);
    }

    let mut body = vec![0_u8; length as usize + TRAILER_LEN];
    reader.read_exact(&mut body).await?;

    let payload = &body[..length as usize];
    let trailer = &body[length as usize..];
    let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = checksum_body(version, header[3], length, payload);

    if actual != expected {
        return Err(FrameError::ChecksumMismatch);
    }

    Ok(Frame { version, frame_type, payload: Bytes::copy_from_slice(payload) })
}

/// Writes a single frame to an async stream using a caller-owned scratch
/// buffer, so a session's writer task never allocates per write.
#[cfg(feature = "tokio")]
pub async fn write_frame_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame_type: FrameType,
    payload: &[u8],
    scratch: &mut BytesMut,
) -> Result<(), FrameError> {
    let framed = encode(frame_type, payload, scratch)?;
    writer.write_all(&framed).await?;
    Ok(())
}

fn checksum_body(version: u8, frame_type: u8, length: u32, payload: &[u8]) -> u32 {
    let mut scratch = Vec::with_capacity(6 + payload.len());
    scratch.put_u8(version);
    scratch.put_u8(frame_type);
    scratch.put_u32(length);
    scratch.put_slice(payload);
    crc32c::crc32c(&scratch)
}

/// A tiny per-task scratch-buffer pool. Each session reader/writer keeps
/// one of these around rather than allocating a fresh `BytesMut` per
/// frame; `take` hands out the buffer (leaving an empty replacement
/// behind) and `put` returns it after the buffer has been drained onto
/// the socket.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Vec<BytesMut>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self { free: Vec::new() }
    }

    pub fn take(&mut self) -> BytesMut {
        self.free.pop().unwrap_or_else(|| BytesMut::with_capacity(4096))
    }

    pub fn put(&mut self, mut buf: BytesMut) {
        buf.clear();
        if self.free.len() < 8 {
            self.free.push(buf);
        }
    }
}
