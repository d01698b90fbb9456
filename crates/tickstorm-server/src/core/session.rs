use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tickstorm_proto::{
    decode_payload, encode_payload, AckResponse, AckType, ErrorResponse, Frame, FrameType,
    HeartbeatRequest, SubscribeRequest,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::metrics::Metrics;

use super::authenticator::{AuthOutcome, Authenticator};
use super::delivery::Batcher;
use super::errors::{ProtocolError, SessionError};
use super::heartbeat::HeartbeatMonitor;
use super::producer::TickProducer;
use super::subscription::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitAuth,
    AwaitSubscribe,
    Streaming,
}

/// Resources shared by every session, handed down from the supervisor.
pub struct SessionContext {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub authenticator: Arc<Authenticator>,
    pub producer: Arc<dyn TickProducer>,
    pub shutdown: CancellationToken,
}

struct OutgoingFrame {
    frame_type: FrameType,
    payload: Vec<u8>,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Drives one accepted connection end to end: reads frames, advances the
/// `{AwaitAuth, AwaitSubscribe, Streaming, Closing}` state machine, and
/// spawns the writer + delivery tasks once streaming begins. Returns once
/// the connection is closed, for whatever reason.
pub async fn run_session(stream: TcpStream, peer: SocketAddr, ctx: SessionContext) {
    Metrics::incr(&ctx.metrics.connections_accepted);
    Metrics::incr(&ctx.metrics.connections_active);

    let session_shutdown = ctx.shutdown.child_token();
    let (reader, writer) = stream.into_split();

    let (control_tx, control_rx) = mpsc::unbounded_channel::<OutgoingFrame>();
    let (data_tx, data_rx) = mpsc::channel(ctx.config.max_write_queue_size);

    let writer_handle = tokio::spawn(run_writer(
        writer,
        control_rx,
        data_rx,
        ctx.config.write_deadline,
        ctx.metrics.clone(),
    ));

    let result = run_reader(reader, peer, &ctx, control_tx.clone(), data_tx, session_shutdown.clone()).await;

    if let Err(ref err) = result {
        match err {
            SessionError::Frame(_) => Metrics::incr(&ctx.metrics.invalid_frame_total),
            SessionError::Protocol(_) => Metrics::incr(&ctx.metrics.protocol_error_total),
            _ => {}
        }
        if let Some(code) = err.error_code() {
            let response = ErrorResponse { code, message: err.to_string(), timestamp_ms: now_ms() };
            if let Ok(payload) = encode_payload(&response) {
                let _ = control_tx.send(OutgoingFrame { frame_type: FrameType::Error, payload });
            }
        }
        if matches!(err, SessionError::Shutdown) {
            info!("session closed: peer={peer}, reason=shutdown");
        } else {
            warn!("session closed: peer={peer}, reason={err}");
        }
    }

    session_shutdown.cancel();
    drop(control_tx);
    let _ = writer_handle.await;

    ctx.metrics.connections_active.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
}

async fn run_reader(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    peer: SocketAddr,
    ctx: &SessionContext,
    control_tx: mpsc::UnboundedSender<OutgoingFrame>,
    data_tx: mpsc::Sender<tickstorm_proto::DataBatch>,
    session_shutdown: CancellationToken,
) -> Result<(), SessionError> {
    let mut state = State::AwaitAuth;
    let mut subscription: Option<Subscription> = None;
    let mut heartbeat = HeartbeatMonitor::new(ctx.config.heartbeat_timeout);
    let auth_deadline = Instant::now() + ctx.config.read_timeout;

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                return Err(SessionError::Shutdown);
            }
            _ = tokio::time::sleep_until(auth_deadline), if state == State::AwaitAuth => {
                return Err(SessionError::AuthTimeout);
            }
            _ = tokio::time::sleep_until(heartbeat.deadline()), if state != State::AwaitAuth => {
                Metrics::incr(&ctx.metrics.heartbeat_timeout_total);
                return Err(SessionError::HeartbeatTimeout);
            }
            frame = tickstorm_proto::read_frame_async(&mut reader, ctx.config.max_msg_size) => {
                let frame = frame?;
                Metrics::incr(&ctx.metrics.frames_in);
                Metrics::add(&ctx.metrics.bytes_in, frame.payload.len() as u64);

                match state {
                    State::AwaitAuth => {
                        handle_auth_frame(&frame, peer, ctx, &control_tx)?;
                        state = State::AwaitSubscribe;
                        heartbeat.reset();
                    }
                    State::AwaitSubscribe => {
                        match frame.frame_type {
                            FrameType::Heartbeat => {
                                handle_heartbeat(&frame, &control_tx)?;
                                heartbeat.reset();
                            }
                            FrameType::Subscribe => {
                                let sub = handle_subscribe(&frame, &control_tx)?;
                                let ticks = ctx.producer
                                    .subscribe(sub.mode, sub.symbols.clone(), session_shutdown.clone())
                                    .await;
                                let batcher = Batcher::new(
                                    ctx.config.batch_window,
                                    ctx.config.max_batch_size,
                                    ctx.metrics.clone(),
                                );
                                let batch_shutdown = session_shutdown.clone();
                                let batch_data_tx = data_tx.clone();
                                tokio::spawn(async move {
                                    batcher.run(ticks, batch_data_tx, batch_shutdown).await;
                                });
                                subscription = Some(sub);
                                state = State::Streaming;
                                heartbeat.reset();
                            }
                            FrameType::Auth => return Err(ProtocolError::InvalidSequence.into()),
                            _ => return Err(ProtocolError::InvalidMessage.into()),
                        }
                    }
                    State::Streaming => {
                        match frame.frame_type {
                            FrameType::Heartbeat => {
                                handle_heartbeat(&frame, &control_tx)?;
                                heartbeat.reset();
                            }
                            FrameType::Subscribe => {
                                let requested: SubscribeRequest = decode_payload(&frame.payload)?;
                                let current = subscription.as_ref().expect("streaming implies subscribed");
                                if requested.mode == current.mode {
                                    return Err(ProtocolError::AlreadySubscribed.into());
                                } else {
                                    return Err(ProtocolError::ModeSwitchNotAllowed.into());
                                }
                            }
                            _ => return Err(ProtocolError::InvalidMessage.into()),
                        }
                    }
                }
            }
        }
    }
}

fn handle_auth_frame(
    frame: &Frame,
    peer: SocketAddr,
    ctx: &SessionContext,
    control_tx: &mpsc::UnboundedSender<OutgoingFrame>,
) -> Result<(), SessionError> {
    if !Authenticator::is_auth_frame(frame.frame_type) {
        return Err(ProtocolError::InvalidMessage.into());
    }

    match ctx.authenticator.authenticate(peer.ip(), false, &frame.payload) {
        AuthOutcome::Ok(_session_id) => {
            Metrics::incr(&ctx.metrics.auth_success);
            let ack = AckResponse {
                ack_type: AckType::Auth,
                success: true,
                message: "authenticated".into(),
                timestamp_ms: now_ms(),
            };
            let payload = encode_payload(&ack)?;
            let _ = control_tx.send(OutgoingFrame { frame_type: FrameType::Ack, payload });
            Ok(())
        }
        AuthOutcome::Rejected(err) => {
            if matches!(err, super::errors::AuthError::RateLimited) {
                Metrics::incr(&ctx.metrics.rate_limited_total);
            } else {
                Metrics::incr(&ctx.metrics.auth_failure);
            }
            Err(err.into())
        }
    }
}

fn handle_heartbeat(
    frame: &Frame,
    control_tx: &mpsc::UnboundedSender<OutgoingFrame>,
) -> Result<(), SessionError> {
    let request: HeartbeatRequest = if frame.payload.is_empty() {
        HeartbeatRequest { timestamp_ms: now_ms(), sequence: 0 }
    } else {
        decode_payload(&frame.payload)?
    };

    let ack = AckResponse {
        ack_type: AckType::Heartbeat,
        success: true,
        message: format!("pong:{}", request.sequence),
        timestamp_ms: now_ms(),
    };
    let payload = encode_payload(&ack)?;
    let _ = control_tx.send(OutgoingFrame { frame_type: FrameType::Ack, payload });
    Ok(())
}

fn handle_subscribe(
    frame: &Frame,
    _control_tx: &mpsc::UnboundedSender<OutgoingFrame>,
) -> Result<Subscription, SessionError> {
    if frame.frame_type != FrameType::Subscribe {
        return Err(ProtocolError::InvalidMessage.into());
    }
    let request: SubscribeRequest = decode_payload(&frame.payload)?;
    Ok(Subscription::new(request.mode, request.symbols))
}

async fn run_writer(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut control_rx: mpsc::UnboundedReceiver<OutgoingFrame>,
    mut data_rx: mpsc::Receiver<tickstorm_proto::DataBatch>,
    write_deadline: std::time::Duration,
    metrics: Arc<Metrics>,
) {
    let mut scratch = BytesMut::new();

    loop {
        let outgoing = tokio::select! {
            biased;
            maybe = control_rx.recv() => match maybe {
                Some(frame) => frame,
                None => break,
            },
            maybe = data_rx.recv() => match maybe {
                Some(batch) => {
                    let payload = match encode_payload(&batch) {
                        Ok(payload) => payload,
                        Err(_) => continue,
                    };
                    OutgoingFrame { frame_type: FrameType::DataBatch, payload }
                }
                None => break,
            },
        };

        let write = tickstorm_proto::write_frame_async(
            &mut writer,
            outgoing.frame_type,
            &outgoing.payload,
            &mut scratch,
        );

        match tokio::time::timeout(write_deadline, write).await {
            Ok(Ok(())) => {
                Metrics::incr(&metrics.frames_out);
                Metrics::add(&metrics.bytes_out, outgoing.payload.len() as u64);
            }
            Ok(Err(_)) => break,
            Err(_elapsed) => {
                Metrics::incr(&metrics.write_timeout_total);
                break;
            }
        }
    }
}
