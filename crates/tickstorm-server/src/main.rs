mod app;
mod config;
mod core;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use app::AppState;
use config::Config;
use core::{ClockTickProducer, Supervisor};
use tickstorm_helpers::{logging, shutdown};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    logging::init_logging(
        "tickstorm_server=info,tokio=warn",
        "TICKSTORM_LOG",
        "tickstorm-server",
    );

    let config = Config::from_env().context("failed to load configuration")?;
    let state = AppState::new(config, Arc::new(ClockTickProducer::new()));

    info!(
        "tickstorm-server starting: listen={}, max_connections={}",
        state.config.listen_addr, state.config.max_connections
    );

    tokio::spawn(shutdown::listen_shutdown(state.shutdown.clone()));

    let sweep_shutdown = state.shutdown.child_token();
    let auth_rate_limiter = state.auth_rate_limiter.clone();
    tokio::spawn(async move { auth_rate_limiter.sweep_loop(sweep_shutdown).await });

    let supervisor = Arc::new(Supervisor::new(
        state.config.clone(),
        state.metrics.clone(),
        state.authenticator.clone(),
        state.producer.clone(),
        state.shutdown.clone(),
    ));

    supervisor.run().await
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::BytesMut;
    use tickstorm_proto::{
        decode_payload, encode_payload, AckResponse, AckType, AuthRequest, DataBatch, ErrorCode,
        ErrorResponse, FrameType, SubscribeRequest, SubscriptionMode,
    };
    use tokio::net::TcpStream;

    use crate::app::AppState;
    use crate::config::Config;
    use crate::core::{ClockTickProducer, Supervisor};

    fn test_config(port: u16) -> Config {
        Config {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], port)),
            max_connections: 1_000,
            max_msg_size: 65_536,
            heartbeat_interval_ms: 50,
            heartbeat_timeout: Duration::from_secs(20),
            batch_window: Duration::from_millis(20),
            max_batch_size: 10,
            max_write_queue_size: 64,
            write_deadline: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            tcp_read_buffer_size: 65_536,
            tcp_write_buffer_size: 65_536,
            stream_user: "loadtest".into(),
            stream_pass: "secret".into(),
            auth_max_attempts: 3,
            auth_rate_limit_window: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
            max_connections_per_ip: 100,
            max_new_connections_per_ip_per_sec: 100,
            port_scan_distinct_ports: 100,
            port_scan_window: Duration::from_secs(10),
        }
    }

    /// Spawns a `Supervisor` on `config.listen_addr` and waits until it has
    /// actually bound before returning, so callers never race the accept
    /// loop's `TcpListener::bind`.
    async fn spawn_server(config: Config) -> Arc<Supervisor> {
        let state = AppState::new(config, Arc::new(ClockTickProducer::new()));
        let supervisor = Arc::new(Supervisor::new(
            state.config.clone(),
            state.metrics.clone(),
            state.authenticator.clone(),
            state.producer.clone(),
            state.shutdown.clone(),
        ));

        let running = supervisor.clone();
        tokio::spawn(async move {
            let _ = running.run().await;
        });

        for _ in 0..100 {
            if supervisor.is_healthy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(supervisor.is_healthy(), "supervisor did not come up in time");
        supervisor
    }

    async fn connect(addr: SocketAddr) -> TcpStream {
        TcpStream::connect(addr).await.expect("connect to test server")
    }

    async fn send_frame(stream: &mut TcpStream, frame_type: FrameType, payload: &[u8]) {
        let mut scratch = BytesMut::new();
        tickstorm_proto::write_frame_async(stream, frame_type, payload, &mut scratch)
            .await
            .expect("write frame");
    }

    async fn recv_frame(stream: &mut TcpStream) -> tickstorm_proto::Frame {
        tickstorm_proto::read_frame_async(stream, 65_536)
            .await
            .expect("read frame")
    }

    async fn auth(stream: &mut TcpStream, username: &str, password: &str) {
        let payload = encode_payload(&AuthRequest {
            username: username.into(),
            password: password.into(),
            client_id: "it-client".into(),
            version_string: "1.0".into(),
        })
        .unwrap();
        send_frame(stream, FrameType::Auth, &payload).await;
    }

    async fn subscribe(stream: &mut TcpStream, mode: SubscriptionMode, symbols: Vec<String>) {
        let payload =
            encode_payload(&SubscribeRequest { mode, symbols, start_time_ms: None }).unwrap();
        send_frame(stream, FrameType::Subscribe, &payload).await;
    }

    fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn happy_path_auth_subscribe_stream() {
        let addr = test_addr(18_180);
        spawn_server(test_config(addr.port())).await;
        let mut stream = connect(addr).await;

        auth(&mut stream, "loadtest", "secret").await;
        let ack = recv_frame(&mut stream).await;
        assert_eq!(ack.frame_type, FrameType::Ack);
        let ack: AckResponse = decode_payload(&ack.payload).unwrap();
        assert_eq!(ack.ack_type, AckType::Auth);
        assert!(ack.success);

        subscribe(&mut stream, SubscriptionMode::Second, vec!["AAPL".into()]).await;
        let ack = recv_frame(&mut stream).await;
        assert_eq!(ack.frame_type, FrameType::Ack);
        let ack: AckResponse = decode_payload(&ack.payload).unwrap();
        assert_eq!(ack.ack_type, AckType::Subscribe);
        assert!(ack.success);

        let data = tokio::time::timeout(Duration::from_secs(3), recv_frame(&mut stream))
            .await
            .expect("should receive a data batch before the timeout");
        assert_eq!(data.frame_type, FrameType::DataBatch);
        let batch: DataBatch = decode_payload(&data.payload).unwrap();
        assert!(!batch.ticks.is_empty());
        assert_eq!(batch.ticks[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn non_auth_frame_before_auth_is_rejected() {
        let addr = test_addr(18_181);
        spawn_server(test_config(addr.port())).await;
        let mut stream = connect(addr).await;

        subscribe(&mut stream, SubscriptionMode::Second, vec!["AAPL".into()]).await;

        let frame = recv_frame(&mut stream).await;
        assert_eq!(frame.frame_type, FrameType::Error);
        let err: ErrorResponse = decode_payload(&frame.payload).unwrap();
        assert_eq!(err.code, ErrorCode::InvalidMessage);
    }

    #[tokio::test]
    async fn heartbeat_timeout_closes_session() {
        let addr = test_addr(18_182);
        let mut config = test_config(addr.port());
        config.heartbeat_timeout = Duration::from_millis(150);
        spawn_server(config).await;
        let mut stream = connect(addr).await;

        auth(&mut stream, "loadtest", "secret").await;
        let _ack = recv_frame(&mut stream).await;

        let frame = tokio::time::timeout(Duration::from_secs(2), recv_frame(&mut stream))
            .await
            .expect("server should close after missing heartbeat");
        assert_eq!(frame.frame_type, FrameType::Error);
        let err: ErrorResponse = decode_payload(&frame.payload).unwrap();
        assert_eq!(err.code, ErrorCode::HeartbeatTimeout);
    }

    #[tokio::test]
    async fn tampered_checksum_is_rejected() {
        let addr = test_addr(18_183);
        spawn_server(test_config(addr.port())).await;
        let mut stream = connect(addr).await;

        let payload = encode_payload(&AuthRequest {
            username: "loadtest".into(),
            password: "secret".into(),
            client_id: "it-client".into(),
            version_string: "1.0".into(),
        })
        .unwrap();
        let mut scratch = BytesMut::new();
        let framed = tickstorm_proto::encode(FrameType::Auth, &payload, &mut scratch).unwrap();
        let mut framed = framed.to_vec();
        let last = framed.len() - 1;
        framed[last] ^= 0xFF;

        use tokio::io::AsyncWriteExt;
        stream.write_all(&framed).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), recv_frame(&mut stream))
            .await
            .expect("server should respond before timing out");
        assert_eq!(frame.frame_type, FrameType::Error);
        let err: ErrorResponse = decode_payload(&frame.payload).unwrap();
        assert_eq!(err.code, ErrorCode::InvalidMessage);
    }

    #[tokio::test]
    async fn repeated_bad_auth_triggers_rate_limit() {
        let addr = test_addr(18_184);
        let mut config = test_config(addr.port());
        config.auth_max_attempts = 1;
        config.auth_rate_limit_window = Duration::from_secs(60);
        spawn_server(config).await;

        let mut first = connect(addr).await;
        auth(&mut first, "loadtest", "wrong-password").await;
        let frame = recv_frame(&mut first).await;
        assert_eq!(frame.frame_type, FrameType::Error);
        let err: ErrorResponse = decode_payload(&frame.payload).unwrap();
        assert_eq!(err.code, ErrorCode::InvalidAuth);

        let mut second = connect(addr).await;
        auth(&mut second, "loadtest", "wrong-password").await;
        let frame = recv_frame(&mut second).await;
        assert_eq!(frame.frame_type, FrameType::Error);
        let err: ErrorResponse = decode_payload(&frame.payload).unwrap();
        assert_eq!(err.code, ErrorCode::RateLimited);
    }

    #[tokio::test]
    async fn mode_switch_while_streaming_is_rejected() {
        let addr = test_addr(18_185);
        spawn_server(test_config(addr.port())).await;
        let mut stream = connect(addr).await;

        auth(&mut stream, "loadtest", "secret").await;
        let _ack = recv_frame(&mut stream).await;
        subscribe(&mut stream, SubscriptionMode::Second, vec!["AAPL".into()]).await;
        let _ack = recv_frame(&mut stream).await;

        subscribe(&mut stream, SubscriptionMode::Minute, vec!["AAPL".into()]).await;

        let frame = tokio::time::timeout(Duration::from_secs(2), recv_frame(&mut stream))
            .await
            .expect("server should respond before timing out");
        assert_eq!(frame.frame_type, FrameType::Error);
        let err: ErrorResponse = decode_payload(&frame.payload).unwrap();
        assert_eq!(err.code, ErrorCode::ModeSwitchNotAllowed);
    }
}
