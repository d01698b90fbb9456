use std::fmt;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use std::sync::Mutex;

use anyhow::{Context, Result};
use hdrhistogram::Histogram;
use tickstorm_proto::{
    decode_payload, encode_payload, read_frame_async, write_frame_async, AckResponse, AuthRequest,
    DataBatch, FrameType, SubscribeRequest, SubscriptionMode, DEFAULT_MAX_MSG_SIZE,
};
use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tracing::{info, warn};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::try_init().ok();

    let args = match Cli::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("tickstorm-loadgen error: {err}");
            return ExitCode::from(64);
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("tickstorm-loadgen error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let addr: SocketAddr = args
        .server
        .parse()
        .with_context(|| format!("invalid --server address {:?}", args.server))?;

    let histogram = Arc::new(Mutex::new(
        Histogram::<u64>::new_with_bounds(1, 60_000, 3).expect("valid histogram bounds"),
    ));
    let ticks_received = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(args.connections + 1));

    let mut handles = Vec::with_capacity(args.connections);
    for id in 0..args.connections {
        let args = args.clone();
        let histogram = histogram.clone();
        let ticks_received = ticks_received.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            if let Err(err) = run_connection(id, addr, args, histogram, ticks_received).await {
                warn!("connection {id} ended: {err:#}");
            }
        }));
    }

    info!("starting {} connections against {addr}", args.connections);
    barrier.wait().await;
    let start = tokio::time::Instant::now();

    tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;

    for handle in handles {
        handle.abort();
    }

    let elapsed = start.elapsed();
    let total_ticks = ticks_received.load(std::sync::atomic::Ordering::Relaxed);
    let histogram = histogram.lock().expect("histogram mutex poisoned");

    println!("--- tickstorm-loadgen report ---");
    println!("connections:       {}", args.connections);
    println!("duration:          {:.2}s", elapsed.as_secs_f64());
    println!("ticks received:    {total_ticks}");
    println!(
        "throughput:        {:.1} ticks/s",
        total_ticks as f64 / elapsed.as_secs_f64().max(0.001)
    );
    if histogram.len() > 0 {
        println!("latency p50 (ms):  {}", histogram.value_at_quantile(0.50));
        println!("latency p90 (ms):  {}", histogram.value_at_quantile(0.90));
        println!("latency p99 (ms):  {}", histogram.value_at_quantile(0.99));
        println!("latency max (ms):  {}", histogram.max());
    } else {
        println!("latency:           no samples recorded");
    }

    Ok(())
}

async fn run_connection(
    id: usize,
    addr: SocketAddr,
    args: Cli,
    histogram: Arc<Mutex<Histogram<u64>>>,
    ticks_received: Arc<std::sync::atomic::AtomicU64>,
) -> Result<()> {
    let mut stream = TcpStream::connect(addr).await.context("connect failed")?;
    stream.set_nodelay(true).ok();
    let mut scratch = bytes::BytesMut::new();

    let auth = AuthRequest {
        username: args.username.clone(),
        password: args.password.clone(),
        client_id: format!("tickstorm-loadgen-{id}"),
        version_string: env!("CARGO_PKG_VERSION").to_string(),
    };
    let payload = encode_payload(&auth).context("encode AUTH")?;
    write_frame_async(&mut stream, FrameType::Auth, &payload, &mut scratch)
        .await
        .context("send AUTH")?;
    expect_ack(&mut stream).await.context("AUTH rejected")?;

    let subscribe = SubscribeRequest { mode: args.mode, symbols: args.symbols.clone(), start_time_ms: None };
    let payload = encode_payload(&subscribe).context("encode SUBSCRIBE")?;
    write_frame_async(&mut stream, FrameType::Subscribe, &payload, &mut scratch)
        .await
        .context("send SUBSCRIBE")?;
    expect_ack(&mut stream).await.context("SUBSCRIBE rejected")?;

    loop {
        let frame = read_frame_async(&mut stream, DEFAULT_MAX_MSG_SIZE)
            .await
            .context("read frame")?;

        if frame.frame_type == FrameType::DataBatch {
            let batch: DataBatch = decode_payload(&frame.payload).context("decode DATA_BATCH")?;
            let now = now_ms();
            ticks_received.fetch_add(batch.ticks.len() as u64, std::sync::atomic::Ordering::Relaxed);
            let mut histogram = histogram.lock().expect("histogram mutex poisoned");
            for tick in &batch.ticks {
                let latency_ms = now.saturating_sub(tick.timestamp_ms);
                let _ = histogram.record(latency_ms);
            }
        }
    }
}

async fn expect_ack(stream: &mut TcpStream) -> Result<()> {
    let frame = read_frame_async(stream, DEFAULT_MAX_MSG_SIZE).await.context("read response")?;
    match frame.frame_type {
        FrameType::Ack => {
            let _ack: AckResponse = decode_payload(&frame.payload).context("decode ACK")?;
            Ok(())
        }
        other => anyhow::bail!("expected ACK, got {other:?}"),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
struct Cli {
    server: String,
    username: String,
    password: String,
    mode: SubscriptionMode,
    symbols: Vec<String>,
    connections: usize,
    duration_secs: u64,
}

impl Cli {
    fn parse<I>(mut args: I) -> std::result::Result<Self, CliError>
    where
        I: Iterator<Item = String>,
    {
        let mut server = None;
        let mut username = None;
        let mut password = None;
        let mut mode = SubscriptionMode::Second;
        let mut symbols = Vec::new();
        let mut connections = 10_usize;
        let mut duration_secs = 10_u64;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--server" => server = args.next(),
                "--username" => username = args.next(),
                "--password" => password = args.next(),
                "--mode" => {
                    let raw =
                        args.next().ok_or_else(|| CliError("missing value for --mode".into()))?;
                    mode = match raw.to_ascii_uppercase().as_str() {
                        "SECOND" => SubscriptionMode::Second,
                        "MINUTE" => SubscriptionMode::Minute,
                        other => {
                            return Err(CliError(format!("--mode must be SECOND or MINUTE, got {other:?}")));
                        }
                    };
                }
                "--symbol" => {
                    symbols.push(
                        args.next().ok_or_else(|| CliError("missing value for --symbol".into()))?,
                    );
                }
                "--connections" => {
                    let raw = args
                        .next()
                        .ok_or_else(|| CliError("missing value for --connections".into()))?;
                    connections = raw
                        .parse()
                        .map_err(|_| CliError("--connections must be a positive integer".into()))?;
                }
                "--duration-secs" => {
                    let raw = args
                        .next()
                        .ok_or_else(|| CliError("missing value for --duration-secs".into()))?;
                    duration_secs = raw
                        .parse()
                        .map_err(|_| CliError("--duration-secs must be a positive integer".into()))?;
                }
                "-h" | "--help" => {
                    return Err(CliError(
                        "usage: tickstorm-loadgen --server host:port --username u --password p \
                         [--connections 10] [--duration-secs 10] [--mode SECOND|MINUTE] [--symbol SYM ...]"
                            .to_string(),
                    ));
                }
                other => return Err(CliError(format!("unknown argument: {other}"))),
            }
        }

        Ok(Self {
            server: server.ok_or_else(|| CliError("missing required argument --server".into()))?,
            username: username
                .ok_or_else(|| CliError("missing required argument --username".into()))?,
            password: password
                .ok_or_else(|| CliError("missing required argument --password".into()))?,
            mode,
            symbols,
            connections,
            duration_secs,
        })
    }
}

#[derive(Debug)]
struct CliError(String);

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CliError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parse_defaults() {
        let args = vec![
            "--server".to_string(),
            "127.0.0.1:9999".to_string(),
            "--username".to_string(),
            "user1".to_string(),
            "--password".to_string(),
            "pw1".to_string(),
        ];
        let cli = Cli::parse(args.into_iter()).expect("parse should succeed");
        assert_eq!(cli.connections, 10);
        assert_eq!(cli.duration_secs, 10);
        assert_eq!(cli.mode, SubscriptionMode::Second);
    }

    #[test]
    fn cli_parse_overrides() {
        let args = vec![
            "--server".to_string(),
            "127.0.0.1:9999".to_string(),
            "--username".to_string(),
            "user1".to_string(),
            "--password".to_string(),
            "pw1".to_string(),
            "--connections".to_string(),
            "50".to_string(),
            "--duration-secs".to_string(),
            "30".to_string(),
        ];
        let cli = Cli::parse(args.into_iter()).expect("parse should succeed");
        assert_eq!(cli.connections, 50);
        assert_eq!(cli.duration_secs, 30);
    }
}
