use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics::Metrics;

use super::authenticator::Authenticator;
use super::port_scan::PortScanDetector;
use super::producer::TickProducer;
use super::rate_limiter::{RateDecision, RateLimiter};
use super::session::{run_session, SessionContext};

/// Why a connection was rejected before a session was ever created. No
/// `ERROR` frame is possible here — there is no session to send one on,
/// consistent with the error taxonomy's resource-cap category having no
/// wire representation.
#[derive(Debug, Clone, Copy)]
enum RejectReason {
    GlobalCap,
    PerIpCap,
    PerIpRate,
    PortScan,
}

impl RejectReason {
    fn as_str(self) -> &'static str {
        match self {
            RejectReason::GlobalCap => "global_connection_cap",
            RejectReason::PerIpCap => "per_ip_connection_cap",
            RejectReason::PerIpRate => "per_ip_connection_rate",
            RejectReason::PortScan => "port_scan_detected",
        }
    }
}

/// Owns the listening socket, enforces admission caps, and hands accepted
/// connections off to [`run_session`]. Graceful shutdown stops accepting,
/// cancels the shared token so every in-flight session unwinds, and waits
/// up to `SHUTDOWN_TIMEOUT` for them to drain before returning.
pub struct Supervisor {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    authenticator: Arc<Authenticator>,
    producer: Arc<dyn TickProducer>,
    shutdown: CancellationToken,
    connections_per_ip: RwLock<HashMap<IpAddr, usize>>,
    connection_rate_limiter: RateLimiter,
    port_scan: PortScanDetector,
    listener_alive: AtomicBool,
}

impl Supervisor {
    pub fn new(
        config: Arc<Config>,
        metrics: Arc<Metrics>,
        authenticator: Arc<Authenticator>,
        producer: Arc<dyn TickProducer>,
        shutdown: CancellationToken,
    ) -> Self {
        let connection_rate_limiter = RateLimiter::new(
            config.max_new_connections_per_ip_per_sec,
            std::time::Duration::from_secs(1),
        );
        let port_scan =
            PortScanDetector::new(config.port_scan_distinct_ports, config.port_scan_window);

        Self {
            config,
            metrics,
            authenticator,
            producer,
            shutdown,
            connections_per_ip: RwLock::new(HashMap::new()),
            connection_rate_limiter,
            port_scan,
            listener_alive: AtomicBool::new(false),
        }
    }

    /// True iff the accept loop is currently running. Meant to be polled by
    /// a liveness-probe shim this workspace does not itself expose over
    /// HTTP/gRPC.
    pub fn is_healthy(&self) -> bool {
        self.listener_alive.load(Ordering::Relaxed)
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind tcp listener on {}", self.config.listen_addr))?;
        info!("tickstorm-server listening on {}", self.config.listen_addr);

        self.listener_alive.store(true, Ordering::Relaxed);

        let rate_sweep = self.clone();
        let rate_sweep_shutdown = self.shutdown.child_token();
        tokio::spawn(async move {
            rate_sweep.connection_rate_limiter.sweep_loop(rate_sweep_shutdown).await
        });

        let port_scan_sweep = self.clone();
        let port_scan_shutdown = self.shutdown.child_token();
        tokio::spawn(async move { port_scan_sweep.port_scan_sweep_loop(port_scan_shutdown).await });

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("acceptor stopping, draining sessions");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!("accept failed: {err}");
                            continue;
                        }
                    };

                    if let Err(reason) = self.admit(peer.ip(), peer.port()) {
                        Metrics::incr(&self.metrics.connections_rejected);
                        debug!("connection rejected: peer={peer}, reason={}", reason.as_str());
                        continue;
                    }

                    self.bump_per_ip(peer.ip(), 1);

                    let ctx = SessionContext {
                        config: self.config.clone(),
                        metrics: self.metrics.clone(),
                        authenticator: self.authenticator.clone(),
                        producer: self.producer.clone(),
                        shutdown: self.shutdown.clone(),
                    };
                    let this = self.clone();
                    tokio::spawn(async move {
                        run_session(stream, peer, ctx).await;
                        this.bump_per_ip(peer.ip(), -1);
                    });
                }
            }
        }

        self.listener_alive.store(false, Ordering::Relaxed);
        self.drain().await;
        Ok(())
    }

    fn admit(&self, ip: IpAddr, port: u16) -> Result<(), RejectReason> {
        let active = self.metrics.connections_active.load(Ordering::Relaxed) as usize;
        if active >= self.config.max_connections {
            return Err(RejectReason::GlobalCap);
        }

        if self.port_scan.observe(ip, port) {
            return Err(RejectReason::PortScan);
        }

        if self.connection_rate_limiter.check(ip) == RateDecision::RateLimited {
            return Err(RejectReason::PerIpRate);
        }

        let per_ip = self.connections_per_ip.read().get(&ip).copied().unwrap_or(0);
        if per_ip >= self.config.max_connections_per_ip {
            return Err(RejectReason::PerIpCap);
        }

        Ok(())
    }

    fn bump_per_ip(&self, ip: IpAddr, delta: isize) {
        let mut per_ip = self.connections_per_ip.write();
        let entry = per_ip.entry(ip).or_insert(0);
        *entry = entry.saturating_add_signed(delta);
        if *entry == 0 {
            per_ip.remove(&ip);
        }
    }

    /// Periodically garbage-collects the port-scan bookkeeping, so a server
    /// that runs for weeks doesn't accumulate one record per source IP ever
    /// seen. The connection rate limiter has its own equivalent sweep loop.
    async fn port_scan_sweep_loop(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(
            self.config.port_scan_window.max(std::time::Duration::from_secs(1)),
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.port_scan.sweep(),
            }
        }
    }

    async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let active = self.metrics.connections_active.load(Ordering::Relaxed);
            if active == 0 || tokio::time::Instant::now() >= deadline {
                if active > 0 {
                    warn!("shutdown drain timed out with {active} sessions still active");
                }
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let snapshot = self.metrics.snapshot();
        info!("final metrics: {:?}", snapshot);
    }
}
