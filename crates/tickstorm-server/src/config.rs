use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tickstorm_helpers::de::parse_duration_ms;

/// Server configuration, assembled once at startup from the process
/// environment and held immutably for the life of the process — config
/// rotation at runtime is an explicit non-goal. Unknown environment
/// variables are ignored; recognized keys fall back to documented
/// defaults when unset.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub max_connections: usize,
    pub max_msg_size: u32,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout: Duration,
    pub batch_window: Duration,
    pub max_batch_size: usize,
    pub max_write_queue_size: usize,
    pub write_deadline: Duration,
    pub read_timeout: Duration,
    pub tcp_read_buffer_size: usize,
    pub tcp_write_buffer_size: usize,
    pub stream_user: String,
    pub stream_pass: String,
    pub auth_max_attempts: u32,
    pub auth_rate_limit_window: Duration,
    pub shutdown_timeout: Duration,
    pub max_connections_per_ip: usize,
    pub max_new_connections_per_ip_per_sec: u32,
    pub port_scan_distinct_ports: usize,
    pub port_scan_window: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            listen_addr: env_parse("LISTEN_ADDR", "0.0.0.0:8080")?,
            max_connections: env_parse("MAX_CONNECTIONS", 100_000)?,
            max_msg_size: env_parse("MAX_MSG_SIZE", 65_536)?,
            heartbeat_interval_ms: env_duration_ms("HEARTBEAT_INTERVAL_MS", 15_000)?
                .as_millis() as u64,
            heartbeat_timeout: env_duration_ms("HEARTBEAT_TIMEOUT_MS", 20_000)?,
            batch_window: env_duration_ms("BATCH_WINDOW_MS", 5)?,
            max_batch_size: env_parse("MAX_BATCH_SIZE", 100)?,
            max_write_queue_size: env_parse("MAX_WRITE_QUEUE_SIZE", 1_000)?,
            write_deadline: env_duration_ms("WRITE_DEADLINE_MS", 5_000)?,
            read_timeout: env_duration_ms("READ_TIMEOUT_MS", 30_000)?,
            tcp_read_buffer_size: env_parse("TCP_READ_BUFFER_SIZE", 65_536)?,
            tcp_write_buffer_size: env_parse("TCP_WRITE_BUFFER_SIZE", 65_536)?,
            stream_user: non_empty_env("STREAM_USER")
                .context("STREAM_USER is required")?,
            stream_pass: non_empty_env("STREAM_PASS")
                .context("STREAM_PASS is required")?,
            auth_max_attempts: env_parse("AUTH_MAX_ATTEMPTS", 3)?,
            auth_rate_limit_window: env_duration_ms("AUTH_RATE_LIMIT_WINDOW_MS", 60_000)?,
            shutdown_timeout: env_duration_ms("SHUTDOWN_TIMEOUT_MS", 30_000)?,
            max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP", 1_000)?,
            max_new_connections_per_ip_per_sec: env_parse(
                "MAX_NEW_CONNECTIONS_PER_IP_PER_SEC",
                50,
            )?,
            port_scan_distinct_ports: env_parse("PORT_SCAN_DISTINCT_PORTS", 20)?,
            port_scan_window: env_duration_ms("PORT_SCAN_WINDOW_MS", 10_000)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_msg_size == 0 {
            bail!("MAX_MSG_SIZE must be greater than zero");
        }
        if self.max_batch_size == 0 {
            bail!("MAX_BATCH_SIZE must be greater than zero");
        }
        if self.max_write_queue_size == 0 {
            bail!("MAX_WRITE_QUEUE_SIZE must be greater than zero");
        }
        if self.auth_max_attempts == 0 {
            bail!("AUTH_MAX_ATTEMPTS must be greater than zero");
        }
        if self.stream_user.is_empty() || self.stream_pass.is_empty() {
            bail!("STREAM_USER and STREAM_PASS must not be empty");
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    })
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match non_empty_env(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("invalid value for {key}={raw:?}: {err}")),
    }
}

fn env_duration_ms(key: &str, default_ms: u64) -> Result<Duration> {
    match non_empty_env(key) {
        None => Ok(Duration::from_millis(default_ms)),
        Some(raw) => parse_duration_ms(&raw)
            .with_context(|| format!("invalid duration for {key}={raw:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_tickstorm_env() {
        for key in [
            "LISTEN_ADDR", "MAX_CONNECTIONS", "MAX_MSG_SIZE", "HEARTBEAT_INTERVAL_MS",
            "HEARTBEAT_TIMEOUT_MS", "BATCH_WINDOW_MS", "MAX_BATCH_SIZE",
            "MAX_WRITE_QUEUE_SIZE", "WRITE_DEADLINE_MS", "READ_TIMEOUT_MS",
            "TCP_READ_BUFFER_SIZE", "TCP_WRITE_BUFFER_SIZE", "STREAM_USER", "STREAM_PASS",
            "AUTH_MAX_ATTEMPTS", "AUTH_RATE_LIMIT_WINDOW_MS", "SHUTDOWN_TIMEOUT_MS",
            "MAX_CONNECTIONS_PER_IP", "MAX_NEW_CONNECTIONS_PER_IP_PER_SEC",
            "PORT_SCAN_DISTINCT_PORTS", "PORT_SCAN_WINDOW_MS",
        ] {
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    fn missing_credentials_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_tickstorm_env();
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("STREAM_USER"));
    }

    #[test]
    fn defaults_apply_when_only_credentials_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_tickstorm_env();
        unsafe {
            env::set_var("STREAM_USER", "user1");
            env::set_var("STREAM_PASS", "pw1");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.max_connections, 100_000);
        assert_eq!(config.max_msg_size, 65_536);
        assert_eq!(config.batch_window, Duration::from_millis(5));
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(20));
        clear_tickstorm_env();
    }

    #[test]
    fn humantime_duration_strings_are_accepted() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_tickstorm_env();
        unsafe {
            env::set_var("STREAM_USER", "user1");
            env::set_var("STREAM_PASS", "pw1");
            env::set_var("HEARTBEAT_TIMEOUT_MS", "20s");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(20));
        clear_tickstorm_env();
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_tickstorm_env();
        unsafe {
            env::set_var("STREAM_USER", "user1");
            env::set_var("STREAM_PASS", "pw1");
            env::set_var("MAX_BATCH_SIZE", "0");
        }
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("MAX_BATCH_SIZE"));
        clear_tickstorm_env();
    }
}
