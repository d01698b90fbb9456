use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::{Authenticator, RateLimiter, TickProducer};
use crate::metrics::Metrics;

/// Resources shared across the whole process: the authenticator's
/// credential snapshot + auth rate limiter, the atomic metrics block, and
/// the root cancellation token every session derives a child from.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub authenticator: Arc<Authenticator>,
    pub auth_rate_limiter: Arc<RateLimiter>,
    pub producer: Arc<dyn TickProducer>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, producer: Arc<dyn TickProducer>) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());
        let auth_rate_limiter =
            Arc::new(RateLimiter::new(config.auth_max_attempts, config.auth_rate_limit_window));
        let authenticator = Arc::new(Authenticator::new(
            config.stream_user.clone(),
            config.stream_pass.clone(),
            auth_rate_limiter.clone(),
        ));

        Self {
            config,
            metrics,
            authenticator,
            auth_rate_limiter,
            producer,
            shutdown: CancellationToken::new(),
        }
    }
}
