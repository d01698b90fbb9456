mod acceptor;
mod authenticator;
mod delivery;
mod errors;
mod heartbeat;
mod port_scan;
mod producer;
mod rate_limiter;
mod session;
mod subscription;

pub use acceptor::Supervisor;
pub use authenticator::{AuthOutcome, Authenticator};
pub use delivery::{Batcher, OverflowPolicy};
pub use errors::{AuthError, ProtocolError, SessionError};
pub use heartbeat::HeartbeatMonitor;
pub use port_scan::PortScanDetector;
pub use producer::{ClockTickProducer, TickProducer};
pub use rate_limiter::{RateDecision, RateLimiter};
pub use session::{run_session, SessionContext};
pub use subscription::Subscription;
