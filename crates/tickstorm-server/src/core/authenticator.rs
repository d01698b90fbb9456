use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use std::collections::HashMap;
use tickstorm_proto::{decode_payload, AuthRequest, FrameType};
use uuid::Uuid;

use super::errors::AuthError;
use super::rate_limiter::{RateDecision, RateLimiter};

/// Outcome of one authentication attempt, mirroring spec.md's
/// `{OK, InvalidCredentials, AlreadyAuthenticated, RateLimited,
/// MalformedPayload}` set.
pub enum AuthOutcome {
    Ok(Uuid),
    Rejected(AuthError),
}

/// Shared credential snapshot plus the live-session token map. Credentials
/// are loaded once at startup (`Config::from_env`) and never rotated at
/// runtime.
pub struct Authenticator {
    username: String,
    password: String,
    rate_limiter: Arc<RateLimiter>,
    sessions: RwLock<HashMap<Uuid, Instant>>,
}

impl Authenticator {
    pub fn new(username: String, password: String, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { username, password, rate_limiter, sessions: RwLock::new(HashMap::new()) }
    }

    /// The first frame on a connection must be `AUTH`; anything else is a
    /// protocol violation handled by the caller, not by this module.
    pub fn is_auth_frame(frame_type: FrameType) -> bool {
        matches!(frame_type, FrameType::Auth)
    }

    /// Checks the rate limiter before touching credentials (ordering is
    /// part of the contract: a blocked source never reaches the credential
    /// comparison), then validates the parsed payload.
    pub fn authenticate(
        &self,
        source_ip: IpAddr,
        already_authenticated: bool,
        payload: &[u8],
    ) -> AuthOutcome {
        if self.rate_limiter.check(source_ip) == RateDecision::RateLimited {
            return AuthOutcome::Rejected(AuthError::RateLimited);
        }

        if already_authenticated {
            return AuthOutcome::Rejected(AuthError::AlreadyAuthenticated);
        }

        let request: AuthRequest = match decode_payload(payload) {
            Ok(request) => request,
            Err(err) => return AuthOutcome::Rejected(AuthError::MalformedPayload(err.to_string())),
        };

        if request.username == self.username && request.password == self.password {
            self.rate_limiter.reset(source_ip);
            AuthOutcome::Ok(self.register_session())
        } else {
            AuthOutcome::Rejected(AuthError::InvalidCredentials)
        }
    }

    fn register_session(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.write().insert(id, Instant::now());
        id
    }

    pub fn revoke(&self, id: Uuid) {
        self.sessions.write().remove(&id);
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }
}
