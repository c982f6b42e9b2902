use chrono::Duration;
use std::str::FromStr;

pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
pub const DEFAULT_VERIFICATION_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const DEFAULT_PASSWORD_RESET_TTL_SECONDS: i64 = 60 * 60;
pub const DEFAULT_REPLAY_GRACE_SECONDS: i64 = 10;
pub const DEFAULT_RETENTION_SECONDS: i64 = 30 * 24 * 60 * 60;
/// Upper bound for every lifetime, grace and retention setting (ten years).
pub const MAX_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

fn bounded(seconds: i64) -> i64 {
    seconds.clamp(0, MAX_LIFETIME_SECONDS)
}

/// What to do when an already revoked refresh token is presented again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplayResponse {
    /// Refuse the request and leave other credentials alone.
    #[default]
    Reject,
    /// Refuse the request and revoke every credential of the owner.
    RevokeAll,
}

impl ReplayResponse {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::RevokeAll => "revoke-all",
        }
    }
}

impl FromStr for ReplayResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(Self::Reject),
            "revoke-all" => Ok(Self::RevokeAll),
            other => Err(format!("unknown replay response: {other}")),
        }
    }
}

/// Engine policy. Setters clamp into range, so every derived duration and
/// `now + ttl` stays representable.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    verification_ttl_seconds: i64,
    password_reset_ttl_seconds: i64,
    require_verified_email: bool,
    replay_response: ReplayResponse,
    replay_grace_seconds: i64,
    retention_seconds: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            verification_ttl_seconds: DEFAULT_VERIFICATION_TTL_SECONDS,
            password_reset_ttl_seconds: DEFAULT_PASSWORD_RESET_TTL_SECONDS,
            require_verified_email: false,
            replay_response: ReplayResponse::Reject,
            replay_grace_seconds: DEFAULT_REPLAY_GRACE_SECONDS,
            retention_seconds: DEFAULT_RETENTION_SECONDS,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = bounded(seconds);
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = bounded(seconds);
        self
    }

    #[must_use]
    pub fn with_verification_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_ttl_seconds = bounded(seconds);
        self
    }

    #[must_use]
    pub fn with_password_reset_ttl_seconds(mut self, seconds: i64) -> Self {
        self.password_reset_ttl_seconds = bounded(seconds);
        self
    }

    #[must_use]
    pub fn with_require_verified_email(mut self, require: bool) -> Self {
        self.require_verified_email = require;
        self
    }

    #[must_use]
    pub fn with_replay_response(mut self, response: ReplayResponse) -> Self {
        self.replay_response = response;
        self
    }

    #[must_use]
    pub fn with_replay_grace_seconds(mut self, seconds: i64) -> Self {
        self.replay_grace_seconds = bounded(seconds);
        self
    }

    #[must_use]
    pub fn with_retention_seconds(mut self, seconds: i64) -> Self {
        self.retention_seconds = bounded(seconds);
        self
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        Duration::seconds(self.access_ttl_seconds)
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_ttl_seconds)
    }

    #[must_use]
    pub fn verification_ttl(&self) -> Duration {
        Duration::seconds(self.verification_ttl_seconds)
    }

    #[must_use]
    pub fn password_reset_ttl(&self) -> Duration {
        Duration::seconds(self.password_reset_ttl_seconds)
    }

    #[must_use]
    pub fn require_verified_email(&self) -> bool {
        self.require_verified_email
    }

    #[must_use]
    pub fn replay_response(&self) -> ReplayResponse {
        self.replay_response
    }

    #[must_use]
    pub fn replay_grace(&self) -> Duration {
        Duration::seconds(self.replay_grace_seconds)
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::seconds(self.retention_seconds)
    }
}
