//! Caster error kinds
//!
//! Every error that can surface at a connection boundary maps to exactly one
//! of these kinds; the dispatcher (`dispatcher.rs`) is the only place that
//! translates a kind into a dialect-specific wire response.

use std::io;

/// Caster-wide error kinds (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum CasterError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: mount {0} already has a producer")]
    Conflict(String),

    #[error("upstream gone: {0}")]
    UpstreamGone(String),

    #[error("slow consumer dropped")]
    SlowConsumer,

    #[error("backpressure overflow")]
    BackpressureOverflow,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl CasterError {
    /// The HTTP-ish status code a dialect response should carry for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            CasterError::BadRequest(_) => 400,
            CasterError::Unauthorized => 401,
            CasterError::Forbidden(_) => 403,
            CasterError::NotFound(_) => 404,
            CasterError::Conflict(_) => 409,
            CasterError::UpstreamGone(_) => 410,
            CasterError::SlowConsumer => 408,
            CasterError::BackpressureOverflow => 429,
            CasterError::Internal(_) | CasterError::Io(_) => 500,
        }
    }

    /// Short reason phrase used in both V10 `ERROR <code> <reason>` lines and
    /// HTTP status lines.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            CasterError::BadRequest(_) => "Bad Request",
            CasterError::Unauthorized => "Unauthorized",
            CasterError::Forbidden(_) => "Forbidden",
            CasterError::NotFound(_) => "Not Found",
            CasterError::Conflict(_) => "Conflict",
            CasterError::UpstreamGone(_) => "Gone",
            CasterError::SlowConsumer => "Request Timeout",
            CasterError::BackpressureOverflow => "Too Many Requests",
            CasterError::Internal(_) | CasterError::Io(_) => "Internal Server Error",
        }
    }
}

/// Credential verification failures (spec §4.1), distinguished so the
/// dispatcher can choose the right challenge without string-matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no such mount")]
    NoSuchMount,
    #[error("no such user")]
    NoSuchUser,
    #[error("bad user password")]
    BadUserPassword,
    #[error("bad mount password")]
    BadMountPassword,
    #[error("not authorized")]
    NotAuthorized,
}

impl From<AuthError> for CasterError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NoSuchMount => CasterError::NotFound("mount".into()),
            AuthError::NotAuthorized => CasterError::Forbidden(e.to_string()),
            _ => CasterError::Unauthorized,
        }
    }
}
