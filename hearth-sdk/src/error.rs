//! Errors raised at the platform boundary.

/// A remote call to the platform failed.
///
/// Callers log these with context; lifecycle state is never rolled back
/// because of one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("{op} failed: {reason}")]
    Request { op: &'static str, reason: String },
    #[error("{op} timed out")]
    Timeout { op: &'static str },
    #[error("Platform bridge disconnected")]
    Disconnected,
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl PlatformError {
    pub fn request(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Request {
            op,
            reason: reason.into(),
        }
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;
