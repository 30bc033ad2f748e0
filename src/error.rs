use thiserror::Error;

/// Errors surfaced by the stock ledger.
///
/// Store failures are wrapped with the name of the operation that failed and
/// returned unchanged. Mapping to a protocol status code is left to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A lookup matched zero rows.
    #[error("not found")]
    NotFound,

    /// A unique key was already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Input rejected before reaching the store.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{op}: {message}")]
    Internal { op: &'static str, message: String },

    /// The store did not answer a liveness probe.
    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    /// The request deadline elapsed; the transaction was rolled back.
    #[error("{0}: deadline exceeded")]
    Timeout(&'static str),
}

impl Error {
    pub(crate) fn internal(op: &'static str, message: impl Into<String>) -> Self {
        Self::Internal {
            op,
            message: message.into(),
        }
    }
}
