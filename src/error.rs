use thiserror::Error;

/// Core error kinds (§7). Transport and naming-miss errors are almost always
/// caught and logged at the call site rather than propagated; `CoreError` exists
/// for the handful of places that need to distinguish them programmatically
/// (e.g. converting to a `tonic::Status` at an RPC boundary).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transport error reaching {address}: {source}")]
    Transport {
        address: String,
        #[source]
        source: tonic::Status,
    },

    #[error("name {0:?} not found in the name directory")]
    NamingMiss(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<CoreError> for tonic::Status {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(msg) => tonic::Status::invalid_argument(msg),
            CoreError::InvariantViolation(msg) => tonic::Status::failed_precondition(msg),
            CoreError::NamingMiss(name) => tonic::Status::not_found(name),
            CoreError::Transport { address, source } => {
                tonic::Status::unavailable(format!("{address}: {source}"))
            }
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
