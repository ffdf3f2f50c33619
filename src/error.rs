use thiserror::Error;

/// Errors raised by the ledger gateway adapter.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The gateway was unreachable or the call timed out. Safe to retry.
    #[error("ledger gateway unreachable: {0}")]
    Transport(String),

    /// The ledger itself refused the call, e.g. contract-level validation.
    #[error("ledger rejected the call: {0}")]
    Rejected(String),

    #[error("record not found on the ledger: {0}")]
    NotFound(String),

    #[error("malformed gateway response: {0}")]
    Malformed(String),

    #[error("invalid content address: {0}")]
    InvalidAddress(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(value: reqwest::Error) -> Self {
        LedgerError::Transport(value.to_string())
    }
}

/// Errors raised by the container-runtime adapter. All of these mean the
/// call never produced an answer; a runtime that answered with an error
/// status is reported through the outcome types, not here.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("container runtime unreachable: {0}")]
    Transport(String),

    #[error("malformed container runtime response: {0}")]
    Malformed(String),
}

impl RunnerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RunnerError::Transport(_))
    }
}

impl From<reqwest::Error> for RunnerError {
    fn from(value: reqwest::Error) -> Self {
        RunnerError::Transport(value.to_string())
    }
}
