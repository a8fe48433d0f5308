use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VigilError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Trustee '{0}' has not accepted the designation")]
    NotAccepted(String),

    #[error("Cycle '{0}' is not the current verification cycle")]
    StaleCycle(String),

    #[error("Not eligible for release: {0}")]
    NotEligible(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl VigilError {
    /// Whether a caller may retry the same request after re-reading state.
    ///
    /// `NotAccepted` and `StaleCycle` reject an action against an enrollment or
    /// cycle that has since moved on; the caller can refresh and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotAccepted(_) | Self::StaleCycle(_) | Self::Storage(_) | Self::LockError(_)
        )
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::NotAccepted(_) => "not_accepted",
            Self::StaleCycle(_) => "stale_cycle",
            Self::NotEligible(_) => "not_eligible",
            Self::Validation(_) => "validation_error",
            Self::Forbidden(_) => "forbidden",
            Self::Storage(_) => "storage_error",
            Self::LockError(_) => "lock_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;

impl<T> From<std::sync::PoisonError<T>> for VigilError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for VigilError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
