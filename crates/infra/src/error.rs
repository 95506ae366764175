//! Errors surfaced by the engine and its services.

use thiserror::Error;

use motoshop_core::DomainError;

use crate::store::StoreError;

/// Coarse error category for callers (presentation layer, retry logic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidOrderState,
    InsufficientStock,
    Validation,
    InvalidArgument,
    /// Lock timeout, deadlock, lost connection: the operation may be retried.
    Transient,
    Internal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Domain(err) => match err {
                DomainError::NotFound(_) => ErrorKind::NotFound,
                DomainError::InvalidOrderState(_) => ErrorKind::InvalidOrderState,
                DomainError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
                DomainError::Validation(_) => ErrorKind::Validation,
                DomainError::InvalidArgument(_) | DomainError::InvalidId(_) => {
                    ErrorKind::InvalidArgument
                }
                DomainError::InvariantViolation(_) => ErrorKind::Internal,
            },
            EngineError::Store(err) if err.is_transient() => ErrorKind::Transient,
            EngineError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Only transient infrastructure failures are worth retrying; business
    /// errors fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Business rule rejections (as opposed to infrastructure faults).
    pub fn is_business(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Transient | ErrorKind::Internal)
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(err) => Some(err),
            EngineError::Store(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motoshop_core::ProductId;

    #[test]
    fn business_errors_are_not_retryable() {
        let err = EngineError::from(DomainError::insufficient_stock(ProductId::new(), 5, 8));
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert!(err.is_business());
        assert!(!err.is_retryable());
    }

    #[test]
    fn lock_timeouts_are_retryable() {
        let err = EngineError::from(StoreError::LockTimeout("product".to_string()));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());
        assert!(!err.is_business());
    }

    #[test]
    fn corrupt_rows_are_internal() {
        let err = EngineError::from(StoreError::Corrupt("bad status".to_string()));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.is_retryable());
    }
}
