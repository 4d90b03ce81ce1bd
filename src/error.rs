//! Unified error handling for SteerForge
//!
//! This module provides a crate-level error type consolidating the
//! domain-specific errors (ICM pool, logging) behind one enum, plus a
//! categorization scheme higher layers use to decide whether a failure is
//! retryable, a configuration problem, or a bug.

use thiserror::Error;

use crate::icm::IcmError;
use crate::logging::LoggingError;

/// Unified error type for SteerForge
#[derive(Debug, Error)]
pub enum SteerForgeError {
    /// ICM pool error (allocation, reclamation, sync)
    #[error(transparent)]
    Icm(#[from] IcmError),

    /// Logging initialization error
    #[error(transparent)]
    Logging(#[from] LoggingError),
}

impl SteerForgeError {
    /// Categorize the error for handling decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SteerForgeError::Icm(err) => match err {
                // Transient device-side conditions; retry after a sync or
                // once device memory frees up.
                IcmError::OutOfMemory(_)
                | IcmError::SyncFailure(_)
                | IcmError::MetadataAllocation(_) => ErrorCategory::Recoverable,

                // Configuration problems the caller must fix.
                IcmError::PoolExhausted { .. } | IcmError::InvalidConfiguration(_) => {
                    ErrorCategory::User
                }

                IcmError::LockPoisoned(_) => ErrorCategory::Internal,
            },
            SteerForgeError::Logging(_) => ErrorCategory::User,
        }
    }

    /// Whether the caller may retry the failed operation later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Recoverable)
    }

    /// Whether the error indicates invalid input or configuration.
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }
}

/// Error category for handling decisions
///
/// - User: invalid input or configuration, fix the request
/// - Recoverable: temporary condition, retry after waiting
/// - Internal: a bug, report it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    User,
    Recoverable,
    Internal,
}

/// A `Result` type using [`SteerForgeError`].
pub type SteerForgeResult<T> = Result<T, SteerForgeError>;
