//! Error types for the flight software core
//!
//! A single uniform status enum is used across every subsystem so that error
//! codes can travel through telemetry, command acknowledgments and the event
//! log without translation layers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard result type for flight core operations
pub type Result<T> = core::result::Result<T, FswError>;

/// Uniform status codes for the flight core
///
/// Every fallible API in the core returns one of these kinds. The mapping
/// rules are fixed: invalid inputs at an API boundary yield
/// [`FswError::InvalidParam`] with no side effects, full fixed-capacity
/// tables yield [`FswError::NoMemory`], and an expired lock or queue wait
/// yields [`FswError::Timeout`] with the operation not committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FswError {
    /// Unspecified failure
    #[error("generic failure")]
    Generic,

    /// A blocking call expired before the resource became available
    #[error("operation timed out")]
    Timeout,

    /// An argument was outside its valid domain; nothing was changed
    #[error("invalid parameter")]
    InvalidParam,

    /// A fixed-capacity table or pool is full
    #[error("no memory in fixed pool")]
    NoMemory,

    /// The resource is held or the slot is already registered
    #[error("resource busy")]
    Busy,

    /// The service has not been initialized or synchronized yet
    #[error("not ready")]
    NotReady,

    /// Lookup failed
    #[error("not found")]
    NotFound,

    /// The operation is not allowed in the current state
    #[error("permission denied")]
    PermissionDenied,

    /// A CRC check failed
    #[error("CRC mismatch")]
    CrcMismatch,

    /// A buffer or counter would exceed its bound
    #[error("overflow")]
    Overflow,

    /// A buffer or counter would underrun
    #[error("underflow")]
    Underflow,

    /// A peripheral bus transaction failed
    #[error("bus error")]
    BusError,

    /// The hardware reported a fault
    #[error("hardware error")]
    HardwareError,
}

impl FswError {
    /// Check if the condition is worth retrying
    ///
    /// Transient resource pressure (timeouts, full tables, busy slots) may
    /// clear on its own; integrity and permission failures never do.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FswError::Timeout | FswError::NoMemory | FswError::Busy | FswError::NotReady
        )
    }

    /// Severity classification (0 = info, 1 = warning, 2 = error, 3 = critical)
    pub const fn severity(&self) -> u8 {
        match self {
            FswError::Timeout | FswError::Busy | FswError::NotReady => 1,
            FswError::Generic
            | FswError::InvalidParam
            | FswError::NoMemory
            | FswError::NotFound
            | FswError::PermissionDenied
            | FswError::CrcMismatch
            | FswError::Overflow
            | FswError::Underflow => 2,
            FswError::BusError | FswError::HardwareError => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_classification() {
        assert!(FswError::Timeout.is_recoverable());
        assert!(FswError::NoMemory.is_recoverable());
        assert!(!FswError::CrcMismatch.is_recoverable());
        assert!(!FswError::PermissionDenied.is_recoverable());
    }

    #[test]
    fn severity_ordering() {
        assert!(FswError::HardwareError.severity() > FswError::CrcMismatch.severity());
        assert!(FswError::CrcMismatch.severity() > FswError::Timeout.severity());
    }

    #[test]
    fn display_is_informative() {
        let text = format!("{}", FswError::CrcMismatch);
        assert!(text.contains("CRC"));
    }
}
