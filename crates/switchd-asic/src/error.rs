//! Driver adapter errors.

use thiserror::Error;

pub type AsicResult<T> = Result<T, AsicError>;

/// Failures reported by the driver adapter.
#[derive(Debug, Clone, Error)]
pub enum AsicError {
    /// The driver rejected a call with a status code.
    #[error("driver call {operation} failed with rc {rc}")]
    CallFailed { operation: String, rc: i32 },

    /// A table or resource limit was hit.
    #[error("driver resource exhausted: {resource}")]
    ResourceExhausted { resource: String },

    /// An id passed in does not name a live object.
    #[error("unknown driver object {oid:#x} in {operation}")]
    UnknownObject { operation: String, oid: u64 },

    /// An attribute is not available on this platform.
    #[error("attribute {attribute} unsupported on this platform")]
    UnsupportedAttribute { attribute: String },
}

impl AsicError {
    pub fn call(operation: impl Into<String>, rc: i32) -> Self {
        AsicError::CallFailed {
            operation: operation.into(),
            rc,
        }
    }

    pub fn exhausted(resource: impl Into<String>) -> Self {
        AsicError::ResourceExhausted {
            resource: resource.into(),
        }
    }

    /// Return code carried by the error, for error-DB rows.
    pub fn rc(&self) -> i32 {
        match self {
            AsicError::CallFailed { rc, .. } => *rc,
            AsicError::ResourceExhausted { .. } => -2,
            AsicError::UnknownObject { .. } => -5,
            AsicError::UnsupportedAttribute { .. } => -10,
        }
    }
}
