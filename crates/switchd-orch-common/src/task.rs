//! Apply outcomes and task errors.

use thiserror::Error;

/// Result of applying one pending entry.
///
/// This is the engine's whole contract with the apply hooks: `Done` retires
/// the entry, `Retry` keeps it pending for the next wake, `Error` drops it
/// after logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyOutcome {
    Done,
    Retry,
    Error,
}

impl ApplyOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, ApplyOutcome::Done)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, ApplyOutcome::Retry)
    }
}

/// Classified failure of an apply attempt.
///
/// The variants follow the dispositions of the error design: unmet
/// preconditions retry, malformed input is dropped, transient driver
/// failures retry once before escalating, capacity exhaustion is handled by
/// the temporary-group strategy and also retries.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("precondition not met: waiting for {dependency}")]
    PreconditionNotMet { dependency: String },

    #[error("malformed input: {message}")]
    MalformedInput { message: String },

    #[error("driver failure during {operation}: {message}")]
    DriverFailure { operation: String, message: String },

    #[error("capacity exhausted: {resource}")]
    CapacityExhausted { resource: String },

    #[error("kernel command failed: {message}")]
    KernelCommandFailed { message: String },

    #[error("unknown operation {op}")]
    UnknownOperation { op: String },
}

impl TaskError {
    pub fn precondition(dependency: impl Into<String>) -> Self {
        TaskError::PreconditionNotMet {
            dependency: dependency.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        TaskError::MalformedInput {
            message: message.into(),
        }
    }

    pub fn driver(operation: impl Into<String>, message: impl Into<String>) -> Self {
        TaskError::DriverFailure {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn capacity(resource: impl Into<String>) -> Self {
        TaskError::CapacityExhausted {
            resource: resource.into(),
        }
    }

    /// The outcome this error maps to under the error design.
    pub fn outcome(&self) -> ApplyOutcome {
        match self {
            TaskError::PreconditionNotMet { .. } => ApplyOutcome::Retry,
            TaskError::MalformedInput { .. } => ApplyOutcome::Error,
            TaskError::DriverFailure { .. } => ApplyOutcome::Retry,
            TaskError::CapacityExhausted { .. } => ApplyOutcome::Retry,
            TaskError::KernelCommandFailed { .. } => ApplyOutcome::Error,
            TaskError::UnknownOperation { .. } => ApplyOutcome::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_dispositions() {
        assert_eq!(
            TaskError::precondition("PORT_TABLE|Ethernet0").outcome(),
            ApplyOutcome::Retry
        );
        assert_eq!(
            TaskError::malformed("bad key").outcome(),
            ApplyOutcome::Error
        );
        assert_eq!(
            TaskError::driver("set_member", "rc=-2").outcome(),
            ApplyOutcome::Retry
        );
        assert_eq!(
            TaskError::capacity("ecmp groups").outcome(),
            ApplyOutcome::Retry
        );
    }
}
