//! Runtime error taxonomy.
//!
//! [`RuntimeExCode`] is the closed enum of trap codes surfaced to programs.
//! A [`RuntimeError`] pairs a code with a message; job failures are wrapped
//! in `QueueExecution` together with the offending job id and surface at
//! `Drain`. An empty call stack is fatal.

use thiserror::Error;

/// Closed set of runtime trap codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum RuntimeExCode {
    InvalidArgumentType = 5,
    TypeError = 6,
    InvalidReferenceImplementation = 7,
    DivisionByZero = 8,
    WhileCallbackTypeInvalid = 9,
    WithCallbackTypeInvalid = 10,
    EnumIndexOutOfBounds = 11,
    EnumerateCallbackTypeInvalid = 12,
    FnParamOutsideCall = 13,
    ReturnOutsideCall = 14,
    InvalidMapKey = 15,
    InvalidAssignEval = 16,
    StreamNotOpen = 17,
    StreamEmpty = 18,
    ResumeOutsideExHandler = 19,
    AttemptedCloneOfNonReplicableResource = 20,
    InvalidValueTypeForEnum = 21,
    InvalidPrivilegedResourceOperation = 22,
    RepublishExistingResource = 23,
    InvalidOrMissingFilePath = 24,
    InvalidExceptionHandlerType = 25,
    AcquireLockMaxAttemptsExceeded = 26,
}

/// A trap raised during execution.
#[derive(Debug, Clone, Error)]
#[error("Runtime error: {message} (RuntimeExCode({code:?}, code: {}))", *code as usize)]
pub struct RuntimeError {
    pub code: RuntimeExCode,
    pub message: String,
}

impl RuntimeError {
    pub fn new(code: RuntimeExCode, message: impl Into<String>) -> Self {
        RuntimeError {
            code,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the virtual machine.
#[derive(Debug, Clone, Error)]
pub enum VmError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A queued job failed; reported when its context is drained.
    #[error("queue job {job_id} failed: {cause}")]
    QueueExecution { job_id: u64, cause: RuntimeError },

    /// A return executed with no call frame to return to.
    #[error("empty call stack")]
    EmptyCallStack,

    /// Invariant violations in the loaded program or the VM itself.
    #[error("vm internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_codes_are_stable() {
        assert_eq!(RuntimeExCode::InvalidArgumentType as usize, 5);
        assert_eq!(RuntimeExCode::DivisionByZero as usize, 8);
        assert_eq!(RuntimeExCode::AcquireLockMaxAttemptsExceeded as usize, 26);
    }

    #[test]
    fn display_includes_code() {
        let e = RuntimeError::new(RuntimeExCode::DivisionByZero, "1 / 0");
        assert!(e.to_string().contains("code: 8"));
    }
}
