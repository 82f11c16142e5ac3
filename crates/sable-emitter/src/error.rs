//! Compilation errors

use thiserror::Error;

/// Compilation errors. Lowering failures are compile-time faults carrying
/// the offending source location.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Parse error (passed through from the parser)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Syntax error with location
    #[error("Syntax error at {location}: {message}")]
    Syntax {
        /// Error message
        message: String,
        /// Source location (`line:column` or byte offset)
        location: String,
    },

    /// Construct the emitter cannot lower
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),

    /// Too many local variables
    #[error("Too many local variables (max 65535)")]
    TooManyLocals,

    /// Too many registers in one function
    #[error("Too many registers")]
    TooManyRegisters,

    /// Invalid assignment target
    #[error("Invalid assignment target")]
    InvalidAssignmentTarget,

    /// Write to a readonly property outside its declaring constructor
    #[error("Cannot assign to '{property}' because it is a read-only property")]
    ReadonlyAssignment {
        /// The property name
        property: String,
    },
}

impl CompileError {
    /// Create a syntax error at a byte offset
    pub fn syntax(message: impl Into<String>, offset: u32) -> Self {
        Self::Syntax {
            message: message.into(),
            location: format!("@{offset}"),
        }
    }

    /// Create an unsupported-construct error
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported(feature.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
