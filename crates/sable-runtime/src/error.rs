//! VM error types

use crate::value::Value;
use thiserror::Error;

/// VM execution errors.
///
/// Every variant except `Exit` participates in user `try/catch`: the
/// unwinding machinery converts the error into a catchable value (an error
/// object for the named kinds, the thrown value itself for `Thrown`).
#[derive(Debug, Error)]
pub enum VmError {
    /// Type error (e.g. calling a non-function)
    #[error("TypeError: {0}")]
    Type(String),

    /// Reference error (unresolved identifier)
    #[error("ReferenceError: {0}")]
    Reference(String),

    /// Range error (e.g. invalid repeat count)
    #[error("RangeError: {0}")]
    Range(String),

    /// Syntax error surfacing at runtime (JSON.parse, RegExp)
    #[error("SyntaxError: {0}")]
    Syntax(String),

    /// Host helper failure carrying an error code (ENOENT, EACCES, …)
    #[error("{code}: {message}")]
    Host {
        /// Machine-readable code
        code: String,
        /// Human-readable description
        message: String,
    },

    /// Value thrown by user code (`throw` statement, promise rejection)
    #[error("Uncaught {0:?}")]
    Thrown(Value),

    /// Internal invariant violation
    #[error("InternalError: {0}")]
    Internal(String),

    /// Recursion limit
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// `process.exit(code)` — never caught by user code
    #[error("exit {0}")]
    Exit(i32),

    /// Malformed bytecode
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] sable_bytecode::BytecodeError),
}

impl VmError {
    /// Shorthand for a TypeError
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }

    /// Shorthand for a RangeError
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::Range(msg.into())
    }

    /// Whether user `try/catch` may observe this error
    pub fn is_catchable(&self) -> bool {
        !matches!(self, Self::Exit(_))
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
