//! External reference errors

use thiserror::Error;

/// Errors that can occur while resolving an external reference
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalReferenceError {
    /// No runtime function is registered under this id
    #[error("Unknown runtime function id: {0}")]
    UnknownRuntimeFunction(u32),

    /// No builtin is registered under this id
    #[error("Unknown builtin id: {0}")]
    UnknownBuiltin(u32),

    /// No builtin is registered under this name
    #[error("Unknown builtin: {0}")]
    UnknownBuiltinName(String),

    /// No C function is registered under this id
    #[error("Unknown C function id: {0}")]
    UnknownCFunction(u32),

    /// Math exp constant index is outside the constant array
    #[error("Math exp constant index {index} out of range (len={len})")]
    MathExpConstantOutOfRange {
        /// Requested index
        index: usize,
        /// Number of constants
        len: usize,
    },

    /// Math exp tables were torn down (or never initialized)
    #[error("Math exp data is not initialized")]
    MathExpDataUnavailable,
}

/// Result type for external reference operations
pub type Result<T> = std::result::Result<T, ExternalReferenceError>;
