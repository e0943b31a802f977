//! Result and error types for code generation.
//!
//! Allocation failure is not represented here: the global allocator aborts,
//! so an out-of-memory condition never reaches a caller as a status.

use core::fmt;

/// A code generation error.
///
/// Every fallible operation in the library reports one of these. The
/// `Context` additionally records the code and message of the most recent
/// error so callers using it as a session object can retrieve them later.
#[derive(Debug)]
pub enum CodegenError {
    /// A caller handed in a malformed or inconsistent argument; the message
    /// names the offending operation and operand.
    InvalidArgument(String),

    /// The structural verifier rejected a function before lowering.
    Verifier(String),

    /// Writing the output file failed.
    Io(std::io::Error),

    /// Code generation was requested without an architecture selected.
    NoBackend,

    /// The requested feature is not lowered on the current backend.
    Unsupported(String),

    /// An internal invariant was violated, e.g. an instruction was inserted
    /// with no active block.
    Internal(String),
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error.
pub type CodegenResult<T> = Result<T, CodegenError>;

/// Discriminant of a `CodegenError`, for callers that only track the kind.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ErrorCode {
    InvalidArgument,
    Verifier,
    Io,
    NoBackend,
    Unsupported,
    Internal,
}

impl CodegenError {
    /// The error code corresponding to this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Verifier(_) => ErrorCode::Verifier,
            Self::Io(_) => ErrorCode::Io,
            Self::NoBackend => ErrorCode::NoBackend,
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Verifier(msg) => write!(f, "verifier error: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::NoBackend => write!(f, "no architecture selected"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for CodegenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CodegenError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
