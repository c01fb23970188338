//! Error type.
//!
//! This is the shared error type for the whole crate. Link and compile
//! failures are deliberately absent: those are recorded in shader/program
//! info-logs and queried by the guest, never raised.

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    // handle errors
    #[error("stale or out-of-range handle")]
    InvalidHandle,

    // state errors
    #[error("no buffer bound to target")]
    NoBufferBound,
    #[error("no texture bound to target")]
    NoTextureBound,
    #[error("no program in use")]
    NoProgramBound,
    #[error("buffer already has a different usage for this target")]
    WrongTarget,
    #[error("invalid enum value {0:#x}")]
    InvalidEnum(u32),
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    // resource errors
    #[error("table at capacity")]
    AtCapacity,
    #[error("staging pool out of memory ({0} bytes requested)")]
    OutOfMemory(usize),
    #[error("{0} too large")]
    TooLarge(&'static str),

    // translator errors
    #[error("shader source line too long")]
    LineTooLong,
    #[error("too many uniforms")]
    TooManyUniforms,
    #[error("too many samplers")]
    TooManySamplers,
    #[error("uniform array too large: {0}")]
    UniformArrayTooLarge(String),
    #[error("unsupported uniform array element type: {0}")]
    UnsupportedArrayType(String),
    #[error("uniform name too long")]
    UniformNameTooLong,

    // backend errors
    #[error("backend call failed: {0}")]
    BackendFailed(&'static str),

    // argument errors from the script bridge
    #[error("expected {expected} arguments, got {got}")]
    WrongArity { expected: usize, got: usize },
    #[error("argument {index}: expected {expected}")]
    WrongType {
        index: usize,
        expected: &'static str,
    },
}

impl Error {
    /// Whether the bridge should surface this to the guest as a type-error
    /// (handle/state/argument errors) rather than an internal-error
    /// (resource exhaustion, backend failures).
    pub fn is_type_error(&self) -> bool {
        match self {
            Error::InvalidHandle
            | Error::NoBufferBound
            | Error::NoTextureBound
            | Error::NoProgramBound
            | Error::WrongTarget
            | Error::InvalidEnum(_)
            | Error::InvalidValue(_)
            | Error::WrongArity { .. }
            | Error::WrongType { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
