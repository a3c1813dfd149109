//! Loader error taxonomy and its errno mapping.

use std::io;

/// Linux errno values surfaced by the loader.
pub mod errno {
    /// I/O error.
    pub const EIO: i32 = 5;
    /// Exec format error.
    pub const ENOEXEC: i32 = 8;
    /// Permission denied.
    pub const EACCES: i32 = 13;
    /// Bad address.
    pub const EFAULT: i32 = 14;
    /// Too many levels of symbolic links (or interpreter indirections).
    pub const ELOOP: i32 = 40;
}

/// Error reported by an external format handler.
///
/// Passed through to the loader's caller verbatim, wrapped in
/// [`ExecError::Format`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FormatError {
    /// Positive errno describing the failure.
    pub errno: i32,
    /// Human-readable description.
    pub message: String,
}

impl FormatError {
    /// Creates a handler error with the given errno.
    pub fn new(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
        }
    }
}

/// Errors that can occur while loading a guest executable.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The candidate file could not be stat'ed.
    #[error("cannot stat executable: {0}")]
    NotAccessible(#[source] io::Error),
    /// The candidate is not a regular file or has no execute bit.
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),
    /// No handler recognised the header.
    #[error("exec format error")]
    NotExecutable,
    /// The `#!` line names no usable interpreter.
    #[error("malformed interpreter line: {0}")]
    MalformedInterpreterLine(&'static str),
    /// The interpreter named on the `#!` line could not be opened.
    #[error("cannot open interpreter {path}: {source}")]
    InterpreterNotFound {
        /// Interpreter path as written on the `#!` line.
        path: String,
        /// Underlying open failure.
        #[source]
        source: io::Error,
    },
    /// The `#!` chain is deeper than the loader allows.
    #[error("too many levels of interpreter indirection")]
    TooManyIndirections,
    /// Reading the executable header failed.
    #[error("I/O error reading executable: {0}")]
    Io(#[source] io::Error),
    /// A guest memory write failed.
    #[error("guest write fault at {addr:#x}")]
    Fault {
        /// Guest address of the failed access.
        addr: u64,
    },
    /// A format handler rejected the image.
    #[error("{format} loader: {error}")]
    Format {
        /// Name of the handler that failed.
        format: &'static str,
        /// The handler's own error.
        #[source]
        error: FormatError,
    },
}

impl ExecError {
    /// Returns the positive errno for this error.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotAccessible(e) => e.raw_os_error().unwrap_or(errno::EACCES),
            Self::PermissionDenied(_) => errno::EACCES,
            Self::NotExecutable
            | Self::MalformedInterpreterLine(_)
            | Self::InterpreterNotFound { .. } => errno::ENOEXEC,
            Self::TooManyIndirections => errno::ELOOP,
            Self::Io(_) => errno::EIO,
            Self::Fault { .. } => errno::EFAULT,
            Self::Format { error, .. } => error.errno,
        }
    }

    /// Returns the signed result code (`-errno`) reported to the guest.
    #[must_use]
    pub fn to_result_code(&self) -> i64 {
        -i64::from(self.errno())
    }
}
