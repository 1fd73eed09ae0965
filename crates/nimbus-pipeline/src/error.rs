//! Error taxonomy for pipeline operations.
//!
//! Three classes matter to callers: [`FsError::NotFound`] is the one error a
//! caching stage may convert into cached state (a tombstone);
//! [`FsError::AlreadyExists`] is produced locally by a stage that can answer a
//! conflict without consulting the backend; everything else is opaque and
//! must be propagated unchanged.

use std::io;

use thiserror::Error;

/// Error value shared by every pipeline operation.
#[derive(Debug, Error)]
pub enum FsError {
    /// The entity does not exist. The only error a cache is allowed to
    /// answer from its own state.
    #[error("entry not found: {path}")]
    NotFound {
        /// Relative path of the missing entry.
        path: String,
    },

    /// The target of a create already exists.
    #[error("entry already exists: {path}")]
    AlreadyExists {
        /// Relative path of the conflicting entry.
        path: String,
    },

    /// The operation requires a directory but the path is not one.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// Relative path of the offending entry.
        path: String,
    },

    /// A directory delete or rename hit a non-empty directory.
    #[error("directory not empty: {path}")]
    NotEmpty {
        /// Relative path of the directory.
        path: String,
    },

    /// A request that the pipeline cannot interpret.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Human-readable description of the problem.
        reason: String,
    },

    /// Local I/O error (staging files, copy targets).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Opaque backend failure, passed through verbatim.
    #[error("backend error: {message}")]
    Backend {
        /// Backend-provided description.
        message: String,
    },
}

impl FsError {
    /// Builds the distinguished not-found value for `path`.
    pub fn not_found(path: impl Into<String>) -> Self {
        FsError::NotFound { path: path.into() }
    }

    /// Builds the local already-exists value for `path`.
    pub fn already_exists(path: impl Into<String>) -> Self {
        FsError::AlreadyExists { path: path.into() }
    }

    /// Builds an opaque backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        FsError::Backend {
            message: message.into(),
        }
    }

    /// Whether this is the distinguished not-found value.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound { .. })
    }

    /// Converts this error to a libc error code for kernel-facing callers.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound { .. } => libc::ENOENT,
            FsError::AlreadyExists { .. } => libc::EEXIST,
            FsError::NotADirectory { .. } => libc::ENOTDIR,
            FsError::NotEmpty { .. } => libc::ENOTEMPTY,
            FsError::InvalidArgument { .. } => libc::EINVAL,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FsError::Backend { .. } => libc::EIO,
        }
    }
}

/// Result type for pipeline operations.
pub type FsResult<T> = Result<T, FsError>;
