//! Error types for the pipeline supervisor.

use std::path::PathBuf;

use rustix::io::Errno;
use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{op} failed: {errno}")]
    Syscall { op: String, errno: Errno },

    #[error("bad spec: {0}")]
    BadSpec(String),

    #[error("pipeline is already running (lock file {} is held)", path.display())]
    AlreadyRunning { path: PathBuf },

    #[error("child exec failed: {0}")]
    ChildExec(String),

    #[error("pipeline failed: {0}")]
    Pipeline(String),
}

impl Error {
    /// Capture the current errno for a failed call named `op`.
    pub(crate) fn syscall(op: impl Into<String>) -> Self {
        Self::Syscall {
            op: op.into(),
            errno: last_errno(),
        }
    }

    pub(crate) fn from_nix(op: impl Into<String>, err: nix::Error) -> Self {
        Self::Syscall {
            op: op.into(),
            errno: Errno::from_raw_os_error(err as i32),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[inline]
pub fn last_errno() -> Errno {
    // SAFETY: __errno_location always returns a valid thread-local pointer.
    Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}
