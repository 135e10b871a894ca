//! Exclusive run lock.
//!
//! An advisory whole-file `flock` holding the supervising process's PID.
//! The file is truncated on release but never unlinked; it may have been
//! renamed out from under us while held.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use rustix::io::Errno;
use tracing::warn;

use crate::error::{last_errno, Error, Result};
use crate::fd::{self, Fd};

#[derive(Debug)]
pub struct RunLock {
    fd: Fd,
    path: PathBuf,
}

impl RunLock {
    /// Open (creating if needed), lock exclusively without blocking, and
    /// record the current PID. A held lock surfaces as
    /// [`Error::AlreadyRunning`].
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let path_c = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::BadSpec(format!("lock path {} contains NUL", path.display())))?;

        let raw = unsafe { libc::open(path_c.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o666) };
        if raw < 0 {
            return Err(Error::syscall(format!("open {}", path.display())));
        }
        let mut fd = Fd::new(raw);
        fd.set_cloexec()?;

        if unsafe { libc::flock(raw, libc::LOCK_EX | libc::LOCK_NB) } != 0 {
            let errno = last_errno();
            // Close before reporting so the drop below cannot truncate a
            // file someone else holds.
            let _ = fd.close();
            if errno == Errno::WOULDBLOCK {
                return Err(Error::AlreadyRunning { path });
            }
            return Err(Error::Syscall {
                op: format!("flock {}", path.display()),
                errno,
            });
        }

        if unsafe { libc::ftruncate(raw, 0) } != 0 {
            return Err(Error::syscall(format!("ftruncate {}", path.display())));
        }
        let pid = unsafe { libc::getpid() };
        fd::write_all(raw, format!("{pid}\n").as_bytes())?;

        Ok(Self { fd, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Clear the PID so nothing tries to signal a recycled process.
        if let Ok(raw) = self.fd.raw() {
            if unsafe { libc::ftruncate(raw, 0) } != 0 {
                warn!(path = %self.path.display(), "truncating lock file on release failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn acquire_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let lock = RunLock::acquire(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let pid = unsafe { libc::getpid() };
        assert_eq!(contents, format!("{pid}\n"));
        drop(lock);

        // Released: file still exists, emptied.
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn second_acquire_reports_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let _held = RunLock::acquire(&path).unwrap();
        // A second open file description cannot take the flock.
        match RunLock::acquire(&path) {
            Err(Error::AlreadyRunning { path: reported }) => assert_eq!(reported, path),
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }

        // The holder's PID record must survive the failed attempt.
        let pid = unsafe { libc::getpid() };
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{pid}\n"));
    }
}
