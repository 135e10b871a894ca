//! Owned file-descriptor handle.
//!
//! Descriptors cross fork boundaries here, and an untracked leak shows up as
//! a reader that never sees EOF. `Fd` guarantees close is attempted exactly
//! once per owned descriptor on every exit path. Errors from an explicit
//! [`Fd::close`] surface; errors during drop cannot and are swallowed.

use std::os::fd::RawFd;

use tracing::warn;

use crate::error::{Error, Result};

const INVALID: RawFd = -1;

/// An owned kernel file descriptor, closed on drop.
#[derive(Debug)]
pub struct Fd {
    raw: RawFd,
}

impl Fd {
    /// An empty handle owning nothing.
    pub const fn invalid() -> Self {
        Self { raw: INVALID }
    }

    /// Adopt ownership of `raw`.
    pub const fn new(raw: RawFd) -> Self {
        Self { raw }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.raw != INVALID
    }

    /// The raw descriptor, or `Syscall(EBADF)`-style failure when empty.
    pub fn raw(&self) -> Result<RawFd> {
        if self.is_open() {
            Ok(self.raw)
        } else {
            Err(Error::BadSpec("descriptor is not open".into()))
        }
    }

    /// Close the owned descriptor, if any. Unlike drop, a failed close
    /// surfaces to the caller.
    pub fn close(&mut self) -> Result<()> {
        self.replace(INVALID)
    }

    /// Close any prior descriptor and adopt `raw` in its place.
    pub fn replace(&mut self, raw: RawFd) -> Result<()> {
        if self.is_open() && unsafe { libc::close(self.raw) } != 0 {
            self.raw = raw;
            return Err(Error::syscall("close"));
        }
        self.raw = raw;
        Ok(())
    }

    /// Destructively move the descriptor out of `src` into `self`.
    pub fn take_from(&mut self, src: &mut Fd) -> Result<()> {
        let raw = std::mem::replace(&mut src.raw, INVALID);
        self.replace(raw)
    }

    pub fn set_cloexec(&self) -> Result<()> {
        let raw = self.raw()?;
        let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
        if flags < 0 {
            return Err(Error::syscall("fcntl(F_GETFD)"));
        }
        if unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
            return Err(Error::syscall("fcntl(F_SETFD)"));
        }
        Ok(())
    }

    pub fn set_nonblocking(&self) -> Result<()> {
        let raw = self.raw()?;
        let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
        if flags < 0 {
            return Err(Error::syscall("fcntl(F_GETFL)"));
        }
        if unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(Error::syscall("fcntl(F_SETFL)"));
        }
        Ok(())
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "close during drop failed");
        }
    }
}

/// Create a pipe. With `cloexec` set, both ends get FD_CLOEXEC atomically.
pub fn pipe(cloexec: bool) -> Result<(Fd, Fd)> {
    let mut raw = [0 as RawFd; 2];
    let flags = if cloexec { libc::O_CLOEXEC } else { 0 };
    // SAFETY: pipe2 writes into a valid two-element array.
    if unsafe { libc::pipe2(raw.as_mut_ptr(), flags) } != 0 {
        return Err(Error::syscall("pipe2"));
    }
    Ok((Fd::new(raw[0]), Fd::new(raw[1])))
}

/// Write the whole buffer, looping on short writes. EINTR retries; any other
/// failure or a zero-length write surfaces as a `Syscall` error.
pub fn write_all(fd: RawFd, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        let ret = unsafe { libc::write(fd, buf.as_ptr().cast::<libc::c_void>(), buf.len()) };
        if ret < 0 {
            if crate::error::last_errno() == rustix::io::Errno::INTR {
                continue;
            }
            return Err(Error::syscall("write"));
        }
        if ret == 0 {
            return Err(Error::syscall("write"));
        }
        buf = &buf[ret as usize..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_by_default() {
        let fd = Fd::invalid();
        assert!(!fd.is_open());
        assert!(fd.raw().is_err());
    }

    #[test]
    fn pipe_round_trip() {
        let (read, write) = pipe(false).unwrap();
        write_all(write.raw().unwrap(), b"ping").unwrap();

        let mut buf = [0u8; 8];
        let n = unsafe { libc::read(read.raw().unwrap(), buf.as_mut_ptr().cast(), buf.len()) };
        assert_eq!(n, 4);
        assert_eq!(&buf[..4], b"ping");
    }

    #[test]
    fn pipe_cloexec_flag() {
        let (read, write) = pipe(true).unwrap();
        for fd in [&read, &write] {
            let flags = unsafe { libc::fcntl(fd.raw().unwrap(), libc::F_GETFD) };
            assert_ne!(flags & libc::FD_CLOEXEC, 0);
        }
    }

    #[test]
    fn take_from_empties_source() {
        let (mut read, _write) = pipe(false).unwrap();
        let raw = read.raw().unwrap();

        let mut dst = Fd::invalid();
        dst.take_from(&mut read).unwrap();
        assert!(!read.is_open());
        assert_eq!(dst.raw().unwrap(), raw);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut read, _write) = pipe(false).unwrap();
        read.close().unwrap();
        assert!(!read.is_open());
        read.close().unwrap();
    }

    #[test]
    fn nonblocking_sets_flag() {
        let (read, _write) = pipe(false).unwrap();
        read.set_nonblocking().unwrap();
        let flags = unsafe { libc::fcntl(read.raw().unwrap(), libc::F_GETFL) };
        assert_ne!(flags & libc::O_NONBLOCK, 0);
    }
}
