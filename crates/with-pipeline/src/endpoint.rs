//! Stdio endpoints: declarative specs and their opened runtime form.
//!
//! An [`EndpointSpec`] is shared by identity: two processes holding the same
//! `Rc` end up connected to the same kernel pipe or file. The table below
//! therefore deduplicates with `Rc::ptr_eq`, never by path: two separate
//! `File` specs naming the same path are two independent descriptors.

use std::ffi::CString;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::fd::{self, Fd};

/// Declarative description of one IO endpoint.
#[derive(Debug)]
pub enum EndpointSpec {
    /// Anonymous kernel pipe connecting a writer process to a reader.
    Pipe,
    /// A named file, opened per the accumulated read/write demand.
    File { path: PathBuf, append: bool },
    /// Dup of the supervisor's stdin. Read-only.
    CallerStdin,
    /// Dup of the supervisor's stdout. Write-only.
    CallerStdout,
    /// Dup of the supervisor's stderr. Write-only.
    CallerStderr,
    /// The null sink.
    Null,
}

impl EndpointSpec {
    pub fn pipe() -> Rc<Self> {
        Rc::new(Self::Pipe)
    }

    pub fn file(path: impl Into<PathBuf>) -> Rc<Self> {
        Rc::new(Self::File {
            path: path.into(),
            append: false,
        })
    }

    pub fn file_append(path: impl Into<PathBuf>) -> Rc<Self> {
        Rc::new(Self::File {
            path: path.into(),
            append: true,
        })
    }
}

/// The opened form of an [`EndpointSpec`].
///
/// `want_read`/`want_write` are OR-folded over every process referencing the
/// spec before [`Endpoint::open`] runs once.
#[derive(Debug)]
pub struct Endpoint {
    spec: Rc<EndpointSpec>,
    pub(crate) want_read: bool,
    pub(crate) want_write: bool,
    pub(crate) read_side: Fd,
    pub(crate) write_side: Fd,
}

impl Endpoint {
    fn new(spec: Rc<EndpointSpec>) -> Self {
        Self {
            spec,
            want_read: false,
            want_write: false,
            read_side: Fd::invalid(),
            write_side: Fd::invalid(),
        }
    }

    pub(crate) fn read_raw(&self) -> Result<RawFd> {
        self.read_side.raw()
    }

    pub(crate) fn write_raw(&self) -> Result<RawFd> {
        self.write_side.raw()
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        match &*self.spec {
            EndpointSpec::Pipe => {
                let (read, write) = fd::pipe(true)?;
                self.read_side = read;
                self.write_side = write;
                Ok(())
            }
            EndpointSpec::CallerStdin => {
                if self.want_write {
                    return Err(Error::BadSpec(
                        "caller stdin cannot be used for writing".into(),
                    ));
                }
                self.read_side = dup_std(libc::STDIN_FILENO)?;
                Ok(())
            }
            EndpointSpec::CallerStdout => {
                if self.want_read {
                    return Err(Error::BadSpec(
                        "caller stdout cannot be used for reading".into(),
                    ));
                }
                self.write_side = dup_std(libc::STDOUT_FILENO)?;
                Ok(())
            }
            EndpointSpec::CallerStderr => {
                if self.want_read {
                    return Err(Error::BadSpec(
                        "caller stderr cannot be used for reading".into(),
                    ));
                }
                self.write_side = dup_std(libc::STDERR_FILENO)?;
                Ok(())
            }
            EndpointSpec::File { path, append } => {
                let (path, append) = (path.clone(), *append);
                self.open_path(&path, append)
            }
            EndpointSpec::Null => self.open_path(Path::new("/dev/null"), false),
        }
    }

    fn open_path(&mut self, path: &Path, append: bool) -> Result<()> {
        let mut flags = match (self.want_read, self.want_write) {
            (true, true) => libc::O_RDWR | libc::O_CREAT,
            (false, true) => libc::O_WRONLY | libc::O_CREAT,
            _ => libc::O_RDONLY,
        };
        if self.want_write && append {
            flags |= libc::O_APPEND;
        }

        let path_c = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::BadSpec(format!("path {} contains NUL", path.display())))?;
        let raw = unsafe { libc::open(path_c.as_ptr(), flags, 0o666) };
        if raw < 0 {
            return Err(Error::syscall(format!("open {}", path.display())));
        }

        let fd = Fd::new(raw);
        fd.set_cloexec()?;
        if self.want_read && self.want_write {
            // Both sides share one open file description; the dup keeps each
            // Fd exclusively owned.
            let dup = unsafe { libc::dup(raw) };
            if dup < 0 {
                return Err(Error::syscall("dup"));
            }
            self.write_side = Fd::new(dup);
            self.write_side.set_cloexec()?;
            self.read_side = fd;
        } else if self.want_write {
            self.write_side = fd;
        } else {
            self.read_side = fd;
        }
        Ok(())
    }
}

fn dup_std(std_fd: RawFd) -> Result<Fd> {
    let raw = unsafe { libc::dup(std_fd) };
    if raw < 0 {
        return Err(Error::syscall(format!("dup({std_fd})")));
    }
    let fd = Fd::new(raw);
    fd.set_cloexec()?;
    Ok(fd)
}

/// Registry mapping endpoint specs to opened endpoints.
///
/// Wiring returns an integer handle into the arena; handles stay valid for
/// the table's lifetime.
#[derive(Debug, Default)]
pub(crate) struct EndpointTable {
    entries: Vec<Endpoint>,
}

impl EndpointTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a demand on `spec`, folding the want flags into any entry
    /// already holding the same spec instance.
    pub(crate) fn wire(
        &mut self,
        spec: &Rc<EndpointSpec>,
        want_read: bool,
        want_write: bool,
    ) -> usize {
        let index = self
            .entries
            .iter()
            .position(|e| Rc::ptr_eq(&e.spec, spec))
            .unwrap_or_else(|| {
                self.entries.push(Endpoint::new(Rc::clone(spec)));
                self.entries.len() - 1
            });
        let entry = &mut self.entries[index];
        entry.want_read = entry.want_read || want_read;
        entry.want_write = entry.want_write || want_write;
        index
    }

    /// Open every registered endpoint. Runs once, after wiring is complete.
    pub(crate) fn open_all(&mut self) -> Result<()> {
        for entry in &mut self.entries {
            entry.open()?;
        }
        Ok(())
    }

    pub(crate) fn get(&self, handle: usize) -> &Endpoint {
        &self.entries[handle]
    }

    pub(crate) fn get_mut(&mut self, handle: usize) -> &mut Endpoint {
        &mut self.entries[handle]
    }
}
