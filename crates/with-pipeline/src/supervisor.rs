//! Fork+exec engine and harvest loop.
//!
//! [`execute`] runs a whole pipeline: gate signals, take the run lock, open
//! every endpoint, fork the processes into one group, then reap until the
//! last child is gone. Exec failures inside a child travel back over a
//! close-on-exec error pipe: the parent reading EOF is the proof that exec
//! replaced the child image, any bytes are the child's failure message.

use std::ffi::CString;
use std::iter;
use std::os::fd::RawFd;
use std::ptr;

use nix::sys::signal::Signal;
use tracing::{debug, warn};

use crate::endpoint::{EndpointSpec, EndpointTable};
use crate::error::{Error, Result};
use crate::fd::{self, Fd};
use crate::lock::RunLock;
use crate::pipeline::{PipelineSpec, ProcessSpec};
use crate::signal::SignalGate;

/// Endpoint-table handles for one process's stdio.
#[derive(Debug, Default, Clone, Copy)]
struct Wiring {
    stdin: Option<usize>,
    stdout: Option<usize>,
    stderr: Option<usize>,
}

/// Run the pipeline to completion.
///
/// On return every started process is finished with a recorded status, the
/// supervisor's endpoint descriptors are closed, the run lock is released,
/// and the caller's signal mask and SIGHUP disposition are restored.
pub fn execute(pipeline: &mut PipelineSpec) -> Result<()> {
    if pipeline.procs.is_empty() {
        return Err(Error::BadSpec("pipeline has no processes".into()));
    }
    let lock_file = pipeline.lock_file.clone();

    let gate = SignalGate::install()?;

    // Declared before the harvester: the lock must release only after the
    // last child is reaped.
    let mut _run_lock: Option<RunLock> = None;

    let mut harvester = Harvester::new(&gate, &mut pipeline.procs);

    let mut table = EndpointTable::new();
    let mut wirings = Vec::with_capacity(harvester.procs.len());
    for proc in harvester.procs.iter_mut() {
        proc.reset_status();
        wirings.push(Wiring {
            stdin: proc.stdin.as_ref().map(|s| table.wire(s, true, false)),
            stdout: proc.stdout.as_ref().map(|s| table.wire(s, false, true)),
            stderr: proc.stderr.as_ref().map(|s| table.wire(s, false, true)),
        });
    }

    if let Some(path) = &lock_file {
        _run_lock = Some(RunLock::acquire(path)?);
    }

    table.open_all()?;

    let mut pgid: libc::pid_t = 0;
    for (i, wiring) in wirings.iter().enumerate() {
        let pid = safe_fork_exec(&mut harvester.procs[i], &table, wiring, pgid, &gate)?;
        if pgid == 0 {
            pgid = pid;
        }
    }

    // Close the supervisor's copies of every endpoint descriptor; pipe
    // readers only see EOF once all write sides are gone.
    drop(table);

    harvester.harvest()
}

/// Feed `input` to a single child's stdin, falling back to the supervisor's
/// stderr if the child cannot be launched or exits non-zero.
///
/// SIGPIPE stays blocked throughout, so a dead child surfaces as EPIPE on
/// the write rather than killing the supervisor.
pub fn try_error_write(pipeline: &mut PipelineSpec, input: &[u8]) {
    let gate = match SignalGate::install() {
        Ok(gate) => gate,
        Err(e) => {
            warn!(error = %e, "signal gate install failed");
            let _ = fd::write_all(libc::STDERR_FILENO, input);
            return;
        }
    };
    if let Err(e) = feed_single_child(&gate, &mut pipeline.procs, input) {
        debug!(error = %e, "error-write child failed, writing to stderr instead");
        let _ = fd::write_all(libc::STDERR_FILENO, input);
    }
}

fn feed_single_child(gate: &SignalGate, procs: &mut Vec<ProcessSpec>, input: &[u8]) -> Result<()> {
    if procs.len() != 1 {
        return Err(Error::BadSpec(
            "error write expects exactly one process".into(),
        ));
    }
    {
        let mut harvester = Harvester::new(gate, procs);
        harvester.procs[0].reset_status();

        let mut table = EndpointTable::new();
        let pipe_spec = EndpointSpec::pipe();
        let handle = table.wire(&pipe_spec, true, true);
        table.open_all()?;
        table.get_mut(handle).write_side.set_nonblocking()?;

        let wiring = Wiring {
            stdin: Some(handle),
            stdout: None,
            stderr: None,
        };
        safe_fork_exec(&mut harvester.procs[0], &table, &wiring, 0, gate)?;

        table.get_mut(handle).read_side.close()?;

        // One shot; a partial write is as good as it gets before EPIPE.
        let raw = table.get(handle).write_raw()?;
        let ret = unsafe { libc::write(raw, input.as_ptr().cast::<libc::c_void>(), input.len()) };
        if ret < 0 {
            return Err(Error::syscall("write to child stdin"));
        }
        table.get_mut(handle).write_side.close()?;

        drop(table);
        harvester.harvest()?;
    }

    let proc = &procs[0];
    if proc.exit_code() != Some(0) {
        return Err(Error::Pipeline(format!(
            "process exited with status {}",
            proc.status()
        )));
    }
    Ok(())
}

/// Fork one process, wiring its stdio and reporting exec failure back.
///
/// The pid lands in the spec only once the error pipe reports EOF; if
/// anything on the parent side fails after the fork, the child is signaled
/// and reaped before the error propagates, so no orphan survives.
fn safe_fork_exec(
    proc: &mut ProcessSpec,
    table: &EndpointTable,
    wiring: &Wiring,
    pgid: libc::pid_t,
    gate: &SignalGate,
) -> Result<libc::pid_t> {
    if proc.argv.is_empty() {
        return Err(Error::BadSpec("argv is empty".into()));
    }
    let argv_c: Vec<CString> = proc
        .argv
        .iter()
        .map(|a| CString::new(a.as_bytes()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::BadSpec(format!("argv for {} contains NUL", proc.argv[0])))?;

    let (mut err_read, mut err_write) = fd::pipe(true)?;
    err_write.set_nonblocking()?;

    // SAFETY: the supervisor is single-threaded; the child only sets up its
    // stdio and execs or _exits.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::syscall("fork"));
    }

    if pid == 0 {
        let err = exec_child(table, wiring, pgid, gate, &argv_c, &proc.argv[0]);
        report_child_failure(&err_write, &err);
        unsafe { libc::_exit(1) };
    }

    match await_exec(&mut err_read, &mut err_write) {
        Ok(()) => {
            proc.set_pid(pid);
            debug!(pid, argv0 = %proc.argv[0], pgid, "forked child");
            Ok(pid)
        }
        Err(e) => {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
                libc::waitpid(pid, ptr::null_mut(), 0);
            }
            Err(e)
        }
    }
}

/// Child side. Diverges into exec on success; returns the failure otherwise.
fn exec_child(
    table: &EndpointTable,
    wiring: &Wiring,
    pgid: libc::pid_t,
    gate: &SignalGate,
    argv: &[CString],
    argv0: &str,
) -> Error {
    if let Err(e) = child_setup(table, wiring, pgid, gate) {
        return e;
    }
    let ptrs: Vec<*const libc::c_char> = argv
        .iter()
        .map(|a| a.as_ptr())
        .chain(iter::once(ptr::null()))
        .collect();
    unsafe { libc::execvp(argv[0].as_ptr(), ptrs.as_ptr()) };
    Error::syscall(format!("execvp {argv0}"))
}

fn child_setup(
    table: &EndpointTable,
    wiring: &Wiring,
    pgid: libc::pid_t,
    gate: &SignalGate,
) -> Result<()> {
    if unsafe { libc::setpgid(0, pgid) } != 0 {
        return Err(Error::syscall("setpgid"));
    }
    if let Some(h) = wiring.stdin {
        dup_over(table.get(h).read_raw()?, libc::STDIN_FILENO)?;
    }
    if let Some(h) = wiring.stdout {
        dup_over(table.get(h).write_raw()?, libc::STDOUT_FILENO)?;
    }
    if let Some(h) = wiring.stderr {
        dup_over(table.get(h).write_raw()?, libc::STDERR_FILENO)?;
    }
    // Default delivery again for the child; SIGHUP stays ignored.
    gate.unblock()
}

fn dup_over(src: RawFd, dst: RawFd) -> Result<()> {
    if unsafe { libc::dup2(src, dst) } < 0 {
        return Err(Error::syscall("dup2"));
    }
    Ok(())
}

fn report_child_failure(err_write: &Fd, err: &Error) {
    let msg = err.to_string();
    if let Ok(raw) = err_write.raw() {
        unsafe { libc::write(raw, msg.as_ptr().cast::<libc::c_void>(), msg.len()) };
    }
}

/// Parent side of the error pipe: EOF means the child exec'd.
fn await_exec(err_read: &mut Fd, err_write: &mut Fd) -> Result<()> {
    err_write.close()?;
    let mut buf = [0u8; 256];
    let ret = unsafe {
        libc::read(
            err_read.raw()?,
            buf.as_mut_ptr().cast::<libc::c_void>(),
            buf.len(),
        )
    };
    if ret < 0 {
        return Err(Error::syscall("read from error pipe"));
    }
    if ret > 0 {
        return Err(Error::ChildExec(
            String::from_utf8_lossy(&buf[..ret as usize]).into_owned(),
        ));
    }
    Ok(())
}

/// Owns every started child until it is reaped.
///
/// Dropping the harvester runs the harvest to completion with errors
/// swallowed, so an error aborting `execute` midway still leaves no zombie.
struct Harvester<'a> {
    gate: &'a SignalGate,
    procs: &'a mut Vec<ProcessSpec>,
}

impl<'a> Harvester<'a> {
    fn new(gate: &'a SignalGate, procs: &'a mut Vec<ProcessSpec>) -> Self {
        Self { gate, procs }
    }

    fn harvest(&mut self) -> Result<()> {
        loop {
            let mut something_running = false;
            for proc in self.procs.iter_mut() {
                if !proc.running() {
                    continue;
                }
                let mut status: libc::c_int = 0;
                let ret = unsafe { libc::waitpid(proc.raw_pid(), &mut status, libc::WNOHANG) };
                if ret < 0 {
                    return Err(Error::syscall("waitpid"));
                }
                if ret > 0 {
                    debug!(pid = proc.raw_pid(), status, "reaped child");
                    proc.mark_exited(status);
                } else {
                    something_running = true;
                }
            }
            if !something_running {
                return Ok(());
            }

            match self.gate.wait()? {
                sig @ (Signal::SIGTERM | Signal::SIGINT | Signal::SIGQUIT) => self.forward(sig)?,
                // SIGCHLD reloops into the waitpid sweep. SIGHUP is noise.
                // SIGPIPE can arrive when an error-write child dies early;
                // the writer sees EPIPE and handles it.
                _ => {}
            }
        }
    }

    fn forward(&self, sig: Signal) -> Result<()> {
        for proc in self.procs.iter() {
            if proc.running() && proc.forward_signals {
                debug!(pid = proc.raw_pid(), %sig, "forwarding signal");
                if unsafe { libc::kill(proc.raw_pid(), sig as libc::c_int) } != 0 {
                    return Err(Error::syscall(format!(
                        "kill pid={} sig={sig}",
                        proc.raw_pid()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Drop for Harvester<'_> {
    fn drop(&mut self) {
        // Teardown must not raise over an in-flight failure.
        if let Err(e) = self.harvest() {
            warn!(error = %e, "harvest during teardown failed");
        }
    }
}
