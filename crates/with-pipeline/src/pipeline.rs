//! Pipeline and per-process specifications.

use std::path::PathBuf;
use std::rc::Rc;

use crate::endpoint::EndpointSpec;

/// The contract for one child process.
///
/// Lifecycle: created unstarted; the supervisor assigns `pid` during fork
/// (started) and records the raw wait status during harvest (finished).
#[derive(Debug)]
pub struct ProcessSpec {
    pub argv: Vec<String>,
    pub stdin: Option<Rc<EndpointSpec>>,
    pub stdout: Option<Rc<EndpointSpec>>,
    pub stderr: Option<Rc<EndpointSpec>>,
    /// Forward SIGTERM/SIGINT/SIGQUIT received by the supervisor to this
    /// process while it runs.
    pub forward_signals: bool,
    pid: libc::pid_t,
    exited: bool,
    status: libc::c_int,
}

impl ProcessSpec {
    pub fn new(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            stdin: None,
            stdout: None,
            stderr: None,
            forward_signals: false,
            pid: -1,
            exited: false,
            status: 0,
        }
    }

    pub fn stdin(mut self, spec: &Rc<EndpointSpec>) -> Self {
        self.stdin = Some(Rc::clone(spec));
        self
    }

    pub fn stdout(mut self, spec: &Rc<EndpointSpec>) -> Self {
        self.stdout = Some(Rc::clone(spec));
        self
    }

    pub fn stderr(mut self, spec: &Rc<EndpointSpec>) -> Self {
        self.stderr = Some(Rc::clone(spec));
        self
    }

    pub fn forward_signals(mut self, forward: bool) -> Self {
        self.forward_signals = forward;
        self
    }

    #[inline]
    pub fn started(&self) -> bool {
        self.pid >= 0
    }

    #[inline]
    pub fn running(&self) -> bool {
        self.started() && !self.exited
    }

    #[inline]
    pub fn finished(&self) -> bool {
        self.started() && self.exited
    }

    pub fn pid(&self) -> Option<libc::pid_t> {
        self.started().then_some(self.pid)
    }

    /// Raw status word from `waitpid`, meaningful once finished.
    #[inline]
    pub fn status(&self) -> libc::c_int {
        self.status
    }

    /// Exit code, when the process finished by plain exit.
    pub fn exit_code(&self) -> Option<i32> {
        (self.finished() && libc::WIFEXITED(self.status))
            .then(|| libc::WEXITSTATUS(self.status))
    }

    /// Terminating signal, when the process was killed by one.
    pub fn term_signal(&self) -> Option<i32> {
        (self.finished() && libc::WIFSIGNALED(self.status)).then(|| libc::WTERMSIG(self.status))
    }

    /// Clear the result slots so this spec can be executed again.
    pub fn reset_status(&mut self) {
        self.pid = -1;
        self.exited = false;
        self.status = 0;
    }

    pub(crate) fn set_pid(&mut self, pid: libc::pid_t) {
        self.pid = pid;
    }

    pub(crate) fn raw_pid(&self) -> libc::pid_t {
        self.pid
    }

    pub(crate) fn mark_exited(&mut self, status: libc::c_int) {
        self.exited = true;
        self.status = status;
    }
}

/// Ordered set of processes launched and harvested together.
///
/// Fork order and the identity of the process-group leader follow the
/// declaration order of `procs`.
#[derive(Debug, Default)]
pub struct PipelineSpec {
    pub procs: Vec<ProcessSpec>,
    /// When set, an exclusive run lock on this path is held for the whole
    /// invocation.
    pub lock_file: Option<PathBuf>,
    dev_null: Option<Rc<EndpointSpec>>,
    caller_stdin: Option<Rc<EndpointSpec>>,
    caller_stdout: Option<Rc<EndpointSpec>>,
    caller_stderr: Option<Rc<EndpointSpec>>,
}

impl PipelineSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_proc(&mut self, proc: ProcessSpec) -> &mut Self {
        self.procs.push(proc);
        self
    }

    pub fn lock_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.lock_file = Some(path.into());
        self
    }

    /// The null sink, shared by every process in this pipeline that asks.
    pub fn dev_null(&mut self) -> Rc<EndpointSpec> {
        Self::cached(&mut self.dev_null, EndpointSpec::Null)
    }

    /// The caller's stdin, shared per pipeline.
    pub fn caller_stdin(&mut self) -> Rc<EndpointSpec> {
        Self::cached(&mut self.caller_stdin, EndpointSpec::CallerStdin)
    }

    /// The caller's stdout, shared per pipeline.
    pub fn caller_stdout(&mut self) -> Rc<EndpointSpec> {
        Self::cached(&mut self.caller_stdout, EndpointSpec::CallerStdout)
    }

    /// The caller's stderr, shared per pipeline.
    pub fn caller_stderr(&mut self) -> Rc<EndpointSpec> {
        Self::cached(&mut self.caller_stderr, EndpointSpec::CallerStderr)
    }

    fn cached(slot: &mut Option<Rc<EndpointSpec>>, spec: EndpointSpec) -> Rc<EndpointSpec> {
        Rc::clone(slot.get_or_insert_with(|| Rc::new(spec)))
    }
}
