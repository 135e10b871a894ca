//! with-pipeline: supervised process pipelines for the `with` namespace tool.
//!
//! The supervisor launches an ordered set of child processes sharing a
//! process group and a declared set of stdio endpoints (kernel pipes, files,
//! or the caller's own descriptors), then harvests them deterministically:
//!
//! - terminal signals are blocked and received synchronously, forwarded only
//!   to children that opted in;
//! - exec failures inside a child travel back over a close-on-exec error
//!   pipe instead of surfacing as a mysterious instant exit;
//! - an optional advisory run lock holds the supervisor's PID and blocks
//!   concurrent invocations.
//!
//! ```ignore
//! use with_pipeline::{execute, EndpointSpec, PipelineSpec, ProcessSpec};
//!
//! let mut pipeline = PipelineSpec::new();
//! let link = EndpointSpec::pipe();
//! let out = pipeline.caller_stdout();
//! pipeline.add_proc(ProcessSpec::new(["echo", "hello"]).stdout(&link));
//! pipeline.add_proc(ProcessSpec::new(["grep", "hell"]).stdin(&link).stdout(&out));
//! execute(&mut pipeline)?;
//! ```
//!
//! The companion `exec_with_namespace` setuid binary (its launcher lives in
//! [`launcher`]) remounts `/with` as a private tmpfs symlink tree before
//! dropping privileges and executing a command.
//!
//! Linux-only: the implementation leans on mount namespaces, `flock`,
//! `sigwait` and friends.

pub mod endpoint;
pub mod error;
pub mod fd;
pub mod launcher;
pub mod lock;
pub mod pipeline;
pub mod signal;
pub mod supervisor;

pub use endpoint::EndpointSpec;
pub use error::{Error, Result};
pub use lock::RunLock;
pub use pipeline::{PipelineSpec, ProcessSpec};
pub use signal::SignalGate;
pub use supervisor::{execute, try_error_write};
