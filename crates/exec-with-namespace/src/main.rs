//! Setuid helper: exec a command inside a private `/with` mount namespace.
//!
//! ```text
//! exec_with_namespace cmd args... -- mount-name target1=src1 ... -- env...
//! exec_with_namespace --init.d mount-name target1=src1 ...
//! ```
//!
//! The helper unshares the mount namespace, lazily detaches whatever was
//! mounted on `/with`, mounts a fresh tmpfs labelled with the mount name,
//! builds the requested symlink tree, records the `.ns`/`.env` metadata,
//! drops back to the real uid/gid, and execs the command with exactly the
//! environment passed after the second `--`.
//!
//! The environment travels on the command line because the loader hands a
//! setuid binary a sanitized copy; the caller's real environment would
//! otherwise be lost. Nothing of the sanitized copy survives the exec.

mod args;
mod tree;

use std::ffi::CString;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::unistd::{execvpe, getgid, getuid, setresgid, setresuid};

use crate::args::Invocation;

/// The well-known mount point replaced per invocation.
const WITH_MOUNTPOINT: &str = "/with";

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();
    let progname = argv
        .first()
        .and_then(|a| a.rsplit('/').next())
        .unwrap_or("exec_with_namespace")
        .to_string();

    let Some(invocation) = args::parse(&argv[1..]) else {
        usage(&progname);
        return ExitCode::FAILURE;
    };

    match run(invocation) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{progname}: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn usage(progname: &str) {
    eprintln!(
        "usage: {progname} cmd args... -- mount-name target1=src1 target2=src2 ... -- env\n\
         \x20   For each target=src, makes a symlink {WITH_MOUNTPOINT}/target => src inside a\n\
         \x20   fresh mount namespace, then executes cmd there.\n\
         \x20   {progname} --init.d mount-name target1=src1 ... only rebuilds the symlink tree."
    );
}

fn run(invocation: Invocation) -> Result<()> {
    match invocation {
        Invocation::InitD { ns_args } => tree::populate(Path::new(WITH_MOUNTPOINT), &ns_args),
        Invocation::Exec { cmd, ns_args, env } => {
            enter_namespace(&ns_args[0])?;
            let root = Path::new(WITH_MOUNTPOINT);
            tree::populate(root, &ns_args)?;
            tree::write_env(root, &env)?;
            drop_privileges()?;
            exec(&cmd, &env)
        }
    }
}

/// Detach from the parent's mount namespace and put a fresh tmpfs on the
/// mount point.
fn enter_namespace(mount_name: &str) -> Result<()> {
    unshare(CloneFlags::CLONE_NEWNS).context("unshare mount namespace")?;

    // MNT_DETACH: the old mount must go even if some caller's cwd is inside
    // it.
    umount2(WITH_MOUNTPOINT, MntFlags::MNT_DETACH)
        .with_context(|| format!("umount {WITH_MOUNTPOINT}"))?;

    mount(
        Some(mount_name),
        WITH_MOUNTPOINT,
        Some("tmpfs"),
        MsFlags::empty(),
        None::<&str>,
    )
    .with_context(|| format!("mount tmpfs on {WITH_MOUNTPOINT}"))?;
    Ok(())
}

/// Drop the setuid grant: all three uids and gids become the real ones.
fn drop_privileges() -> Result<()> {
    let uid = getuid();
    let gid = getgid();
    setresuid(uid, uid, uid).context("setresuid")?;
    setresgid(gid, gid, gid).context("setresgid")?;
    Ok(())
}

/// Exec the target with exactly the passed environment; the sanitized
/// ambient one dies here.
fn exec(cmd: &[String], env: &[String]) -> Result<()> {
    let argv: Vec<CString> = cmd
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<std::result::Result<_, _>>()
        .context("command argument contains NUL")?;
    let envp: Vec<CString> = env
        .iter()
        .map(|e| CString::new(e.as_str()))
        .collect::<std::result::Result<_, _>>()
        .context("environment entry contains NUL")?;

    execvpe(&argv[0], &argv, &envp).with_context(|| format!("execvp {}", cmd[0]))?;
    unreachable!("execvpe returned without an error")
}
