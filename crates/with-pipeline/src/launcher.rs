//! Library-side launcher for the setuid namespace helper.
//!
//! Builds the helper's `cmd… -- mount-name target=src… -- KEY=VALUE…`
//! argv and execs it. The environment rides along positionally because the
//! loader scrubs a setuid binary's environment; the helper reinstalls the
//! passed entries after it drops privileges, so the ambient environment
//! handed to `execve` here is deliberately empty.

use std::convert::Infallible;
use std::env;
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;

use crate::error::{Error, Result};

/// Installed location of the setuid helper.
pub const HELPER_PATH: &str = "/usr/bin/exec_with_namespace";

/// Replace the current process with `cmd` running inside a fresh namespace
/// labelled `mount_name` and populated from the `target=src` pairs.
///
/// Returns only on failure.
pub fn exec_in_namespace(
    mount_name: &str,
    targets: &[String],
    cmd: &[String],
) -> Result<Infallible> {
    let env_entries: Vec<Vec<u8>> = env::vars_os()
        .map(|(key, value)| {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            entry
        })
        .collect();
    let argv = build_helper_argv(mount_name, targets, cmd, &env_entries)?;

    let empty_env: [&CStr; 0] = [];
    nix::unistd::execve(&argv[0], &argv, &empty_env)
        .map_err(|e| Error::from_nix(format!("execve {HELPER_PATH}"), e))
}

fn build_helper_argv(
    mount_name: &str,
    targets: &[String],
    cmd: &[String],
    env_entries: &[Vec<u8>],
) -> Result<Vec<CString>> {
    if cmd.is_empty() {
        return Err(Error::BadSpec("namespace command is empty".into()));
    }

    let mut argv = Vec::with_capacity(cmd.len() + targets.len() + env_entries.len() + 4);
    argv.push(cstring(HELPER_PATH)?);
    for arg in cmd {
        argv.push(cstring(arg)?);
    }
    argv.push(cstring("--")?);
    argv.push(cstring(mount_name)?);
    for pair in targets {
        argv.push(cstring(pair)?);
    }
    argv.push(cstring("--")?);
    for entry in env_entries {
        argv.push(
            CString::new(entry.clone())
                .map_err(|_| Error::BadSpec("environment entry contains NUL".into()))?,
        );
    }
    Ok(argv)
}

fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::BadSpec(format!("argument {s:?} contains NUL")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_layout() {
        let argv = build_helper_argv(
            "nsA",
            &["bin=/usr/local/bin".into()],
            &["prog".into(), "arg".into()],
            &[b"PATH=/bin".to_vec()],
        )
        .unwrap();

        let tokens: Vec<&str> = argv.iter().map(|c| c.to_str().unwrap()).collect();
        assert_eq!(
            tokens,
            [
                HELPER_PATH,
                "prog",
                "arg",
                "--",
                "nsA",
                "bin=/usr/local/bin",
                "--",
                "PATH=/bin",
            ]
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = build_helper_argv("nsA", &[], &[], &[]).unwrap_err();
        assert!(matches!(err, Error::BadSpec(_)));
    }
}
