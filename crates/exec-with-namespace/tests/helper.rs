//! Tests driving the built helper binary.
//!
//! The grammar checks run anywhere. The end-to-end namespace test needs the
//! binary to run with privileges and a `/with` mount point on the host, so
//! it is ignored by default:
//!
//! ```bash
//! sudo -E cargo test -p exec-with-namespace -- --ignored
//! ```

use std::process::Command;

fn helper() -> Command {
    Command::new(env!("CARGO_BIN_EXE_exec_with_namespace"))
}

#[test]
fn no_arguments_prints_usage() {
    let output = helper().output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("usage:"), "{stderr}");
}

#[test]
fn missing_separators_print_usage() {
    let output = helper().args(["cmd", "PATH=/bin"]).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("usage:"), "{stderr}");
}

#[test]
fn namespace_list_requires_mount_name() {
    let output = helper().args(["cmd", "--", "--"]).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("usage:"));
}

#[test]
fn valid_grammar_fails_past_parsing() {
    // Whether or not we have privileges, a well-formed invocation must get
    // beyond usage: unprivileged it dies at unshare, privileged it dies at
    // the umount of a host without a /with mount. Either way, a diagnostic.
    let output = helper()
        .args(["true", "--", "nsA", "bin=/usr/local/bin", "--"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("usage:"), "{stderr}");
    assert!(!stderr.is_empty());
}

#[test]
#[ignore = "requires root and a tmpfs-mountable /with on the host"]
fn exec_inside_fresh_namespace() {
    let output = helper()
        .args([
            "sh",
            "-c",
            "readlink /with/bin; cat /with/.ns; cat /with/.env; env",
            "--",
            "nsA",
            "bin=/usr/local/bin",
            "etc/app=/opt/etc",
            "--",
            "PATH=/bin",
            "X=1",
        ])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("/usr/local/bin"));
    assert!(stdout.contains("nsA bin=/usr/local/bin etc/app=/opt/etc "));
    assert!(stdout.contains("PATH=/bin\nX=1\n"));
    // The namespace is private: the host never sees the tmpfs.
    assert!(!std::path::Path::new("/with/bin").exists());
}
