//! Symlink-tree population and namespace metadata files.

use std::fs::{self, DirBuilder};
use std::os::unix::fs::{symlink, DirBuilderExt};
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Create the `target=src` symlinks under `root` and record the namespace
/// tokens in `root/.ns`.
///
/// `ns_args[0]` is the mount-name label; the remaining tokens are
/// `target=src` pairs, created in input order. Parent directories are
/// created mode 0755. Pre-existing paths are not unlinked first; on the
/// normal path the tmpfs is freshly mounted, so there are none.
pub fn populate(root: &Path, ns_args: &[String]) -> Result<()> {
    for pair in ns_args.iter().skip(1) {
        let (target, source) = split_pair(pair)?;
        let link = root.join(target);
        if let Some(parent) = link.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        symlink(source, &link)
            .with_context(|| format!("symlink {} -> {source}", link.display()))?;
    }

    let mut meta = String::new();
    for token in ns_args {
        meta.push_str(token);
        meta.push(' ');
    }
    fs::write(root.join(".ns"), meta).context("write namespace metadata")?;
    Ok(())
}

/// Write each environment entry on its own line to `root/.env`.
pub fn write_env(root: &Path, env: &[String]) -> Result<()> {
    let mut out = String::new();
    for entry in env {
        out.push_str(entry);
        out.push('\n');
    }
    fs::write(root.join(".env"), out).context("write environment metadata")
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((target, source)) if !source.is_empty() => Ok((target, source)),
        _ => bail!("argument {pair} must be of the form target=src"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn builds_symlinks_and_metadata() {
        let root = tempfile::tempdir().unwrap();
        let ns_args = strings(&["nsA", "bin=/usr/local/bin", "etc/app=/opt/etc"]);

        populate(root.path(), &ns_args).unwrap();

        let bin = fs::read_link(root.path().join("bin")).unwrap();
        assert_eq!(bin, Path::new("/usr/local/bin"));
        let app = fs::read_link(root.path().join("etc/app")).unwrap();
        assert_eq!(app, Path::new("/opt/etc"));
        assert!(root.path().join("etc").is_dir());

        let ns = fs::read_to_string(root.path().join(".ns")).unwrap();
        assert_eq!(ns, "nsA bin=/usr/local/bin etc/app=/opt/etc ");
    }

    #[test]
    fn mount_name_alone_writes_metadata_only() {
        let root = tempfile::tempdir().unwrap();
        populate(root.path(), &strings(&["nsA"])).unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join(".ns")).unwrap(),
            "nsA "
        );
    }

    #[test]
    fn symlink_order_follows_input() {
        let root = tempfile::tempdir().unwrap();
        // Same leaf twice: the second creation must fail, proving the first
        // already ran.
        let ns_args = strings(&["nsA", "dup=/first", "dup=/second"]);
        assert!(populate(root.path(), &ns_args).is_err());
        assert_eq!(
            fs::read_link(root.path().join("dup")).unwrap(),
            Path::new("/first")
        );
    }

    #[test]
    fn rejects_malformed_pairs() {
        let root = tempfile::tempdir().unwrap();
        for bad in ["no-separator", "empty-source="] {
            let err = populate(root.path(), &strings(&["nsA", bad])).unwrap_err();
            assert!(err.to_string().contains("target=src"), "{err}");
        }
    }

    #[test]
    fn env_file_one_entry_per_line() {
        let root = tempfile::tempdir().unwrap();
        write_env(root.path(), &strings(&["PATH=/bin", "X=1"])).unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join(".env")).unwrap(),
            "PATH=/bin\nX=1\n"
        );
    }

    #[test]
    fn empty_env_writes_empty_file() {
        let root = tempfile::tempdir().unwrap();
        write_env(root.path(), &[]).unwrap();
        assert_eq!(fs::read_to_string(root.path().join(".env")).unwrap(), "");
    }
}
