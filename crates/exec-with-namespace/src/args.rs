//! Command-line grammar for the namespace helper.
//!
//! `cmd arg… -- mount-name target=src… -- KEY=VALUE…`
//!
//! The scan runs backwards from the end: everything after the last `--` is
//! the environment, the section between the two trailing `--` separators is
//! the namespace list (mount-name first), and the head is the command. Only
//! the command section may itself contain `--`.

/// A parsed helper invocation.
#[derive(Debug, PartialEq, Eq)]
pub enum Invocation {
    /// `--init.d`: build the symlink tree and metadata only, no namespace
    /// or mount work. Used at boot for the default namespace.
    InitD { ns_args: Vec<String> },
    /// Full form: enter a fresh namespace, then exec the command.
    Exec {
        cmd: Vec<String>,
        ns_args: Vec<String>,
        env: Vec<String>,
    },
}

/// Parse the arguments after the program name. `None` means the grammar was
/// violated and the caller should print usage.
pub fn parse(args: &[String]) -> Option<Invocation> {
    if args.is_empty() {
        return None;
    }

    if args[0] == "--init.d" {
        let ns_args = args[1..].to_vec();
        if ns_args.is_empty() {
            return None;
        }
        return Some(Invocation::InitD { ns_args });
    }

    let env_sep = args.iter().rposition(|a| a == "--")?;
    let ns_sep = args[..env_sep].iter().rposition(|a| a == "--")?;

    let cmd = args[..ns_sep].to_vec();
    let ns_args = args[ns_sep + 1..env_sep].to_vec();
    let env = args[env_sep + 1..].to_vec();

    // At least the mount name, and something to exec.
    if ns_args.is_empty() || cmd.is_empty() {
        return None;
    }

    Some(Invocation::Exec { cmd, ns_args, env })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn full_form() {
        let parsed = parse(&strings(&[
            "prog", "arg", "--", "nsA", "bin=/usr/bin", "--", "PATH=/bin", "X=1",
        ]))
        .unwrap();
        assert_eq!(
            parsed,
            Invocation::Exec {
                cmd: strings(&["prog", "arg"]),
                ns_args: strings(&["nsA", "bin=/usr/bin"]),
                env: strings(&["PATH=/bin", "X=1"]),
            }
        );
    }

    #[test]
    fn empty_environment_section() {
        let parsed = parse(&strings(&["prog", "--", "nsA", "--"])).unwrap();
        assert_eq!(
            parsed,
            Invocation::Exec {
                cmd: strings(&["prog"]),
                ns_args: strings(&["nsA"]),
                env: vec![],
            }
        );
    }

    #[test]
    fn command_may_contain_separator() {
        let parsed = parse(&strings(&["prog", "--", "x", "--", "nsA", "--"])).unwrap();
        assert_eq!(
            parsed,
            Invocation::Exec {
                cmd: strings(&["prog", "--", "x"]),
                ns_args: strings(&["nsA"]),
                env: vec![],
            }
        );
    }

    #[test]
    fn init_d_form() {
        let parsed = parse(&strings(&["--init.d", "nsA", "bin=/usr/bin"])).unwrap();
        assert_eq!(
            parsed,
            Invocation::InitD {
                ns_args: strings(&["nsA", "bin=/usr/bin"]),
            }
        );
    }

    #[test]
    fn rejects_missing_sections() {
        assert_eq!(parse(&[]), None);
        assert_eq!(parse(&strings(&["prog"])), None);
        assert_eq!(parse(&strings(&["prog", "--", "PATH=/bin"])), None);
        // Namespace list must carry at least the mount name.
        assert_eq!(parse(&strings(&["prog", "--", "--"])), None);
        // And there must be something to exec.
        assert_eq!(parse(&strings(&["--", "nsA", "--"])), None);
        assert_eq!(parse(&strings(&["--init.d"])), None);
    }
}
