//! Process-wide signal gating.
//!
//! The harvest loop receives signals synchronously via `sigwait`, so the
//! gated set must stay blocked from before the first fork until the last
//! child is reaped. Only one [`SignalGate`] may be active at a time, and the
//! supervising thread must be the sole receiver of the gated set while it
//! lives.

use nix::sys::signal::{
    sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};
use tracing::warn;

use crate::error::{Error, Result};

/// Signals blocked while a pipeline is supervised.
pub const GATED_SIGNALS: [Signal; 6] = [
    Signal::SIGCHLD,
    Signal::SIGHUP,
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGPIPE,
];

/// Blocks the gated set and ignores SIGHUP for as long as it lives.
///
/// Children call [`SignalGate::unblock`] after fork so they see default
/// delivery again; SIGHUP stays ignored in them, which is deliberate.
pub struct SignalGate {
    gated: SigSet,
    saved_mask: SigSet,
    saved_hup: SigAction,
}

impl SignalGate {
    pub fn install() -> Result<Self> {
        let mut gated = SigSet::empty();
        for sig in GATED_SIGNALS {
            gated.add(sig);
        }

        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        // SAFETY: SIG_IGN carries no handler that could violate signal safety.
        let saved_hup = unsafe { sigaction(Signal::SIGHUP, &ignore) }
            .map_err(|e| Error::from_nix("sigaction(SIGHUP)", e))?;

        let mut saved_mask = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&gated), Some(&mut saved_mask))
            .map_err(|e| Error::from_nix("sigprocmask(SIG_BLOCK)", e))?;

        Ok(Self {
            gated,
            saved_mask,
            saved_hup,
        })
    }

    /// Restore the pre-install mask. SIGHUP remains ignored.
    pub fn unblock(&self) -> Result<()> {
        sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.saved_mask), None)
            .map_err(|e| Error::from_nix("sigprocmask(SIG_SETMASK)", e))
    }

    /// Wait synchronously for one of the gated signals.
    pub fn wait(&self) -> Result<Signal> {
        self.gated.wait().map_err(|e| Error::from_nix("sigwait", e))
    }
}

impl Drop for SignalGate {
    fn drop(&mut self) {
        if let Err(e) = self.unblock() {
            warn!(error = %e, "restoring signal mask failed");
        }
        // SAFETY: restoring a previously observed disposition.
        if let Err(e) = unsafe { sigaction(Signal::SIGHUP, &self.saved_hup) } {
            warn!(error = %e, "restoring SIGHUP disposition failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread_mask() -> SigSet {
        let mut mask = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_BLOCK, None, Some(&mut mask)).unwrap();
        mask
    }

    #[test]
    fn gate_blocks_and_restores() {
        let before = thread_mask();
        {
            let _gate = SignalGate::install().unwrap();
            let during = thread_mask();
            for sig in GATED_SIGNALS {
                assert!(during.contains(sig), "{sig} should be blocked");
            }
        }
        let after = thread_mask();
        for sig in GATED_SIGNALS {
            assert_eq!(before.contains(sig), after.contains(sig));
        }
    }

    #[test]
    fn unblock_restores_prior_mask() {
        let before = thread_mask();
        let gate = SignalGate::install().unwrap();
        gate.unblock().unwrap();
        let now = thread_mask();
        for sig in GATED_SIGNALS {
            assert_eq!(before.contains(sig), now.contains(sig));
        }
        // Drop restores again; harmless.
    }
}
