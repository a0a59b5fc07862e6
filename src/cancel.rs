//! Cooperative cancellation for long-running operations.
//!
//! A [`CancelToken`] is a cheap, cloneable flag checked at every suspension
//! point of the save/restore pipelines: file reads, channel sends and
//! receives, store writes. Cancelled operations remove their staging state
//! and exit with code 130.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, RinneError};

/// Shared cancellation flag. Cloning shares the underlying flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RinneError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wires the token to Ctrl+C. The first signal flips the flag; the
    /// pipelines drain and clean up on their own.
    pub fn install_ctrlc(&self) {
        let token = self.clone();
        // A second Ctrl+C while draining is ignored; the handler stays alive
        // for the process lifetime.
        let _ = ctrlc::set_handler(move || token.cancel());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flips_flag_for_all_clones() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        assert!(a.check().is_ok());

        a.cancel();
        assert!(b.is_cancelled());
        assert!(matches!(b.check(), Err(RinneError::Cancelled)));
    }
}
