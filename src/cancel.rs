//! Cooperative cancellation for long-running engine operations.
//!
//! A `Cancellation` combines an explicit cancel flag (shared between
//! clones) with an optional deadline.  Operations call `check()` at
//! safe points, e.g. between chunks, and abort with
//! `VaultError::Cancelled` as soon as it fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::{Result, VaultError};

#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A signal that never fires unless `cancel` is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that fires once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Cancel this signal and every clone of it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Return `Err(Cancelled)` if the signal has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(VaultError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_signal_is_not_cancelled() {
        assert!(Cancellation::new().check().is_ok());
    }

    #[test]
    fn cancel_propagates_to_clones() {
        let signal = Cancellation::new();
        let clone = signal.clone();
        signal.cancel();
        assert!(matches!(clone.check(), Err(VaultError::Cancelled)));
    }

    #[test]
    fn zero_timeout_fires_immediately() {
        let signal = Cancellation::with_timeout(Duration::ZERO);
        assert!(signal.is_cancelled());
    }
}
