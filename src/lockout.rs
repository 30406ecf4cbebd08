//! Brute-force lockout, derived from the attempt ledger.
//!
//! There is no mutable counter to reset or desynchronize: an email is
//! locked exactly when the ledger holds at least `threshold` failures
//! inside the sliding window. Entries aging out of the window end the
//! lockout; a successful login does not erase history. Two requests
//! racing past the count may admit one extra attempt; the window makes
//! that harmless and the read-only derivation is worth it.

use std::time::Duration;

use crate::error::Result;
use crate::store::AuthStore;

pub const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
pub const DEFAULT_LOCKOUT_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy)]
pub struct LockoutTracker {
    threshold: u32,
    window: Duration,
}

impl Default for LockoutTracker {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            window: DEFAULT_LOCKOUT_WINDOW,
        }
    }
}

impl LockoutTracker {
    #[must_use]
    pub const fn new(threshold: u32, window: Duration) -> Self {
        Self { threshold, window }
    }

    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Failed attempts for this email currently inside the window.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn failures(&self, store: &dyn AuthStore, email: &str) -> Result<u64> {
        store.count_recent_failures(email, self.window).await
    }

    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn is_locked(&self, store: &dyn AuthStore, email: &str) -> Result<bool> {
        let failures = self.failures(store, email).await?;
        Ok(failures >= u64::from(self.threshold))
    }
}
