use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// One-shot signal shared by every loop that depends on a connection.
///
/// Clones observe the same event. [`Event::fire`] succeeds exactly once.
#[derive(Debug, Clone, Default)]
pub struct Event {
    fired: Arc<AtomicBool>,
    token: CancellationToken,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the event. Returns true only for the call that fired it.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once the event has fired.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}
