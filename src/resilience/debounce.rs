//! Cancel-and-replace coalescing of repeated checks.
//!
//! Every call to [`Debouncer::run`] takes a ticket and waits out the window.
//! If a newer call took a ticket meanwhile, the older one returns `None`
//! without running; a result that lands after a newer ticket is also dropped.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Run `f` after the window unless superseded.
    pub async fn run<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.window.is_zero() {
            tokio::time::sleep(self.window).await;
        }
        if !self.is_current(ticket) {
            return None;
        }

        let output = f().await;
        if !self.is_current(ticket) {
            return None;
        }
        Some(output)
    }

    /// Drop whatever is queued or in flight.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket
    }
}
