//! Progress reporting and cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Receives fractional progress values in `[0, 1]`
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, fraction: f64);
}

impl<F> ProgressObserver for F
where
    F: Fn(f64) + Send + Sync,
{
    fn on_progress(&self, fraction: f64) {
        self(fraction)
    }
}

/// Observer that discards every report
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _fraction: f64) {}
}

/// Forwards clamped, non-decreasing values to an observer
pub(crate) struct MonotonicProgress<'a> {
    observer: &'a dyn ProgressObserver,
    last: f64,
}

impl<'a> MonotonicProgress<'a> {
    pub fn new(observer: &'a dyn ProgressObserver) -> Self {
        MonotonicProgress { observer, last: 0.0 }
    }

    pub fn report(&mut self, fraction: f64) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        self.last = self.last.max(fraction);
        self.observer.on_progress(self.last);
    }
}

/// Shared flag used to abort an in-flight operation
///
/// Clones share the flag; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation so the handle can be reused
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel is not missed
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Fail with `Error::Cancelled` once cancellation was requested
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
