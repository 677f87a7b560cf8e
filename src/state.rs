//! Module for tracking the live activity of a collector.
//!
//! `CollectorState` counts the fetches spawned in async mode and the pages
//! currently being processed. `Collector::wait` blocks on it until every
//! spawned fetch has finished.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct CollectorState {
    /// Spawned fetches that have not completed yet.
    pub in_flight_fetches: AtomicUsize,
    /// Pages whose callbacks are running right now.
    pub processing_pages: AtomicUsize,
    idle: Notify,
}

impl CollectorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fetch_spawned(&self) {
        self.in_flight_fetches.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn fetch_finished(&self) {
        if self.in_flight_fetches.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// True when no spawned fetch is outstanding.
    pub fn is_idle(&self) -> bool {
        self.in_flight_fetches.load(Ordering::SeqCst) == 0
    }

    /// Resolves once no spawned fetch is outstanding. Fetches spawned by
    /// other fetches are counted before their parent finishes, so the count
    /// only reaches zero when the whole crawl tree is done.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps the processing-pages gauge accurate on every exit path.
pub(crate) struct ProcessingGuard<'a>(&'a CollectorState);

impl<'a> ProcessingGuard<'a> {
    pub(crate) fn enter(state: &'a CollectorState) -> Self {
        state.processing_pages.fetch_add(1, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.processing_pages.fetch_sub(1, Ordering::SeqCst);
    }
}
