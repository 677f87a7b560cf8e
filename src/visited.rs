//! # Visited Store
//!
//! Records fingerprints of URLs the collector has already scheduled, so a URL
//! is fetched at most once per session unless revisits are allowed.
//!
//! The default [`InMemoryVisitedStore`] lives as long as its collector.
//! Implement [`VisitedStore`] over a shared backend to let several collectors,
//! or several processes, share one crawl frontier. Entries are never evicted.

use crate::error::CrawlError;
use async_trait::async_trait;
use dashmap::DashSet;
use tracing::trace;

/// Presence store for URL fingerprints. Implementations must be safe for
/// concurrent callers.
#[async_trait]
pub trait VisitedStore: Send + Sync {
    /// Prepares the backend. Called once before the store is used.
    async fn init(&self) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn is_visited(&self, fingerprint: u64) -> Result<bool, CrawlError>;

    async fn mark_visited(&self, fingerprint: u64) -> Result<(), CrawlError>;

    /// Marks `fingerprint` and returns `true` if it was not marked before.
    ///
    /// The provided implementation is a plain check followed by a mark.
    /// Backends with an atomic set-if-absent should override it.
    async fn check_and_mark(&self, fingerprint: u64) -> Result<bool, CrawlError> {
        if self.is_visited(fingerprint).await? {
            return Ok(false);
        }
        self.mark_visited(fingerprint).await?;
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryVisitedStore {
    visited: DashSet<u64>,
}

impl InMemoryVisitedStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.visited.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
}

#[async_trait]
impl VisitedStore for InMemoryVisitedStore {
    async fn is_visited(&self, fingerprint: u64) -> Result<bool, CrawlError> {
        Ok(self.visited.contains(&fingerprint))
    }

    async fn mark_visited(&self, fingerprint: u64) -> Result<(), CrawlError> {
        trace!("Marking fingerprint as visited: {:016x}", fingerprint);
        self.visited.insert(fingerprint);
        Ok(())
    }

    async fn check_and_mark(&self, fingerprint: u64) -> Result<bool, CrawlError> {
        Ok(self.visited.insert(fingerprint))
    }
}
