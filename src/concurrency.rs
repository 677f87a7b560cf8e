//! Bounded pool of expensive browser resources.
//!
//! A [`ResourcePool`] is a fixed array of slots behind a counting semaphore.
//! A slot starts empty and is filled lazily by the constructor passed to
//! [`ResourcePool::acquire`] the first time it is leased. Handles are handed
//! out as [`Lease`]s and go back to their slot when the lease is dropped.
//!
//! At most `capacity` leases exist at any moment. Waiters are admitted in
//! semaphore order, but which idle handle a waiter receives is unspecified.

use crate::error::CrawlError;
use parking_lot::Mutex;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

pub struct ResourcePool<T> {
    /// Idle slots. `None` marks a slot whose handle was never created.
    /// Created handles are kept at the back so they are reused first.
    slots: Mutex<Vec<Option<T>>>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    leased: AtomicUsize,
    peak_leased: AtomicUsize,
}

impl<T: Send + 'static> ResourcePool<T> {
    /// Creates a pool with `capacity` empty slots. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            leased: AtomicUsize::new(0),
            peak_leased: AtomicUsize::new(0),
        })
    }

    /// Waits for a free slot and leases its handle, creating it with `create`
    /// if the slot is still empty.
    ///
    /// A failing `create` leaves the slot empty and frees it for the next
    /// caller.
    pub async fn acquire<F, Fut>(self: &Arc<Self>, create: F) -> Result<Lease<T>, CrawlError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CrawlError>>,
    {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| CrawlError::PoolClosed)?;

        let slot = self.slots.lock().pop().flatten();
        let item = match slot {
            Some(item) => item,
            None => {
                trace!("Pool slot is empty, creating a new handle");
                match create().await {
                    Ok(item) => item,
                    Err(e) => {
                        self.slots.lock().insert(0, None);
                        return Err(e);
                    }
                }
            }
        };

        let leased = self.leased.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_leased.fetch_max(leased, Ordering::SeqCst);
        trace!("Leased pool handle ({}/{})", leased, self.capacity);

        Ok(Lease {
            item: Some(item),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    fn release(&self, item: T) {
        self.slots.lock().push(Some(item));
        let leased = self.leased.fetch_sub(1, Ordering::SeqCst) - 1;
        trace!("Released pool handle ({}/{})", leased, self.capacity);
    }

    /// Waits until every lease is returned, closes the pool and hands every
    /// created handle to `visit`. Later acquisitions fail with `PoolClosed`.
    /// Draining a closed pool does nothing.
    pub async fn drain<F, Fut>(&self, mut visit: F)
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let Ok(permits) = self.semaphore.acquire_many(self.capacity as u32).await else {
            debug!("Resource pool already drained");
            return;
        };
        self.semaphore.close();
        let handles: Vec<T> = self.slots.lock().drain(..).flatten().collect();
        debug!("Draining resource pool: {} created handle(s)", handles.len());
        for handle in handles {
            visit(handle).await;
        }
        drop(permits);
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of handles currently leased.
    #[inline]
    pub fn leased(&self) -> usize {
        self.leased.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous leases observed so far.
    #[inline]
    pub fn peak_leased(&self) -> usize {
        self.peak_leased.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// A leased handle. Dropping it returns the handle to the pool.
pub struct Lease<T: Send + 'static> {
    item: Option<T>,
    pool: Arc<ResourcePool<T>>,
    // Declared last: the handle is back in its slot before the permit frees.
    _permit: OwnedSemaphorePermit,
}

impl<T: Send + 'static> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `drop` takes the item out.
        match &self.item {
            Some(item) => item,
            None => unreachable!("lease used after release"),
        }
    }
}

impl<T: Send + 'static> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
