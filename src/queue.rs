//! # Queue Module
//!
//! A work queue that feeds serialized requests to a pool of workers.
//!
//! ## Overview
//!
//! The `Queue` decouples the code that produces URLs from the workers that
//! crawl them. Producers call [`Queue::add_url`] or [`Queue::add_request`],
//! which serialize the request and push it to a [`QueueStorage`] backend.
//! [`Queue::run`] then spawns the workers and a dispatch loop that moves
//! requests from the storage to free workers until the storage is drained
//! and every worker is idle.
//!
//! Callbacks may add to the queue while it runs. The dispatch loop is woken
//! by every addition and only stops once the storage is empty and no worker
//! holds a request that could still produce more work.
//!
//! ## Storage
//!
//! [`InMemoryQueueStorage`] keeps requests in a FIFO list. Other backends
//! implement [`QueueStorage`] and must round-trip the JSON wire form of
//! [`SerializedRequest`] unchanged.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pagewalk::queue::Queue;
//!
//! let queue = Queue::new(2, None).await?;
//! for page in 1..=10 {
//!     queue.add_url(&format!("https://example.com/list?page={page}")).await?;
//! }
//! queue.run(&collector).await?;
//! ```

use crate::collector::Collector;
use crate::error::CrawlError;
use crate::request::{Request, SerializedRequest};
use crate::url_filter::normalize_url;
use async_trait::async_trait;
use kanal::{AsyncReceiver, AsyncSender, bounded_async, unbounded_async};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the storage a queue creates when none is given.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

/// Backend holding serialized requests. Implementations must be safe for
/// concurrent producers and consumers.
#[async_trait]
pub trait QueueStorage: Send + Sync {
    /// Prepares the backend. Called once by [`Queue::new`].
    async fn init(&self) -> Result<(), CrawlError> {
        Ok(())
    }

    /// Appends a serialized request. Fails with `QueueFull` when the backend
    /// is at capacity.
    async fn add_request(&self, request: Vec<u8>) -> Result<(), CrawlError>;

    /// Takes the oldest request, or `None` when the backend is drained.
    async fn get_request(&self) -> Result<Option<Vec<u8>>, CrawlError>;

    async fn queue_size(&self) -> Result<usize, CrawlError>;
}

/// FIFO storage in process memory.
#[derive(Debug, Default)]
pub struct InMemoryQueueStorage {
    /// Zero means unbounded.
    max_size: usize,
    items: Mutex<VecDeque<Vec<u8>>>,
}

impl InMemoryQueueStorage {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            items: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl QueueStorage for InMemoryQueueStorage {
    async fn add_request(&self, request: Vec<u8>) -> Result<(), CrawlError> {
        let mut items = self.items.lock();
        if self.max_size > 0 && items.len() >= self.max_size {
            return Err(CrawlError::QueueFull);
        }
        items.push_back(request);
        Ok(())
    }

    async fn get_request(&self) -> Result<Option<Vec<u8>>, CrawlError> {
        Ok(self.items.lock().pop_front())
    }

    async fn queue_size(&self) -> Result<usize, CrawlError> {
        Ok(self.items.lock().len())
    }
}

pub struct Queue {
    workers: usize,
    storage: Arc<dyn QueueStorage>,
    wake: Notify,
    running: AtomicBool,
    stopped: AtomicBool,
}

/// Clears the running and stopped flags however `run` exits.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    stopped: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.stopped.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Queue {
    /// Creates a queue with `workers` consumers over `storage`, or over an
    /// in-memory storage of [`DEFAULT_QUEUE_CAPACITY`] when `None`.
    pub async fn new(
        workers: usize,
        storage: Option<Arc<dyn QueueStorage>>,
    ) -> Result<Self, CrawlError> {
        let storage = storage
            .unwrap_or_else(|| Arc::new(InMemoryQueueStorage::new(DEFAULT_QUEUE_CAPACITY)));
        storage.init().await?;
        if workers == 0 {
            warn!("Queue created with zero workers, using one");
        }
        Ok(Self {
            workers: workers.max(1),
            storage,
            wake: Notify::new(),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Queues `url` as a new crawl root with depth 1.
    pub async fn add_url(&self, url: &str) -> Result<(), CrawlError> {
        let url = normalize_url(url)?;
        self.store(SerializedRequest::seed(&url).to_bytes()?).await
    }

    /// Queues `request` with its depth and context.
    pub async fn add_request(&self, request: &Request) -> Result<(), CrawlError> {
        self.store(request.marshal()?).await
    }

    async fn store(&self, bytes: Vec<u8>) -> Result<(), CrawlError> {
        self.storage.add_request(bytes).await?;
        trace!("Request added to queue");
        self.wake.notify_one();
        Ok(())
    }

    pub async fn size(&self) -> Result<usize, CrawlError> {
        self.storage.queue_size().await
    }

    /// Whether the storage holds no request. A storage that cannot report
    /// its size counts as empty.
    pub async fn is_empty(&self) -> bool {
        match self.size().await {
            Ok(size) => size == 0,
            Err(e) => {
                warn!("Queue size unavailable: {}", e);
                true
            }
        }
    }

    /// Stops dispatching. A running `run` returns once the workers have
    /// finished the requests already handed to them. What is left in the
    /// storage stays there. A stop issued before `run` makes the next `run`
    /// return without dispatching.
    pub fn stop(&self) {
        info!("Queue stop requested");
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Consumes the queue with `collector` until it is drained or stopped.
    ///
    /// Every request is performed through `collector`. Pair a queue that has
    /// more than one worker with an async-mode collector: a sync-mode
    /// collector shares a single page between all of its callers. In async
    /// mode the queue also waits for the fetches the workers spawned.
    pub async fn run(&self, collector: &Collector) -> Result<(), CrawlError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CrawlError::QueueAlreadyRunning);
        }
        let _guard = RunGuard {
            running: &self.running,
            stopped: &self.stopped,
        };

        let (dispatch_tx, dispatch_rx) = bounded_async::<Request>(0);
        let (done_tx, done_rx) = unbounded_async::<()>();

        let mut handles = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let requests = dispatch_rx.clone();
            let done = done_tx.clone();
            handles.push(tokio::spawn(async move {
                while let Ok(request) = requests.recv().await {
                    debug!("Worker {} performing {}", worker, request);
                    if let Err(e) = request.perform().await {
                        warn!("Worker {}: {} failed: {}", worker, request.url(), e);
                    }
                    if done.send(()).await.is_err() {
                        break;
                    }
                }
                trace!("Worker {} finished", worker);
            }));
        }
        drop(dispatch_rx);
        drop(done_tx);

        info!("Queue running with {} workers", self.workers);
        let result = self.dispatch(collector, &dispatch_tx, &done_rx).await;

        // Closing the dispatch channel lets the workers finish what they hold.
        drop(dispatch_tx);
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Queue worker panicked: {}", e);
            }
        }
        info!("Queue finished");
        result
    }

    async fn dispatch(
        &self,
        collector: &Collector,
        dispatch_tx: &AsyncSender<Request>,
        done_rx: &AsyncReceiver<()>,
    ) -> Result<(), CrawlError> {
        let mut active = 0usize;
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                info!("Queue stopped with {} request(s) in flight", active);
                return Ok(());
            }

            if active < self.workers {
                match self.next_request(collector).await? {
                    Some(request) => {
                        trace!("Dispatching {}", request);
                        if dispatch_tx.send(request).await.is_err() {
                            error!("All queue workers are gone");
                            return Ok(());
                        }
                        active += 1;
                        continue;
                    }
                    None if active == 0 => {
                        if collector.state().is_idle() {
                            return Ok(());
                        }
                        // spawned fetches may still feed the queue
                        tokio::select! {
                            _ = collector.wait() => {}
                            _ = self.wake.notified() => {}
                        }
                        continue;
                    }
                    None => {}
                }
            }

            tokio::select! {
                done = done_rx.recv() => {
                    if done.is_err() {
                        return Ok(());
                    }
                    active -= 1;
                }
                _ = self.wake.notified() => {
                    trace!("Queue woken");
                }
            }
        }
    }

    /// Takes the next decodable request from the storage. Entries that do
    /// not decode are dropped.
    async fn next_request(&self, collector: &Collector) -> Result<Option<Request>, CrawlError> {
        while let Some(bytes) = self.storage.get_request().await? {
            match collector.unmarshal_request(&bytes) {
                Ok(request) => return Ok(Some(request)),
                Err(e) => warn!("Skipping undecodable queue entry: {}", e),
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("workers", &self.workers)
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}
