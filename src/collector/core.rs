//! The `Collector` handle: configuration, shared crawl state and callback
//! registration.
//!
//! A `Collector` is a cheap handle over shared state. Clones drive the same
//! session, which is how requests and spawned fetches reach back into it.

use super::callbacks::{Callbacks, DataCallbackContainer, HtmlCallbackContainer, HtmlOptions};
use crate::browser::{Browser, Page};
use crate::builder::{CollectorBuilder, CollectorConfig};
use crate::concurrency::ResourcePool;
use crate::context::Context;
use crate::element::{DataElement, HtmlElement};
use crate::error::{CrawlError, SharedError};
use crate::request::{Request, SerializedRequest};
use crate::response::Response;
use crate::state::CollectorState;
use crate::stats::StatCollector;
use crate::url_filter::normalize_url;
use crate::visited::VisitedStore;
use futures_util::future::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub(crate) struct CollectorInner {
    pub config: CollectorConfig,
    pub browser: Arc<dyn Browser>,
    pub visited: RwLock<Arc<dyn VisitedStore>>,
    pub callbacks: RwLock<Callbacks>,
    /// Pages of async mode, one per concurrent fetch.
    pub pool: Arc<ResourcePool<Arc<dyn Page>>>,
    /// The single page of sync mode, shared by nested visits.
    pub shared_page: OnceCell<Arc<dyn Page>>,
    pub request_count: AtomicU32,
    pub response_count: AtomicU32,
    pub page_num: AtomicU32,
    pub next_request_id: AtomicU32,
    pub state: CollectorState,
    pub stats: StatCollector,
}

/// Drives the fetch lifecycle of one crawl session.
///
/// Register callbacks before the first `visit`. Registering while a crawl is
/// in flight is not supported: pages already being processed keep the
/// callbacks they started with.
#[derive(Clone)]
pub struct Collector {
    pub(crate) inner: Arc<CollectorInner>,
}

impl Collector {
    pub fn builder() -> CollectorBuilder {
        CollectorBuilder::new()
    }

    pub(crate) fn new(
        config: CollectorConfig,
        browser: Arc<dyn Browser>,
        visited: Arc<dyn VisitedStore>,
    ) -> Self {
        let capacity = if config.async_mode {
            config.parallelism
        } else {
            1
        };
        Collector {
            inner: Arc::new(CollectorInner {
                pool: ResourcePool::new(capacity),
                config,
                browser,
                visited: RwLock::new(visited),
                callbacks: RwLock::new(Callbacks::default()),
                shared_page: OnceCell::new(),
                request_count: AtomicU32::new(0),
                response_count: AtomicU32::new(0),
                page_num: AtomicU32::new(0),
                next_request_id: AtomicU32::new(0),
                state: CollectorState::new(),
                stats: StatCollector::new(),
            }),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> &StatCollector {
        &self.inner.stats
    }

    pub fn state(&self) -> &CollectorState {
        &self.inner.state
    }

    /// Requests issued so far.
    pub fn request_count(&self) -> u32 {
        self.inner.request_count.load(Ordering::SeqCst)
    }

    /// Responses received so far.
    pub fn response_count(&self) -> u32 {
        self.inner.response_count.load(Ordering::SeqCst)
    }

    pub fn pool_capacity(&self) -> usize {
        self.inner.pool.capacity()
    }

    /// Highest number of pool pages leased at once during this session.
    pub fn peak_leased_pages(&self) -> usize {
        self.inner.pool.peak_leased()
    }

    /// Records the current pagination page, checked against `max_page_num`.
    pub fn update_page_num(&self, n: u32) {
        self.inner.page_num.store(n, Ordering::SeqCst);
    }

    pub fn page_num(&self) -> u32 {
        self.inner.page_num.load(Ordering::SeqCst)
    }

    pub(crate) fn next_request_id(&self) -> u32 {
        self.inner.next_request_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Starts a crawl at `url` with depth 1.
    ///
    /// In sync mode this returns once the whole crawl branch is done and
    /// reports its first error. In async mode the fetch is spawned and its
    /// errors go to `on_error`; only a malformed `url` is returned.
    pub async fn visit(&self, url: &str) -> Result<(), CrawlError> {
        normalize_url(url)?;
        self.scrape(url, 1, None).await
    }

    /// Resolves once every fetch spawned in async mode has finished.
    pub async fn wait(&self) {
        self.inner.state.wait_idle().await;
    }

    /// Replaces the visited store after initializing the new one.
    pub async fn set_storage(&self, store: Arc<dyn VisitedStore>) -> Result<(), CrawlError> {
        store.init().await?;
        *self.inner.visited.write() = store;
        debug!("Visited store replaced");
        Ok(())
    }

    pub(crate) fn visited_store(&self) -> Arc<dyn VisitedStore> {
        self.inner.visited.read().clone()
    }

    /// Rebuilds a request from its wire form. The request gets a fresh ID
    /// from this collector.
    pub fn unmarshal_request(&self, bytes: &[u8]) -> Result<Request, CrawlError> {
        let wire = SerializedRequest::from_bytes(bytes)?;
        let url = normalize_url(&wire.url)?;
        Ok(Request::new(
            self.next_request_id(),
            url,
            wire.depth.max(1),
            Context::from_map(wire.ctx),
            self.clone(),
        ))
    }

    /// Closes every page and the browser session. Waits for leased pages to
    /// come back first.
    pub async fn close(&self) -> Result<(), CrawlError> {
        info!("Closing collector. {}", self);
        self.inner
            .pool
            .drain(|page| async move {
                if let Err(e) = page.close().await {
                    warn!("Failed to close page: {}", e);
                }
            })
            .await;
        if let Some(page) = self.inner.shared_page.get() {
            page.close().await?;
        }
        self.inner.browser.close().await
    }

    pub fn on_request<F, Fut>(&self, f: F)
    where
        F: Fn(Arc<Request>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .callbacks
            .write()
            .request
            .push(Arc::new(move |req| f(req).boxed()));
    }

    pub fn on_response<F, Fut>(&self, f: F)
    where
        F: Fn(Arc<Response>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .callbacks
            .write()
            .response
            .push(Arc::new(move |resp| f(resp).boxed()));
    }

    /// Calls `f` for every live element matching `selector`. A page without
    /// any match reports `NoElementFound`.
    pub fn on_html<F, Fut>(&self, selector: &str, f: F)
    where
        F: Fn(HtmlElement) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CrawlError>> + Send + 'static,
    {
        self.on_html_with(selector, f, HtmlOptions::default());
    }

    pub fn on_html_with<F, Fut>(&self, selector: &str, f: F, options: HtmlOptions)
    where
        F: Fn(HtmlElement) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CrawlError>> + Send + 'static,
    {
        self.inner.callbacks.write().html.push(HtmlCallbackContainer {
            selector: selector.to_string(),
            handler: Arc::new(move |e| f(e).boxed()),
            cleanup: options.cleanup,
        });
    }

    /// Removes every `on_html` registration for `selector`.
    pub fn on_html_detach(&self, selector: &str) {
        let removed = self.inner.callbacks.write().detach_html(selector);
        debug!("Detached {} html callback(s) for {:?}", removed, selector);
    }

    /// Calls `f` for every element matching `selector` in a static parse of
    /// the page. Pages without a match are not an error here.
    pub fn on_data<F, Fut>(&self, selector: &str, f: F)
    where
        F: Fn(DataElement) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CrawlError>> + Send + 'static,
    {
        self.inner.callbacks.write().data.push(DataCallbackContainer {
            selector: selector.to_string(),
            handler: Arc::new(move |e| f(e).boxed()),
        });
    }

    /// Like [`Collector::on_html`], run after it, for "next page" elements.
    pub fn on_paging<F, Fut>(&self, selector: &str, f: F)
    where
        F: Fn(HtmlElement) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CrawlError>> + Send + 'static,
    {
        self.on_paging_with(selector, f, HtmlOptions::default());
    }

    pub fn on_paging_with<F, Fut>(&self, selector: &str, f: F, options: HtmlOptions)
    where
        F: Fn(HtmlElement) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CrawlError>> + Send + 'static,
    {
        self.inner
            .callbacks
            .write()
            .paging
            .push(HtmlCallbackContainer {
                selector: selector.to_string(),
                handler: Arc::new(move |e| f(e).boxed()),
                cleanup: options.cleanup,
            });
    }

    pub fn on_error<F, Fut>(&self, f: F)
    where
        F: Fn(Arc<Response>, SharedError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .callbacks
            .write()
            .error
            .push(Arc::new(move |resp, err| f(resp, err).boxed()));
    }

    pub fn on_scraped<F, Fut>(&self, f: F)
    where
        F: Fn(Arc<Response>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .callbacks
            .write()
            .scraped
            .push(Arc::new(move |resp| f(resp).boxed()));
    }
}

impl std::fmt::Display for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let callbacks = self.inner.callbacks.read();
        write!(
            f,
            "Requests made: {} ({} responses) | Callbacks: OnRequest: {}, OnHTML: {}, OnData: {}, OnPaging: {}, OnResponse: {}, OnError: {} | Peak pages: {}",
            self.request_count(),
            self.response_count(),
            callbacks.request.len(),
            callbacks.html.len(),
            callbacks.data.len(),
            callbacks.paging.len(),
            callbacks.response.len(),
            callbacks.error.len(),
            self.peak_leased_pages(),
        )
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("config", &self.inner.config)
            .field("requests", &self.request_count())
            .field("responses", &self.response_count())
            .finish()
    }
}
