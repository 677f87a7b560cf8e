//! In-memory browser serving fixture HTML.
//!
//! `MemoryBrowser` maps normalized URLs to HTML documents. A page keeps a
//! history of the URLs it visited and reads the document of its current URL
//! on every query, so replacing a site's HTML while a page shows it behaves
//! like a DOM mutation. Clicking an element with an `href` navigates its page.
//!
//! The browser also records what happened to it: pages opened, navigations,
//! and the peak number of navigations in progress at the same time.

use super::{Browser, Element, Page, SessionOptions};
use crate::element::{ElementSnapshot, snapshot_document};
use crate::error::CrawlError;
use crate::url_filter::{absolute_url, normalize_url};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::trace;
use url::Url;

#[derive(Default)]
struct Site {
    documents: DashMap<String, String>,
    latency: Mutex<Option<Duration>>,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    navigating: AtomicUsize,
    peak_navigating: AtomicUsize,
    navigations: Mutex<Vec<Url>>,
    sessions: Mutex<Vec<SessionOptions>>,
    closed: AtomicBool,
}

impl Site {
    fn document(&self, url: &Url) -> Option<String> {
        self.documents.get(url.as_str()).map(|d| d.value().clone())
    }
}

#[derive(Clone, Default)]
pub struct MemoryBrowser {
    site: Arc<Site>,
}

impl MemoryBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `html` at `url`, replacing any previous document there.
    pub fn add_page(&self, url: &str, html: impl Into<String>) -> Result<(), CrawlError> {
        let url = normalize_url(url)?;
        self.site.documents.insert(url.as_str().to_string(), html.into());
        Ok(())
    }

    pub fn with_page(self, url: &str, html: impl Into<String>) -> Result<Self, CrawlError> {
        self.add_page(url, html)?;
        Ok(self)
    }

    /// Makes every navigation take `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.site.latency.lock() = Some(latency);
        self
    }

    pub fn pages_opened(&self) -> usize {
        self.site.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.site.pages_closed.load(Ordering::SeqCst)
    }

    /// Highest number of navigations that were in progress at once.
    pub fn peak_concurrent_navigations(&self) -> usize {
        self.site.peak_navigating.load(Ordering::SeqCst)
    }

    /// Every URL navigated to, in order.
    pub fn navigations(&self) -> Vec<Url> {
        self.site.navigations.lock().clone()
    }

    /// Options of every page opened, in order.
    pub fn sessions(&self) -> Vec<SessionOptions> {
        self.site.sessions.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.site.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Browser for MemoryBrowser {
    async fn open_page(&self, options: &SessionOptions) -> Result<Arc<dyn Page>, CrawlError> {
        if self.is_closed() {
            return Err(CrawlError::Browser("browser session is closed".into()));
        }
        let id = self.site.pages_opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.site.sessions.lock().push(options.clone());
        trace!("Opened memory page {}", id);
        Ok(Arc::new(MemoryPage {
            inner: Arc::new(PageInner {
                site: Arc::clone(&self.site),
                history: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }))
    }

    async fn close(&self) -> Result<(), CrawlError> {
        self.site.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct PageInner {
    site: Arc<Site>,
    history: Mutex<Vec<Url>>,
    closed: AtomicBool,
}

impl PageInner {
    fn ensure_open(&self) -> Result<(), CrawlError> {
        if self.closed.load(Ordering::SeqCst) || self.site.closed.load(Ordering::SeqCst) {
            return Err(CrawlError::Browser("page is closed".into()));
        }
        Ok(())
    }

    fn current(&self) -> Option<Url> {
        self.history.lock().last().cloned()
    }

    async fn navigate(&self, url: &Url) -> Result<(), CrawlError> {
        self.ensure_open()?;
        let now = self.site.navigating.fetch_add(1, Ordering::SeqCst) + 1;
        self.site.peak_navigating.fetch_max(now, Ordering::SeqCst);

        let latency = *self.site.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.site.navigating.fetch_sub(1, Ordering::SeqCst);

        self.site.navigations.lock().push(url.clone());
        if self.site.document(url).is_none() {
            return Err(CrawlError::Navigation {
                url: url.to_string(),
                reason: "404 Not Found".into(),
            });
        }
        self.history.lock().push(url.clone());
        Ok(())
    }

    fn current_document(&self) -> Result<(Url, String), CrawlError> {
        self.ensure_open()?;
        let url = self
            .current()
            .ok_or_else(|| CrawlError::Browser("page has not navigated yet".into()))?;
        let html = self.site.document(&url).unwrap_or_default();
        Ok((url, html))
    }
}

pub struct MemoryPage {
    inner: Arc<PageInner>,
}

#[async_trait]
impl Page for MemoryPage {
    async fn navigate(&self, url: &Url) -> Result<(), CrawlError> {
        self.inner.navigate(url).await
    }

    async fn wait_loaded(&self) -> Result<(), CrawlError> {
        self.inner.ensure_open()
    }

    async fn query_elements(&self, selector: &str) -> Result<Vec<Arc<dyn Element>>, CrawlError> {
        let (url, html) = self.inner.current_document()?;
        let elements = snapshot_document(&html, selector)?
            .elements
            .into_iter()
            .map(|snapshot| {
                Arc::new(MemoryElement {
                    snapshot,
                    document_url: url.clone(),
                    page: Arc::clone(&self.inner),
                }) as Arc<dyn Element>
            })
            .collect();
        Ok(elements)
    }

    async fn go_back(&self) -> Result<(), CrawlError> {
        self.inner.ensure_open()?;
        let mut history = self.inner.history.lock();
        if history.len() > 1 {
            history.pop();
        }
        Ok(())
    }

    async fn html(&self) -> Result<String, CrawlError> {
        Ok(self.inner.current_document()?.1)
    }

    async fn current_url(&self) -> Option<Url> {
        self.inner.current()
    }

    async fn close(&self) -> Result<(), CrawlError> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.site.pages_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryElement {
    snapshot: ElementSnapshot,
    document_url: Url,
    page: Arc<PageInner>,
}

#[async_trait]
impl Element for MemoryElement {
    async fn text(&self) -> Result<String, CrawlError> {
        Ok(self.snapshot.text.clone())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>, CrawlError> {
        Ok(self.snapshot.attributes.get(name).cloned())
    }

    async fn click(&self) -> Result<(), CrawlError> {
        let Some(href) = self.snapshot.attributes.get("href") else {
            return Ok(());
        };
        match absolute_url(&self.document_url, href) {
            Some(target) => self.page.navigate(&target).await,
            None => Ok(()),
        }
    }
}
