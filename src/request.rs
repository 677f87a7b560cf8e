//! # Request
//!
//! One navigation attempt: a URL, its depth in the crawl tree, the context
//! bag shared with its parent, and the collector that owns it.
//!
//! Requests are created by the collector once a URL has passed every check.
//! Callbacks receive them as `Arc<Request>` and use them to crawl further:
//!
//! - [`Request::visit`] follows a link one level deeper.
//! - [`Request::fork`] creates a sibling request at the same depth, which
//!   [`Request::perform`] then runs.
//!
//! ## Wire form
//!
//! Queued requests travel as JSON objects with the fields `ID`, `URL`,
//! `Depth` and `Ctx` ([`SerializedRequest`]). Any queue storage backend must
//! round-trip that shape unchanged.

use crate::collector::Collector;
use crate::context::Context;
use crate::error::CrawlError;
use crate::url_filter::{absolute_url, normalize_url};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use url::Url;

pub struct Request {
    id: u32,
    url: Url,
    depth: usize,
    ctx: Context,
    abort: AtomicBool,
    base_url: RwLock<Option<Url>>,
    collector: Collector,
}

impl Request {
    pub(crate) fn new(id: u32, url: Url, depth: usize, ctx: Context, collector: Collector) -> Self {
        Self {
            id,
            url,
            depth,
            ctx,
            abort: AtomicBool::new(false),
            base_url: RwLock::new(None),
            collector,
        }
    }

    /// Session-scoped identifier. Stub requests describing a rejected URL
    /// carry 0.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Number of requests between this one and the seed, the seed being 1.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Vetoes the fetch. Only effective from a request callback.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub(crate) fn set_base_url(&self, base: Url) {
        *self.base_url.write() = Some(base);
    }

    /// Resolves `href` against the document's `<base href>` if one was seen,
    /// otherwise against the request URL. Fragment-only references resolve to
    /// `None`.
    pub fn absolute_url(&self, href: &str) -> Option<Url> {
        let base = self.base_url.read().clone();
        absolute_url(base.as_ref().unwrap_or(&self.url), href)
    }

    /// Visits `href` one level deeper, sharing this request's context.
    pub async fn visit(&self, href: &str) -> Result<(), CrawlError> {
        if href.trim_start().starts_with('#') {
            debug!("{}: skipping fragment link {:?}", self.id_string(), href);
            return Ok(());
        }
        let target = self
            .absolute_url(href)
            .map(String::from)
            .unwrap_or_else(|| href.to_string());
        self.collector
            .scrape(&target, self.depth + 1, Some(self.ctx.clone()))
            .await
    }

    /// A new request for `url` at this request's depth, sharing its context
    /// and carrying a fresh ID. Run it with [`Request::perform`].
    pub fn fork(&self, url: &str) -> Result<Request, CrawlError> {
        let url = normalize_url(url)?;
        Ok(Request::new(
            self.collector.next_request_id(),
            url,
            self.depth,
            self.ctx.clone(),
            self.collector.clone(),
        ))
    }

    /// Runs the full lifecycle for this request's URL, depth and context.
    pub async fn perform(&self) -> Result<(), CrawlError> {
        self.collector
            .scrape(self.url.as_str(), self.depth, Some(self.ctx.clone()))
            .await
    }

    pub fn to_serialized(&self) -> SerializedRequest {
        SerializedRequest {
            id: self.id,
            url: self.url.to_string(),
            depth: self.depth,
            ctx: self.ctx.to_map(),
        }
    }

    pub fn marshal(&self) -> Result<Vec<u8>, CrawlError> {
        self.to_serialized().to_bytes()
    }

    /// Short identity used in log lines and error messages.
    pub fn id_string(&self) -> String {
        format!("R-{}#{}", self.id, self.depth)
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} | {}", self.id_string(), self.url)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("depth", &self.depth)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedRequest {
    #[serde(rename = "ID", default)]
    pub id: u32,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Depth", default)]
    pub depth: usize,
    #[serde(rename = "Ctx", default)]
    pub ctx: Map<String, Value>,
}

impl SerializedRequest {
    /// A depth-1 request for `url` with an empty context.
    pub fn seed(url: &Url) -> Self {
        Self {
            id: 0,
            url: url.to_string(),
            depth: 1,
            ctx: Map::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CrawlError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CrawlError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
