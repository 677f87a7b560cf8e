//! # Browser Capability
//!
//! The collector never drives a browser engine itself. It talks to one through
//! three traits:
//!
//! - [`Browser`]: a session that opens pages.
//! - [`Page`]: one tab. It navigates, reports when it is loaded, answers
//!   element queries and can go back in its history.
//! - [`Element`]: a node found by a query, exposing text, attributes and click.
//!
//! Element handles are only valid for the document they were queried from.
//! A page that navigates, or whose DOM changes, may leave earlier handles
//! pointing at nodes that no longer exist, which is why the collector
//! re-queries before every element it hands to a callback.
//!
//! [`memory::MemoryBrowser`] serves fixture pages from memory and is what the
//! tests drive.

pub mod memory;

use crate::error::CrawlError;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

pub use memory::MemoryBrowser;

/// Settings applied to every page a collector opens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub user_agent: Option<String>,
    pub headless: bool,
    /// Proxy server for this page, chosen from the collector's proxy list.
    pub proxy: Option<String>,
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn open_page(&self, options: &SessionOptions) -> Result<Arc<dyn Page>, CrawlError>;

    /// Ends the session. Pages opened from it must not be used afterwards.
    async fn close(&self) -> Result<(), CrawlError>;
}

#[async_trait]
pub trait Page: Send + Sync {
    async fn navigate(&self, url: &Url) -> Result<(), CrawlError>;

    /// Resolves once the current document has finished loading.
    async fn wait_loaded(&self) -> Result<(), CrawlError>;

    /// Every element of the current document matching `selector`, in document
    /// order. An empty vector means no match.
    async fn query_elements(&self, selector: &str) -> Result<Vec<Arc<dyn Element>>, CrawlError>;

    async fn go_back(&self) -> Result<(), CrawlError>;

    /// Serialized HTML of the current document.
    async fn html(&self) -> Result<String, CrawlError>;

    async fn current_url(&self) -> Option<Url>;

    async fn close(&self) -> Result<(), CrawlError>;
}

#[async_trait]
pub trait Element: Send + Sync {
    async fn text(&self) -> Result<String, CrawlError>;

    async fn attribute(&self, name: &str) -> Result<Option<String>, CrawlError>;

    async fn click(&self) -> Result<(), CrawlError>;
}
