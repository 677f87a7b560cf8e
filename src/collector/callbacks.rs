//! Callback registry of a collector.
//!
//! Callbacks are stored as type-erased async functions in registration
//! order. A lifecycle run clones the registry once, so every page sees the
//! callbacks that were registered when it started.

use crate::element::{DataElement, HtmlElement};
use crate::error::{CrawlError, SharedError};
use crate::request::Request;
use crate::response::Response;
use futures_util::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

pub type RequestCallback = Arc<dyn Fn(Arc<Request>) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ResponseCallback = Arc<dyn Fn(Arc<Response>) -> BoxFuture<'static, ()> + Send + Sync>;
pub type HtmlCallback =
    Arc<dyn Fn(HtmlElement) -> BoxFuture<'static, Result<(), CrawlError>> + Send + Sync>;
pub type DataCallback =
    Arc<dyn Fn(DataElement) -> BoxFuture<'static, Result<(), CrawlError>> + Send + Sync>;
pub type ErrorCallback =
    Arc<dyn Fn(Arc<Response>, SharedError) -> BoxFuture<'static, ()> + Send + Sync>;
pub type CleanupCallback = Arc<dyn Fn(Arc<Response>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Options of an `on_html` or `on_paging` registration.
#[derive(Clone, Default)]
pub struct HtmlOptions {
    pub(crate) cleanup: Option<CleanupCallback>,
}

impl HtmlOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` once per page after the registration's elements were handled,
    /// also when a handler failed.
    pub fn with_cleanup<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Response>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cleanup = Some(Arc::new(move |resp| f(resp).boxed()));
        self
    }
}

#[derive(Clone)]
pub(crate) struct HtmlCallbackContainer {
    pub selector: String,
    pub handler: HtmlCallback,
    pub cleanup: Option<CleanupCallback>,
}

#[derive(Clone)]
pub(crate) struct DataCallbackContainer {
    pub selector: String,
    pub handler: DataCallback,
}

#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    pub request: Vec<RequestCallback>,
    pub response: Vec<ResponseCallback>,
    pub html: Vec<HtmlCallbackContainer>,
    pub data: Vec<DataCallbackContainer>,
    pub paging: Vec<HtmlCallbackContainer>,
    pub error: Vec<ErrorCallback>,
    pub scraped: Vec<ResponseCallback>,
}

impl Callbacks {
    pub fn detach_html(&mut self, selector: &str) -> usize {
        let before = self.html.len();
        self.html.retain(|cb| cb.selector != selector);
        before - self.html.len()
    }
}
