//! Element wrappers handed to extraction callbacks.
//!
//! [`HtmlElement`] wraps a live browser element. Its accessors go to the
//! browser, and `click` may change the page under every other handle.
//! [`DataElement`] is an owned snapshot taken from a static parse of the page
//! HTML, for callbacks that only read.

use crate::browser::Element;
use crate::error::CrawlError;
use crate::request::Request;
use crate::response::Response;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// A live element matched by an `on_html` or `on_paging` selector.
#[derive(Clone)]
pub struct HtmlElement {
    selector: String,
    index: usize,
    element: Arc<dyn Element>,
    response: Arc<Response>,
}

impl HtmlElement {
    pub(crate) fn new(
        selector: &str,
        index: usize,
        element: Arc<dyn Element>,
        response: Arc<Response>,
    ) -> Self {
        Self {
            selector: selector.to_string(),
            index,
            element,
            response,
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Position of this element among the selector's matches.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn request(&self) -> &Arc<Request> {
        self.response.request()
    }

    pub fn response(&self) -> &Arc<Response> {
        &self.response
    }

    pub async fn text(&self) -> Result<String, CrawlError> {
        self.element.text().await
    }

    pub async fn attr(&self, name: &str) -> Result<Option<String>, CrawlError> {
        self.element.attribute(name).await
    }

    /// The `href` attribute resolved against the page's base URL.
    pub async fn link(&self) -> Result<Option<Url>, CrawlError> {
        Ok(self
            .attr("href")
            .await?
            .and_then(|href| self.request().absolute_url(&href)))
    }

    pub async fn click(&self) -> Result<(), CrawlError> {
        self.element.click().await
    }
}

impl std::fmt::Debug for HtmlElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtmlElement")
            .field("selector", &self.selector)
            .field("index", &self.index)
            .field("request", &self.request().id())
            .finish()
    }
}

/// A read-only element matched by an `on_data` selector.
#[derive(Debug, Clone)]
pub struct DataElement {
    selector: String,
    index: usize,
    snapshot: ElementSnapshot,
    request: Arc<Request>,
}

impl DataElement {
    pub(crate) fn new(
        selector: &str,
        index: usize,
        snapshot: ElementSnapshot,
        request: Arc<Request>,
    ) -> Self {
        Self {
            selector: selector.to_string(),
            index,
            snapshot,
            request,
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn text(&self) -> &str {
        &self.snapshot.text
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.snapshot.attributes.get(name).map(String::as_str)
    }

    pub fn html(&self) -> &str {
        &self.snapshot.inner_html
    }

    pub fn link(&self) -> Option<Url> {
        self.attr("href")
            .and_then(|href| self.request.absolute_url(href))
    }
}

/// Owned copy of a parsed element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementSnapshot {
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    pub inner_html: String,
}

/// Result of a static parse of a document for one selector.
#[derive(Debug, Default)]
pub(crate) struct DocumentSnapshot {
    pub elements: Vec<ElementSnapshot>,
    /// `href` of the first `<base>` element, unresolved.
    pub base_href: Option<String>,
}

/// Parses `html` and copies every element matching `selector`. The parsed
/// document does not outlive this call.
pub(crate) fn snapshot_document(html: &str, selector: &str) -> Result<DocumentSnapshot, CrawlError> {
    let selector = parse_selector(selector)?;
    let base = parse_selector("base[href]")?;
    let document = Html::parse_document(html);

    let elements = document
        .select(&selector)
        .map(|el| ElementSnapshot {
            text: el.text().collect::<String>().trim().to_string(),
            attributes: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            inner_html: el.inner_html(),
        })
        .collect();

    let base_href = document
        .select(&base)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(str::to_string);

    Ok(DocumentSnapshot {
        elements,
        base_href,
    })
}

fn parse_selector(selector: &str) -> Result<Selector, CrawlError> {
    Selector::parse(selector).map_err(|e| CrawlError::InvalidSelector(format!("{selector}: {e}")))
}
