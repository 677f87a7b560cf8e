//! # Error Module
//!
//! Defines `CrawlError`, the single error type surfaced by the collector, the
//! resource pool, the visited store and the queue.
//!
//! Errors fall into a few families:
//!
//! - **Policy rejections**: forbidden domains, URL filters and the depth,
//!   request, response and page-number ceilings. They are produced before any
//!   browser work happens.
//! - **Dedup rejection**: `AlreadyVisited`, carrying the destination URL.
//! - **Extraction faults**: a selector without matches, or an element set that
//!   kept shrinking while it was being iterated.
//! - **Queue faults**: a full storage backend or a second concurrent `run`.
//! - **Navigation faults**: whatever the browser capability reports, including
//!   timeouts.
//!
//! Every error reports an [`ErrorKind`]. Kinds are plain comparable values,
//! which is what `CollectorBuilder::ignored_errors` matches against.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// The identity of a [`CrawlError`], used for ignore-lists and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ForbiddenDomain,
    ForbiddenUrl,
    NoUrlFiltersMatch,
    MaxDepth,
    MaxRequests,
    MaxResponses,
    MaxPageNumReached,
    AlreadyVisited,
    NoElementFound,
    StaleElements,
    Extraction,
    QueueFull,
    QueueAlreadyRunning,
    Navigation,
    Timeout,
    Browser,
    InvalidUrl,
    InvalidSelector,
    PoolClosed,
    Storage,
    Serialization,
    Configuration,
    General,
}

#[derive(Debug, Clone, Error)]
pub enum CrawlError {
    #[error("Forbidden domain: {0}")]
    ForbiddenDomain(String),

    #[error("Forbidden URL: {0}")]
    ForbiddenUrl(String),

    #[error("No URL filters match: {0}")]
    NoUrlFiltersMatch(String),

    #[error("Max depth limit reached")]
    MaxDepth,

    #[error("Max requests limit reached")]
    MaxRequests,

    #[error("Max responses limit reached")]
    MaxResponses,

    #[error("Max page number limit reached")]
    MaxPageNumReached,

    #[error("\"{url}\" already visited")]
    AlreadyVisited { url: Url },

    #[error("No element found: {selector}")]
    NoElementFound { selector: String },

    #[error("Elements of {selector} changed while iterating: wanted index {index}, found {found}")]
    StaleElements {
        selector: String,
        index: usize,
        found: usize,
    },

    /// A fault raised while running element handlers for `request`.
    #[error("{request}: {source}")]
    Extraction {
        request: String,
        #[source]
        source: Box<CrawlError>,
    },

    #[error("Queue max size reached")]
    QueueFull,

    #[error("Queue is already running")]
    QueueAlreadyRunning,

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid selector {0:?}")]
    InvalidSelector(String),

    #[error("Resource pool is closed")]
    PoolClosed,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[source] Arc<serde_json::Error>),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error raised by a user callback.
    #[error("{0}")]
    General(String),
}

impl CrawlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrawlError::ForbiddenDomain(_) => ErrorKind::ForbiddenDomain,
            CrawlError::ForbiddenUrl(_) => ErrorKind::ForbiddenUrl,
            CrawlError::NoUrlFiltersMatch(_) => ErrorKind::NoUrlFiltersMatch,
            CrawlError::MaxDepth => ErrorKind::MaxDepth,
            CrawlError::MaxRequests => ErrorKind::MaxRequests,
            CrawlError::MaxResponses => ErrorKind::MaxResponses,
            CrawlError::MaxPageNumReached => ErrorKind::MaxPageNumReached,
            CrawlError::AlreadyVisited { .. } => ErrorKind::AlreadyVisited,
            CrawlError::NoElementFound { .. } => ErrorKind::NoElementFound,
            CrawlError::StaleElements { .. } => ErrorKind::StaleElements,
            CrawlError::Extraction { .. } => ErrorKind::Extraction,
            CrawlError::QueueFull => ErrorKind::QueueFull,
            CrawlError::QueueAlreadyRunning => ErrorKind::QueueAlreadyRunning,
            CrawlError::Navigation { .. } => ErrorKind::Navigation,
            CrawlError::Timeout { .. } => ErrorKind::Timeout,
            CrawlError::Browser(_) => ErrorKind::Browser,
            CrawlError::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            CrawlError::InvalidSelector(_) => ErrorKind::InvalidSelector,
            CrawlError::PoolClosed => ErrorKind::PoolClosed,
            CrawlError::Storage(_) => ErrorKind::Storage,
            CrawlError::Serialization(_) => ErrorKind::Serialization,
            CrawlError::Configuration(_) => ErrorKind::Configuration,
            CrawlError::General(_) => ErrorKind::General,
        }
    }

    /// Kinds of this error and of every error it wraps, outermost first.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        let mut kinds = vec![self.kind()];
        let mut current = self;
        while let CrawlError::Extraction { source, .. } = current {
            kinds.push(source.kind());
            current = source;
        }
        kinds
    }

    /// Whether this error is, or wraps, an error of `kind`.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kinds().contains(&kind)
    }

    /// Rejections are produced before a request is issued and are never
    /// reported to error callbacks by the fetch itself.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ForbiddenDomain
                | ErrorKind::ForbiddenUrl
                | ErrorKind::NoUrlFiltersMatch
                | ErrorKind::MaxDepth
                | ErrorKind::MaxRequests
                | ErrorKind::MaxResponses
                | ErrorKind::MaxPageNumReached
                | ErrorKind::AlreadyVisited
        )
    }

    pub(crate) fn extraction(request: impl fmt::Display, source: CrawlError) -> Self {
        CrawlError::Extraction {
            request: request.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn invalid_url(url: &str, source: url::ParseError) -> Self {
        CrawlError::InvalidUrl {
            url: url.to_string(),
            source,
        }
    }
}

impl From<serde_json::Error> for CrawlError {
    fn from(err: serde_json::Error) -> Self {
        CrawlError::Serialization(Arc::new(err))
    }
}

impl From<String> for CrawlError {
    fn from(message: String) -> Self {
        CrawlError::General(message)
    }
}

impl From<&str> for CrawlError {
    fn from(message: &str) -> Self {
        CrawlError::General(message.to_string())
    }
}

/// Error handed to `on_error` callbacks.
pub type SharedError = Arc<CrawlError>;
