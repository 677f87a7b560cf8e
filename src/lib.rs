//! # pagewalk
//!
//! A browser-driven crawl engine.
//!
//! A [`Collector`] navigates pages through a [`Browser`] capability, runs the
//! registered callbacks against the live document, and follows the links the
//! callbacks hand back to it, under depth, domain, dedup and rate limits.
//! A [`Queue`] can feed a collector from a pluggable storage instead.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pagewalk::{Collector, MemoryBrowser};
//!
//! async fn crawl() -> Result<(), pagewalk::CrawlError> {
//!     let browser = MemoryBrowser::new()
//!         .with_page("https://example.com", "<title>Example</title><a href='/about'>About</a>")?;
//!
//!     let collector = Collector::builder()
//!         .browser(browser)
//!         .allowed_domains(["example.com"])
//!         .max_depth(2)
//!         .build()
//!         .await?;
//!
//!     collector.on_html("title", |e| async move {
//!         println!("{}: {}", e.request().url(), e.text().await?);
//!         Ok(())
//!     });
//!     collector.on_html("a[href]", |e| async move {
//!         if let Some(href) = e.attr("href").await? {
//!             e.request().visit(&href).await?;
//!         }
//!         Ok(())
//!     });
//!
//!     collector.visit("https://example.com").await?;
//!     collector.close().await
//! }
//! ```

pub mod browser;
pub mod builder;
pub mod collector;
pub mod concurrency;
pub mod context;
pub mod element;
pub mod error;
pub mod prelude;
pub mod queue;
pub mod request;
pub mod response;
pub mod state;
pub mod stats;
pub mod url_filter;
pub mod visited;

pub use browser::{Browser, Element, MemoryBrowser, Page, SessionOptions};
pub use builder::{CollectorBuilder, CollectorConfig};
pub use collector::{Collector, HtmlOptions, Stage};
pub use context::Context;
pub use element::{DataElement, HtmlElement};
pub use error::{CrawlError, ErrorKind, SharedError};
pub use queue::{InMemoryQueueStorage, Queue, QueueStorage};
pub use request::{Request, SerializedRequest};
pub use response::Response;
pub use visited::{InMemoryVisitedStore, VisitedStore};

pub use async_trait::async_trait;
pub use tokio;
