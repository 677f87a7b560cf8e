//! A "prelude" for users of the `pagewalk` crate.
//!
//! This prelude re-exports the most commonly used traits and structs so
//! that they can be easily imported.
//!
//! # Example
//!
//! ```
//! use pagewalk::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Collector,
    CollectorBuilder,
    // Core traits
    Browser,
    Element,
    Page,
    QueueStorage,
    VisitedStore,
    // Essential re-exports for trait implementation
    async_trait,
};

pub use crate::{
    Context, CrawlError, DataElement, ErrorKind, HtmlElement, HtmlOptions, Queue, Request,
    Response,
};
