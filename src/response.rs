//! A navigated page paired with the request that produced it.
//!
//! Error callbacks may also receive a stub response: it carries the request
//! and context but no page, because navigation failed or never started.

use crate::browser::Page;
use crate::context::Context;
use crate::error::CrawlError;
use crate::request::Request;
use std::sync::Arc;
use url::Url;

pub struct Response {
    request: Arc<Request>,
    page: Option<Arc<dyn Page>>,
    ctx: Context,
}

impl Response {
    pub(crate) fn new(request: Arc<Request>, page: Arc<dyn Page>) -> Self {
        let ctx = request.ctx().clone();
        Self {
            request,
            page: Some(page),
            ctx,
        }
    }

    pub(crate) fn stub(request: Arc<Request>) -> Self {
        let ctx = request.ctx().clone();
        Self {
            request,
            page: None,
            ctx,
        }
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn url(&self) -> &Url {
        self.request.url()
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    /// The page the request was navigated in. `None` for stubs.
    pub fn page(&self) -> Option<&Arc<dyn Page>> {
        self.page.as_ref()
    }

    pub fn is_stub(&self) -> bool {
        self.page.is_none()
    }

    /// HTML of the page as it is now.
    pub async fn html(&self) -> Result<String, CrawlError> {
        match &self.page {
            Some(page) => page.html().await,
            None => Err(CrawlError::Browser(format!(
                "{}: response has no page",
                self.request.id_string()
            ))),
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("request", &self.request)
            .field("stub", &self.is_stub())
            .finish()
    }
}
