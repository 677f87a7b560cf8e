//! Per-URL fetch lifecycle.
//!
//! ```text
//! Created -> Checked -> Fetching -> Fetched -> Extracting -> Paginating -> Scraped -> Done
//! ```
//!
//! `Aborted` and `Errored` end a run early. The check phase runs in the
//! caller. In async mode everything after it runs in a spawned task holding
//! a page leased from the pool.

use super::callbacks::ErrorCallback;
use super::core::Collector;
use crate::browser::{Page, SessionOptions};
use crate::concurrency::Lease;
use crate::context::Context;
use crate::error::{CrawlError, ErrorKind, SharedError};
use crate::request::Request;
use crate::response::Response;
use crate::state::ProcessingGuard;
use crate::url_filter::{fingerprint, normalize_url};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, trace, warn};
use url::Url;

/// Limit for each of `navigate` and `wait_loaded`.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    Checked,
    Fetching,
    Fetched,
    Extracting,
    Paginating,
    Scraped,
    Done,
    Aborted,
    Errored,
}

enum PageHandle {
    Shared(Arc<dyn Page>),
    Leased(Lease<Arc<dyn Page>>),
}

impl PageHandle {
    fn page(&self) -> &Arc<dyn Page> {
        match self {
            PageHandle::Shared(page) => page,
            PageHandle::Leased(lease) => &**lease,
        }
    }
}

/// Marks a spawned fetch finished on every exit path, panics included.
struct InFlight(Collector);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.inner.state.fetch_finished();
    }
}

async fn with_timeout<T>(
    operation: &'static str,
    fut: impl Future<Output = Result<T, CrawlError>>,
) -> Result<T, CrawlError> {
    tokio::time::timeout(NAVIGATION_TIMEOUT, fut)
        .await
        .map_err(|_| CrawlError::Timeout {
            operation,
            seconds: NAVIGATION_TIMEOUT.as_secs(),
        })?
}

impl Collector {
    /// Checks `raw` and runs the rest of the lifecycle, inline in sync mode
    /// and in a spawned task in async mode.
    pub(crate) async fn scrape(
        &self,
        raw: &str,
        depth: usize,
        ctx: Option<Context>,
    ) -> Result<(), CrawlError> {
        trace!("Checking {} at depth {}", raw, depth);
        let url = match self.check(raw, depth).await {
            Ok(url) => url,
            Err(e) => return self.reject(raw, depth, ctx, e).await,
        };
        trace!("{} -> {:?}", url, Stage::Checked);
        let ctx = ctx.unwrap_or_default();

        if !self.inner.config.async_mode {
            return self.fetch(url, depth, ctx).await;
        }

        self.inner.state.fetch_spawned();
        let in_flight = InFlight(self.clone());
        tokio::spawn(async move {
            // failures were already delivered to the error callbacks
            if let Err(e) = in_flight.0.fetch(url, depth, ctx).await {
                trace!("Spawned fetch ended with: {}", e);
            }
        });
        Ok(())
    }

    async fn check(&self, raw: &str, depth: usize) -> Result<Url, CrawlError> {
        let url = normalize_url(raw)?;
        let config = &self.inner.config;

        if config.max_depth > 0 && depth > config.max_depth {
            return Err(CrawlError::MaxDepth);
        }
        if config.max_requests > 0 && self.request_count() >= config.max_requests {
            return Err(CrawlError::MaxRequests);
        }
        if config.max_responses > 0 && self.response_count() >= config.max_responses {
            return Err(CrawlError::MaxResponses);
        }

        config.policy.check(&url)?;

        self.reserve_request_slot()?;
        if config.allow_url_revisit {
            return Ok(url);
        }
        match self.visited_store().check_and_mark(fingerprint(&url)).await {
            Ok(true) => Ok(url),
            Ok(false) => {
                self.release_request_slot();
                Err(CrawlError::AlreadyVisited { url })
            }
            Err(e) => {
                self.release_request_slot();
                Err(e)
            }
        }
    }

    /// Counts the request against `max_requests`. Concurrent checks cannot
    /// both take the last slot.
    fn reserve_request_slot(&self) -> Result<(), CrawlError> {
        let max = self.inner.config.max_requests;
        self.inner
            .request_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| CrawlError::MaxRequests)
    }

    fn release_request_slot(&self) {
        self.inner.request_count.fetch_sub(1, Ordering::SeqCst);
    }

    async fn reject(
        &self,
        raw: &str,
        depth: usize,
        ctx: Option<Context>,
        err: CrawlError,
    ) -> Result<(), CrawlError> {
        let err = match self.filter_ignored(err) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        debug!("Rejected {}: {}", raw, err);
        if !self.inner.config.async_mode {
            return Err(err);
        }
        // a URL that does not parse has no stub to report against
        let Ok(url) = normalize_url(raw) else {
            return Err(err);
        };
        let callbacks = self.inner.callbacks.read().error.clone();
        self.report_stub(url, depth, ctx.unwrap_or_default(), Arc::new(err), &callbacks)
            .await;
        Ok(())
    }

    async fn fetch(&self, url: Url, depth: usize, ctx: Context) -> Result<(), CrawlError> {
        let callbacks = self.inner.callbacks.read().clone();

        let handle = match self.acquire_page().await {
            Ok(handle) => handle,
            Err(e) => {
                let request = Arc::new(Request::new(
                    self.next_request_id(),
                    url,
                    depth,
                    ctx,
                    self.clone(),
                ));
                return self
                    .fail(Arc::new(Response::stub(request)), e, &callbacks.error)
                    .await;
            }
        };
        let page = handle.page();
        let _processing = ProcessingGuard::enter(&self.inner.state);

        let request = Arc::new(Request::new(
            self.next_request_id(),
            url,
            depth,
            ctx,
            self.clone(),
        ));
        self.transition(&request, Stage::Created);
        self.transition(&request, Stage::Fetching);
        self.inner.stats.increment_requests_issued();

        for cb in &callbacks.request {
            cb(Arc::clone(&request)).await;
        }
        if request.is_aborted() {
            self.inner.stats.increment_requests_aborted();
            self.transition(&request, Stage::Aborted);
            return Ok(());
        }

        self.politeness_delay().await;
        if let Err(e) = self.navigate(page, request.url()).await {
            self.inner.stats.increment_requests_failed();
            self.transition(&request, Stage::Errored);
            let stub = Arc::new(Response::stub(Arc::clone(&request)));
            return self.fail(stub, e, &callbacks.error).await;
        }
        self.transition(&request, Stage::Fetched);

        let document_url = page.current_url().await;
        self.inner.response_count.fetch_add(1, Ordering::SeqCst);
        self.inner.stats.increment_responses_received();
        let response = Arc::new(Response::new(Arc::clone(&request), Arc::clone(page)));

        self.transition(&request, Stage::Extracting);
        for cb in &callbacks.response {
            cb(Arc::clone(&response)).await;
        }

        let extracted = match self
            .handle_selectors(
                &callbacks.html,
                &response,
                page,
                document_url.as_ref(),
                &callbacks.error,
            )
            .await
        {
            Ok(()) => {
                self.handle_data(&callbacks.data, &response, page, document_url.as_ref())
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = extracted {
            self.transition(&request, Stage::Errored);
            return self.fail(response, e, &callbacks.error).await;
        }

        let config = &self.inner.config;
        if config.max_responses > 0 && self.response_count() >= config.max_responses {
            debug!("{}: response ceiling reached, skipping pagination", request);
            return self
                .stop_at_ceiling(response, CrawlError::MaxResponses, &callbacks.error)
                .await;
        }
        if config.max_page_num > 0 && self.page_num() >= config.max_page_num {
            debug!("{}: page number ceiling reached", request);
            return self
                .stop_at_ceiling(response, CrawlError::MaxPageNumReached, &callbacks.error)
                .await;
        }

        self.transition(&request, Stage::Paginating);
        if !callbacks.paging.is_empty() {
            self.inner.stats.increment_pages_paginated();
        }
        if let Err(e) = self
            .handle_selectors(
                &callbacks.paging,
                &response,
                page,
                document_url.as_ref(),
                &callbacks.error,
            )
            .await
        {
            self.transition(&request, Stage::Errored);
            return self.fail(response, e, &callbacks.error).await;
        }

        self.transition(&request, Stage::Scraped);
        for cb in &callbacks.scraped {
            cb(Arc::clone(&response)).await;
        }
        self.transition(&request, Stage::Done);
        Ok(())
    }

    fn transition(&self, request: &Request, stage: Stage) {
        trace!("{} -> {:?}", request, stage);
    }

    fn session_options(&self) -> SessionOptions {
        let config = &self.inner.config;
        let proxy = match config.proxies.len() {
            0 => None,
            n => Some(config.proxies[rand::random_range(0..n)].clone()),
        };
        SessionOptions {
            user_agent: config.user_agent.clone(),
            headless: config.headless,
            proxy,
        }
    }

    async fn acquire_page(&self) -> Result<PageHandle, CrawlError> {
        let browser = Arc::clone(&self.inner.browser);
        let options = self.session_options();

        if !self.inner.config.async_mode {
            let page = self
                .inner
                .shared_page
                .get_or_try_init(|| async move {
                    debug!("Opening the shared page");
                    browser.open_page(&options).await
                })
                .await?;
            return Ok(PageHandle::Shared(Arc::clone(page)));
        }

        let lease = self
            .inner
            .pool
            .acquire(|| async move {
                debug!("Opening a pooled page");
                browser.open_page(&options).await
            })
            .await?;
        Ok(PageHandle::Leased(lease))
    }

    pub(crate) async fn navigate(
        &self,
        page: &Arc<dyn Page>,
        url: &Url,
    ) -> Result<(), CrawlError> {
        with_timeout("navigation", page.navigate(url)).await?;
        with_timeout("wait loaded", page.wait_loaded()).await
    }

    /// Sleeps `delay` plus a random share of `random_delay`.
    async fn politeness_delay(&self) {
        let config = &self.inner.config;
        let mut delay = config.delay;
        if !config.random_delay.is_zero() {
            let bound = config.random_delay.as_nanos().min(u64::MAX as u128) as u64;
            delay += Duration::from_nanos(rand::random_range(0..bound));
        }
        if !delay.is_zero() {
            trace!("Sleeping {:?} before navigation", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Drops errors matching the ignore rules.
    pub(crate) fn filter_ignored(&self, err: CrawlError) -> Result<(), CrawlError> {
        let config = &self.inner.config;
        let ignored = err
            .kinds()
            .iter()
            .any(|kind| config.ignored_errors.contains(kind))
            || (config.ignore_visited_error && err.is(ErrorKind::AlreadyVisited));
        if ignored {
            debug!("Ignoring error: {}", err);
            self.inner.stats.increment_errors_suppressed();
            return Ok(());
        }
        Err(err)
    }

    /// Reports `err` to the error callbacks unless it is ignored, then
    /// returns it.
    pub(crate) async fn fail(
        &self,
        response: Arc<Response>,
        err: CrawlError,
        callbacks: &[ErrorCallback],
    ) -> Result<(), CrawlError> {
        let err = match self.filter_ignored(err) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        let shared = Arc::new(err);
        self.dispatch_error(response, Arc::clone(&shared), callbacks)
            .await;
        // callbacks may keep their copy
        Err(Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// A ceiling ends the page without faulting it. Sync callers get the
    /// error back, async crawls see it in the error callbacks.
    async fn stop_at_ceiling(
        &self,
        response: Arc<Response>,
        err: CrawlError,
        callbacks: &[ErrorCallback],
    ) -> Result<(), CrawlError> {
        let err = match self.filter_ignored(err) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !self.inner.config.async_mode {
            return Err(err);
        }
        self.dispatch_error(response, Arc::new(err), callbacks).await;
        Ok(())
    }

    pub(crate) async fn dispatch_error(
        &self,
        response: Arc<Response>,
        err: SharedError,
        callbacks: &[ErrorCallback],
    ) {
        warn!("{}: {}", response.request(), err);
        self.inner.stats.increment_errors_reported();
        for cb in callbacks {
            cb(Arc::clone(&response), Arc::clone(&err)).await;
        }
    }

    async fn report_stub(
        &self,
        url: Url,
        depth: usize,
        ctx: Context,
        err: SharedError,
        callbacks: &[ErrorCallback],
    ) {
        let request = Arc::new(Request::new(0, url, depth, ctx, self.clone()));
        self.dispatch_error(Arc::new(Response::stub(request)), err, callbacks)
            .await;
    }
}
