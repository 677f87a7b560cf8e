//! # Builder Module
//!
//! Provides the `CollectorBuilder`, a fluent API for constructing and
//! configuring `Collector` instances.
//!
//! ## Overview
//!
//! Every crawl setting is a builder method. The builder validates the result
//! in [`CollectorBuilder::build`], so a bad configuration fails there rather
//! than halfway through a crawl.
//!
//! ## Key Features
//!
//! - **Ceilings**: depth, request, response and page-number limits, 0 meaning
//!   unlimited
//! - **URL Policy**: domain allow and deny lists plus regex URL filters
//! - **Dedup**: revisit policy and a pluggable visited store
//! - **Concurrency**: async mode and the page pool size
//! - **Politeness**: fixed and random delay before each navigation
//! - **Error Filtering**: error kinds that are dropped instead of reported
//!
//! ## Example
//!
//! ```rust,ignore
//! use pagewalk::CollectorBuilder;
//!
//! let collector = CollectorBuilder::new()
//!     .browser(my_browser)
//!     .allowed_domains(["example.com"])
//!     .max_depth(2)
//!     .async_mode(true)
//!     .parallelism(4)
//!     .build()
//!     .await?;
//! ```

use crate::browser::Browser;
use crate::collector::Collector;
use crate::error::{CrawlError, ErrorKind};
use crate::url_filter::{UrlPolicy, compile_filters};
use crate::visited::{InMemoryVisitedStore, VisitedStore};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Retries of the stale-element recovery when none is configured.
pub const DEFAULT_STALE_ELEMENT_RETRIES: usize = 2;

/// Crawl settings of a collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub user_agent: Option<String>,
    pub headless: bool,
    /// Deepest request depth fetched. 0 means unlimited.
    pub max_depth: usize,
    /// Requests issued per session. 0 means unlimited.
    pub max_requests: u32,
    /// Responses received per session. 0 means unlimited.
    pub max_responses: u32,
    /// Pagination ceiling checked against `Collector::page_num`. 0 means unlimited.
    pub max_page_num: u32,
    pub policy: UrlPolicy,
    pub allow_url_revisit: bool,
    pub ignored_errors: Vec<ErrorKind>,
    pub ignore_visited_error: bool,
    pub async_mode: bool,
    /// Pages used at once in async mode.
    pub parallelism: usize,
    pub delay: Duration,
    /// Upper bound of the random part of the delay.
    pub random_delay: Duration,
    pub proxies: Vec<String>,
    /// Skip `on_html` and `on_paging` handlers on pages at `max_depth`.
    pub skip_html_at_max_depth: bool,
    /// Go-back attempts when an element set shrinks during iteration.
    pub stale_element_retries: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            user_agent: None,
            headless: true,
            max_depth: 0,
            max_requests: 0,
            max_responses: 0,
            max_page_num: 0,
            policy: UrlPolicy::default(),
            allow_url_revisit: false,
            ignored_errors: Vec::new(),
            ignore_visited_error: false,
            async_mode: false,
            parallelism: 0,
            delay: Duration::ZERO,
            random_delay: Duration::ZERO,
            proxies: Vec::new(),
            skip_html_at_max_depth: false,
            stale_element_retries: DEFAULT_STALE_ELEMENT_RETRIES,
        }
    }
}

#[derive(Default)]
pub struct CollectorBuilder {
    config: CollectorConfig,
    url_filter_patterns: Vec<String>,
    disallowed_url_filter_patterns: Vec<String>,
    visited_store: Option<Arc<dyn VisitedStore>>,
    browser: Option<Arc<dyn Browser>>,
}

impl CollectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the browser session the collector opens its pages from. Required.
    pub fn browser(mut self, browser: impl Browser + 'static) -> Self {
        self.browser = Some(Arc::new(browser));
        self
    }

    /// Same as [`CollectorBuilder::browser`] for an already shared session.
    pub fn shared_browser(mut self, browser: Arc<dyn Browser>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn max_requests(mut self, n: u32) -> Self {
        self.config.max_requests = n;
        self
    }

    pub fn max_responses(mut self, n: u32) -> Self {
        self.config.max_responses = n;
        self
    }

    pub fn max_page_num(mut self, n: u32) -> Self {
        self.config.max_page_num = n;
        self
    }

    pub fn allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.policy.allowed_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn disallowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.policy.disallowed_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// URLs must match at least one of these filters.
    pub fn url_filters(mut self, filters: impl IntoIterator<Item = Regex>) -> Self {
        self.config.policy.url_filters = filters.into_iter().collect();
        self
    }

    /// URLs matching any of these filters are rejected.
    pub fn disallowed_url_filters(mut self, filters: impl IntoIterator<Item = Regex>) -> Self {
        self.config.policy.disallowed_url_filters = filters.into_iter().collect();
        self
    }

    /// Like [`CollectorBuilder::url_filters`], compiled by `build`.
    pub fn url_filter_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.url_filter_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Like [`CollectorBuilder::disallowed_url_filters`], compiled by `build`.
    pub fn disallowed_url_filter_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disallowed_url_filter_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_url_revisit(mut self, allow: bool) -> Self {
        self.config.allow_url_revisit = allow;
        self
    }

    /// Errors of these kinds, or wrapping them, are dropped silently.
    pub fn ignored_errors(mut self, kinds: &[ErrorKind]) -> Self {
        self.config.ignored_errors = kinds.to_vec();
        self
    }

    pub fn ignore_visited_error(mut self, ignore: bool) -> Self {
        self.config.ignore_visited_error = ignore;
        self
    }

    pub fn async_mode(mut self, enabled: bool) -> Self {
        self.config.async_mode = enabled;
        self
    }

    pub fn parallelism(mut self, n: usize) -> Self {
        self.config.parallelism = n;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    pub fn random_delay(mut self, delay: Duration) -> Self {
        self.config.random_delay = delay;
        self
    }

    pub fn proxies<I, S>(mut self, proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.proxies = proxies.into_iter().map(Into::into).collect();
        self
    }

    pub fn skip_html_at_max_depth(mut self, skip: bool) -> Self {
        self.config.skip_html_at_max_depth = skip;
        self
    }

    pub fn stale_element_retries(mut self, retries: usize) -> Self {
        self.config.stale_element_retries = retries;
        self
    }

    /// Replaces the default in-memory visited store.
    pub fn visited_store(mut self, store: Arc<dyn VisitedStore>) -> Self {
        self.visited_store = Some(store);
        self
    }

    /// Builds the `Collector`, initializing its visited store.
    pub async fn build(self) -> Result<Collector, CrawlError> {
        let (config, browser, store) = self.validate()?;
        store.init().await?;
        debug!(
            "Building collector: async={}, parallelism={}, max_depth={}",
            config.async_mode, config.parallelism, config.max_depth
        );
        Ok(Collector::new(config, browser, store))
    }

    #[allow(clippy::type_complexity)]
    fn validate(
        mut self,
    ) -> Result<(CollectorConfig, Arc<dyn Browser>, Arc<dyn VisitedStore>), CrawlError> {
        let browser = self.browser.take().ok_or_else(|| {
            CrawlError::Configuration("Collector must have a browser.".to_string())
        })?;

        if self.config.async_mode && self.config.parallelism == 0 {
            self.config.parallelism = 1;
        }
        if self.config.policy.allowed_domains.iter().any(String::is_empty) {
            return Err(CrawlError::Configuration(
                "allowed_domains must not contain empty entries.".to_string(),
            ));
        }

        self.config
            .policy
            .url_filters
            .extend(compile_filters(&self.url_filter_patterns)?);
        self.config
            .policy
            .disallowed_url_filters
            .extend(compile_filters(&self.disallowed_url_filter_patterns)?);

        let store = self
            .visited_store
            .take()
            .unwrap_or_else(|| Arc::new(InMemoryVisitedStore::new()));

        Ok((self.config, browser, store))
    }
}
