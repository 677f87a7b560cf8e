//! # Statistics Module
//!
//! Counters describing what a collector has done during its session.
//!
//! ## Key Metrics Tracked
//!
//! - **Requests**: issued, aborted by request callbacks, failed in navigation
//! - **Responses**: pages that finished navigation
//! - **Extraction**: element handler invocations and paginated pages
//! - **Errors**: errors delivered to `on_error` and errors suppressed by the
//!   ignore rules
//!
//! All counters are atomics, updated from any task. `Display`, JSON and
//! Markdown renderings read a consistent snapshot.

use crate::error::CrawlError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

struct StatsSnapshot {
    requests_issued: usize,
    requests_aborted: usize,
    requests_failed: usize,
    responses_received: usize,
    elements_handled: usize,
    pages_paginated: usize,
    errors_reported: usize,
    errors_suppressed: usize,
    elapsed: Duration,
}

impl StatsSnapshot {
    fn requests_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.requests_issued as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct StatCollector {
    #[serde(skip)]
    pub start_time: Instant,

    pub requests_issued: AtomicUsize,
    pub requests_aborted: AtomicUsize,
    pub requests_failed: AtomicUsize,

    pub responses_received: AtomicUsize,

    pub elements_handled: AtomicUsize,
    pub pages_paginated: AtomicUsize,

    pub errors_reported: AtomicUsize,
    pub errors_suppressed: AtomicUsize,
}

impl StatCollector {
    pub(crate) fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_issued: AtomicUsize::new(0),
            requests_aborted: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            responses_received: AtomicUsize::new(0),
            elements_handled: AtomicUsize::new(0),
            pages_paginated: AtomicUsize::new(0),
            errors_reported: AtomicUsize::new(0),
            errors_suppressed: AtomicUsize::new(0),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_issued: self.requests_issued.load(Ordering::SeqCst),
            requests_aborted: self.requests_aborted.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            responses_received: self.responses_received.load(Ordering::SeqCst),
            elements_handled: self.elements_handled.load(Ordering::SeqCst),
            pages_paginated: self.pages_paginated.load(Ordering::SeqCst),
            errors_reported: self.errors_reported.load(Ordering::SeqCst),
            errors_suppressed: self.errors_suppressed.load(Ordering::SeqCst),
            elapsed: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_requests_issued(&self) {
        self.requests_issued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_aborted(&self) {
        self.requests_aborted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_responses_received(&self) {
        self.responses_received.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_elements_handled(&self) {
        self.elements_handled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_pages_paginated(&self) {
        self.pages_paginated.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_errors_reported(&self) {
        self.errors_reported.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_errors_suppressed(&self) {
        self.errors_suppressed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn to_json_string(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Exports the current statistics to a Markdown formatted string.
    pub fn to_markdown_string(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"# Crawl Statistics Report

- **Duration**: {:?}
- **Average Speed**: {:.2} req/s

## Requests
| Metric   | Count |
|----------|-------|
| Issued   | {} |
| Aborted  | {} |
| Failed   | {} |

## Pages
| Metric     | Count |
|------------|-------|
| Responses  | {} |
| Elements   | {} |
| Paginated  | {} |

## Errors
| Metric     | Count |
|------------|-------|
| Reported   | {} |
| Suppressed | {} |
"#,
            s.elapsed,
            s.requests_per_second(),
            s.requests_issued,
            s.requests_aborted,
            s.requests_failed,
            s.responses_received,
            s.elements_handled,
            s.pages_paginated,
            s.errors_reported,
            s.errors_suppressed,
        )
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {:?}", s.elapsed)?;
        writeln!(f, "  speed    : req/s: {:.2}", s.requests_per_second())?;
        writeln!(
            f,
            "  requests : issued: {}, aborted: {}, failed: {}",
            s.requests_issued, s.requests_aborted, s.requests_failed
        )?;
        writeln!(
            f,
            "  pages    : responses: {}, elements: {}, paginated: {}",
            s.responses_received, s.elements_handled, s.pages_paginated
        )?;
        writeln!(
            f,
            "  errors   : reported: {}, suppressed: {}\n",
            s.errors_reported, s.errors_suppressed
        )
    }
}
