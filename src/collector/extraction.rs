//! Element extraction for `on_html`, `on_paging` and `on_data`.
//!
//! Live handlers iterate the matches of a selector by index and re-query the
//! page before every index, because a handler may click, navigate or
//! otherwise change the document.
//!
//! Before every query the page is brought back to the response's document.
//! In sync mode a nested visit leaves the shared page on the child document,
//! possibly many history entries further on. The page walks back through its
//! history until it shows the document again, and navigates to it when the
//! history does not lead there. A page that cannot get back faults the
//! response.
//!
//! When the re-query on the right document comes back short, the element set
//! really shrank. The query is retried `stale_element_retries` times, then the
//! registration stops with a `StaleElements` fault that is reported to the
//! error callbacks. The rest of the page carries on.

use super::callbacks::{DataCallbackContainer, ErrorCallback, HtmlCallbackContainer};
use super::core::Collector;
use crate::browser::{Element, Page};
use crate::element::{DataElement, HtmlElement, snapshot_document};
use crate::error::{CrawlError, ErrorKind};
use crate::response::Response;
use crate::url_filter::absolute_url;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use url::Url;

/// Upper bound on `go_back` steps taken to find a document in the history.
const MAX_HISTORY_WALK: usize = 256;

impl Collector {
    /// Runs each registration in order. Cleanup hooks run after their own
    /// registration whatever its outcome. The first failing registration
    /// ends the page.
    pub(crate) async fn handle_selectors(
        &self,
        registrations: &[HtmlCallbackContainer],
        response: &Arc<Response>,
        page: &Arc<dyn Page>,
        document_url: Option<&Url>,
        error_callbacks: &[ErrorCallback],
    ) -> Result<(), CrawlError> {
        for registration in registrations {
            let result = self
                .run_registration(registration, response, page, document_url)
                .await;
            if let Some(cleanup) = &registration.cleanup {
                trace!("{}: cleanup for {:?}", response.request(), registration.selector);
                cleanup(Arc::clone(response)).await;
            }
            match result {
                Err(e) if e.is(ErrorKind::StaleElements) => {
                    // only this registration is affected
                    let _ = self
                        .fail(Arc::clone(response), e, error_callbacks)
                        .await;
                }
                other => other?,
            }
        }
        Ok(())
    }

    async fn run_registration(
        &self,
        registration: &HtmlCallbackContainer,
        response: &Arc<Response>,
        page: &Arc<dyn Page>,
        document_url: Option<&Url>,
    ) -> Result<(), CrawlError> {
        let request = response.request();
        let selector = registration.selector.as_str();

        self.return_to_document(page, document_url)
            .await
            .map_err(|e| CrawlError::extraction(request, e))?;
        let count = page.query_elements(selector).await?.len();
        if count == 0 {
            return Err(CrawlError::extraction(
                request,
                CrawlError::NoElementFound {
                    selector: selector.to_string(),
                },
            ));
        }

        let config = &self.inner.config;
        if config.skip_html_at_max_depth
            && config.max_depth > 0
            && request.depth() >= config.max_depth
        {
            debug!("{}: max depth reached, skipping {:?}", request, selector);
            return Ok(());
        }

        for index in 0..count {
            let element = self
                .resolve_element(page, selector, index, document_url)
                .await
                .map_err(|e| CrawlError::extraction(request, e))?;

            trace!("{}: {}[{}/{}]", request.id_string(), selector, index, count);
            self.inner.stats.increment_elements_handled();
            (registration.handler)(HtmlElement::new(
                selector,
                index,
                element,
                Arc::clone(response),
            ))
            .await
            .map_err(|e| CrawlError::extraction(request, e))?;
        }
        Ok(())
    }

    /// Re-queries `selector` on the response's document and returns its
    /// `index`-th match.
    async fn resolve_element(
        &self,
        page: &Arc<dyn Page>,
        selector: &str,
        index: usize,
        document_url: Option<&Url>,
    ) -> Result<Arc<dyn Element>, CrawlError> {
        let retries = self.inner.config.stale_element_retries;
        let mut attempt = 0;
        loop {
            self.return_to_document(page, document_url).await?;
            let mut elements = page.query_elements(selector).await?;
            if index < elements.len() {
                return Ok(elements.swap_remove(index));
            }

            if attempt == retries {
                return Err(CrawlError::StaleElements {
                    selector: selector.to_string(),
                    index,
                    found: elements.len(),
                });
            }
            attempt += 1;
            debug!(
                "Elements of {:?} shrank (index {}, found {}), retrying ({}/{})",
                selector,
                index,
                elements.len(),
                attempt,
                retries
            );
            page.wait_loaded().await?;
        }
    }

    /// Brings `page` back to `document_url`: back through the history first,
    /// then by navigating to it. A `None` document is not tracked.
    pub(crate) async fn return_to_document(
        &self,
        page: &Arc<dyn Page>,
        document_url: Option<&Url>,
    ) -> Result<(), CrawlError> {
        let Some(expected) = document_url else {
            return Ok(());
        };
        let mut current = page.current_url().await;
        if current.as_ref() == Some(expected) {
            return Ok(());
        }

        for step in 1..=MAX_HISTORY_WALK {
            page.go_back().await?;
            page.wait_loaded().await?;
            let previous = current;
            current = page.current_url().await;
            if current.as_ref() == Some(expected) {
                trace!("Back on {} after {} step(s)", expected, step);
                return Ok(());
            }
            if current == previous {
                // start of the history
                break;
            }
        }

        debug!("{} is not in the page history, navigating to it", expected);
        self.navigate(page, expected).await?;
        match page.current_url().await {
            Some(url) if url == *expected => Ok(()),
            other => {
                warn!("Page did not return to {}: now on {:?}", expected, other);
                Err(CrawlError::Navigation {
                    url: expected.to_string(),
                    reason: "page could not return to the document".into(),
                })
            }
        }
    }

    /// Static pass over the page HTML. Also records the document's
    /// `<base href>` on the request.
    pub(crate) async fn handle_data(
        &self,
        registrations: &[DataCallbackContainer],
        response: &Arc<Response>,
        page: &Arc<dyn Page>,
        document_url: Option<&Url>,
    ) -> Result<(), CrawlError> {
        if registrations.is_empty() {
            return Ok(());
        }
        let request = response.request();
        self.return_to_document(page, document_url)
            .await
            .map_err(|e| CrawlError::extraction(request, e))?;
        let html = page.html().await?;

        let mut base_seen = false;
        for registration in registrations {
            let document = snapshot_document(&html, &registration.selector)?;
            if !base_seen {
                base_seen = true;
                if let Some(base) = document
                    .base_href
                    .as_deref()
                    .and_then(|href| absolute_url(request.url(), href))
                {
                    trace!("{}: base URL {}", request.id_string(), base);
                    request.set_base_url(base);
                }
            }

            for (index, snapshot) in document.elements.into_iter().enumerate() {
                self.inner.stats.increment_elements_handled();
                (registration.handler)(DataElement::new(
                    &registration.selector,
                    index,
                    snapshot,
                    Arc::clone(request),
                ))
                .await
                .map_err(|e| CrawlError::extraction(request, e))?;
            }
        }
        Ok(())
    }
}
