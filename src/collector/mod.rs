//! # Collector Module
//!
//! The orchestrator of a crawl session.
//!
//! ## Overview
//!
//! A [`Collector`] takes a URL through the check, fetch, extraction and
//! pagination stages, calling the registered callbacks at each one. The
//! stages are listed by [`Stage`]. Live handlers re-query the page before
//! every element and go back in history when the document changed under
//! them.
//!
//! ## Concurrency Modes
//!
//! - **Sync**: one shared page. `visit` runs the whole lifecycle before it
//!   returns, so visits made from callbacks recurse depth-first on the same
//!   page. The stale recovery brings the page back afterwards.
//! - **Async**: `visit` checks the URL and spawns the fetch. Fetches lease
//!   pages from a pool sized by `parallelism`. [`Collector::wait`] resolves
//!   when all of them, and all the fetches they spawned, are done.
//!
//! ## Errors
//!
//! Errors first pass the ignore rules. What remains is returned to the
//! `visit` caller in sync mode and delivered to `on_error` in async mode.
//! Navigation and extraction faults are delivered to `on_error` in both
//! modes, together with the response, or a stub of it when navigation failed.

mod callbacks;
mod core;
mod extraction;
mod lifecycle;

pub use callbacks::{
    CleanupCallback, DataCallback, ErrorCallback, HtmlCallback, HtmlOptions, RequestCallback,
    ResponseCallback,
};
pub use core::Collector;
pub use lifecycle::{NAVIGATION_TIMEOUT, Stage};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MemoryBrowser;
    use crate::builder::CollectorBuilder;
    use crate::error::{CrawlError, ErrorKind};
    use crate::url_filter::{fingerprint, normalize_url};
    use crate::visited::{InMemoryVisitedStore, VisitedStore};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const FIXTURE: &str = r#"<html><head><title>Test Page</title></head>
        <body><p class="description">first</p><p class="description">second</p></body></html>"#;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn browser_with(pages: &[(&str, &str)]) -> MemoryBrowser {
        let browser = MemoryBrowser::new();
        for (url, html) in pages {
            browser.add_page(url, *html).unwrap();
        }
        browser
    }

    async fn sync_collector(browser: &MemoryBrowser) -> Collector {
        CollectorBuilder::new()
            .browser(browser.clone())
            .build()
            .await
            .unwrap()
    }

    fn record_depths(collector: &Collector) -> Arc<Mutex<Vec<usize>>> {
        let depths = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&depths);
        collector.on_request(move |req| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(req.depth());
            }
        });
        depths
    }

    fn record_errors(collector: &Collector) -> Arc<Mutex<Vec<(u32, bool, ErrorKind, bool)>>> {
        // (request id, stub response, kind, wraps NoElementFound)
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        collector.on_error(move |resp, err| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push((
                    resp.request().id(),
                    resp.is_stub(),
                    err.kind(),
                    err.is(ErrorKind::NoElementFound),
                ));
            }
        });
        errors
    }

    /// Follows every `a[href]` on the page, one level deeper.
    fn follow_links(collector: &Collector) {
        collector.on_html("a", |e| async move {
            if let Some(href) = e.attr("href").await? {
                e.request().visit(&href).await?;
            }
            Ok(())
        });
    }

    #[tokio::test]
    async fn test_html_callbacks_fire_per_element() {
        let browser = browser_with(&[("http://example.com/", FIXTURE)]);
        let collector = sync_collector(&browser).await;

        let titles = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&titles);
        collector.on_html("title", move |e| {
            let sink = Arc::clone(&sink);
            async move {
                let text = e.text().await?;
                sink.lock().push(text);
                Ok(())
            }
        });

        let classes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&classes);
        collector.on_html("p", move |e| {
            let sink = Arc::clone(&sink);
            async move {
                let class = e.attr("class").await?;
                sink.lock().push((e.index(), class));
                Ok(())
            }
        });

        let scraped = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&scraped);
        collector.on_scraped(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        collector.visit("http://example.com").await.unwrap();

        assert_eq!(*titles.lock(), vec!["Test Page".to_string()]);
        assert_eq!(
            *classes.lock(),
            vec![
                (0, Some("description".to_string())),
                (1, Some("description".to_string()))
            ]
        );
        assert_eq!(scraped.load(Ordering::SeqCst), 1);
        assert_eq!(collector.response_count(), 1);
    }

    #[tokio::test]
    async fn test_second_visit_is_already_visited() {
        let browser = browser_with(&[("http://example.com/", FIXTURE)]);
        let collector = sync_collector(&browser).await;

        collector.visit("http://example.com/").await.unwrap();
        let err = collector.visit("http://EXAMPLE.com").await.unwrap_err();
        match err {
            CrawlError::AlreadyVisited { url } => assert_eq!(url.as_str(), "http://example.com/"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(collector.request_count(), 1);

        let quiet = CollectorBuilder::new()
            .browser(browser.clone())
            .ignore_visited_error(true)
            .build()
            .await
            .unwrap();
        quiet.visit("http://example.com/").await.unwrap();
        quiet.visit("http://example.com/").await.unwrap();
        assert_eq!(quiet.stats().errors_suppressed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_revisit_allowed() {
        let browser = browser_with(&[("http://example.com/", FIXTURE)]);
        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .allow_url_revisit(true)
            .build()
            .await
            .unwrap();
        let depths = record_depths(&collector);

        collector.visit("http://example.com/").await.unwrap();
        collector.visit("http://example.com/").await.unwrap();
        assert_eq!(depths.lock().len(), 2);
    }

    fn chain(len: usize) -> MemoryBrowser {
        let browser = MemoryBrowser::new();
        for n in 1..=len {
            browser
                .add_page(
                    &format!("http://example.com/{n}"),
                    format!(r#"<a href="/{}">next</a>"#, n + 1),
                )
                .unwrap();
        }
        browser
    }

    #[tokio::test]
    async fn test_max_depth_stops_recursion() {
        let browser = chain(5);
        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .max_depth(2)
            .ignored_errors(&[ErrorKind::MaxDepth])
            .build()
            .await
            .unwrap();
        let depths = record_depths(&collector);
        follow_links(&collector);

        collector.visit("http://example.com/1").await.unwrap();
        assert_eq!(*depths.lock(), vec![1, 2]);
        assert_eq!(browser.navigations().len(), 2);
    }

    #[tokio::test]
    async fn test_max_depth_error_surfaces_when_not_ignored() {
        let browser = chain(3);
        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .max_depth(1)
            .build()
            .await
            .unwrap();
        follow_links(&collector);
        let errors = record_errors(&collector);

        let err = collector.visit("http://example.com/1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert!(err.is(ErrorKind::MaxDepth));
        assert_eq!(errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_max_requests_caps_request_callbacks() {
        let mut pages = vec![(
            "http://example.com/".to_string(),
            (1..=5)
                .map(|n| format!(r#"<a href="/{n}">{n}</a>"#))
                .collect::<String>(),
        )];
        for n in 1..=5 {
            pages.push((format!("http://example.com/{n}"), "<p>leaf</p>".to_string()));
        }
        let browser = MemoryBrowser::new();
        for (url, html) in &pages {
            browser.add_page(url, html.clone()).unwrap();
        }

        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .max_requests(3)
            .ignored_errors(&[ErrorKind::MaxRequests, ErrorKind::NoElementFound])
            .build()
            .await
            .unwrap();
        let depths = record_depths(&collector);
        follow_links(&collector);

        collector.visit("http://example.com/").await.unwrap();
        assert_eq!(depths.lock().len(), 3);
        assert_eq!(collector.request_count(), 3);
    }

    #[tokio::test]
    async fn test_blacklisted_subdomain_is_rejected() {
        let browser = browser_with(&[("http://x.a.com/", FIXTURE), ("http://a.com/", FIXTURE)]);
        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .allowed_domains(["a.com"])
            .disallowed_domains(["x.a.com"])
            .build()
            .await
            .unwrap();
        let depths = record_depths(&collector);

        let err = collector.visit("http://x.a.com/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ForbiddenDomain);
        assert!(depths.lock().is_empty());
        assert!(browser.navigations().is_empty());

        collector.visit("http://a.com/").await.unwrap();
        assert_eq!(depths.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_async_pool_bounds_concurrent_pages() {
        init_tracing();
        let links: String = (0..12)
            .map(|n| format!(r#"<a href="/leaf/{n}">{n}</a>"#))
            .collect();
        let browser = MemoryBrowser::new().with_latency(Duration::from_millis(10));
        browser.add_page("http://example.com/", links).unwrap();
        for n in 0..12 {
            browser
                .add_page(&format!("http://example.com/leaf/{n}"), "<p>leaf</p>")
                .unwrap();
        }

        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .async_mode(true)
            .parallelism(3)
            .ignored_errors(&[ErrorKind::NoElementFound])
            .build()
            .await
            .unwrap();
        follow_links(&collector);
        let errors = record_errors(&collector);

        collector.visit("http://example.com/").await.unwrap();
        collector.wait().await;

        assert_eq!(collector.response_count(), 13);
        assert!(collector.peak_leased_pages() <= 3);
        assert!(browser.peak_concurrent_navigations() <= 3);
        assert!(browser.pages_opened() <= 3);
        assert!(errors.lock().is_empty());
        assert!(collector.state().is_idle());

        collector.close().await.unwrap();
        assert_eq!(browser.pages_closed(), browser.pages_opened());
        assert!(browser.is_closed());
    }

    #[tokio::test]
    async fn test_async_failures_go_to_on_error() {
        let browser = browser_with(&[("http://example.com/", FIXTURE)]);
        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .async_mode(true)
            .build()
            .await
            .unwrap();
        let errors = record_errors(&collector);

        collector.visit("http://example.com/missing").await.unwrap();
        collector.visit("http://example.com/").await.unwrap();
        collector.visit("http://example.com/").await.unwrap();
        collector.wait().await;

        let mut errors = errors.lock().clone();
        errors.sort_by_key(|(id, ..)| *id);
        assert_eq!(errors.len(), 2);
        // rejected before a request existed
        assert_eq!(errors[0], (0, true, ErrorKind::AlreadyVisited, false));
        assert_eq!(errors[1].1, true);
        assert_eq!(errors[1].2, ErrorKind::Navigation);

        let err = collector.visit("not a url").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUrl);
    }

    #[tokio::test]
    async fn test_navigation_failure_in_sync_mode() {
        let browser = MemoryBrowser::new();
        let collector = sync_collector(&browser).await;
        let errors = record_errors(&collector);

        let err = collector.visit("http://example.com/gone").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Navigation);
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1);
        assert_eq!(collector.stats().requests_failed.load(Ordering::SeqCst), 1);
        assert_eq!(collector.response_count(), 0);
    }

    #[tokio::test]
    async fn test_abort_skips_fetch() {
        let browser = browser_with(&[("http://example.com/", FIXTURE)]);
        let collector = sync_collector(&browser).await;
        collector.on_request(|req| async move { req.abort() });
        let responses = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&responses);
        collector.on_response(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let errors = record_errors(&collector);

        collector.visit("http://example.com/").await.unwrap();
        assert!(browser.navigations().is_empty());
        assert_eq!(responses.load(Ordering::SeqCst), 0);
        assert!(errors.lock().is_empty());
        assert_eq!(collector.stats().requests_aborted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_selector_is_reported_unless_ignored() {
        let browser = browser_with(&[("http://example.com/", FIXTURE)]);
        let collector = sync_collector(&browser).await;
        collector.on_html("table", |_| async { Ok(()) });
        let errors = record_errors(&collector);

        let err = collector.visit("http://example.com/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert!(err.is(ErrorKind::NoElementFound));
        assert_eq!(errors.lock().len(), 1);
        assert_eq!(errors.lock()[0].1, false);
        assert!(errors.lock()[0].3);

        let quiet = CollectorBuilder::new()
            .browser(browser.clone())
            .ignored_errors(&[ErrorKind::NoElementFound])
            .build()
            .await
            .unwrap();
        quiet.on_html("table", |_| async { Ok(()) });
        let quiet_errors = record_errors(&quiet);
        quiet.visit("http://example.com/").await.unwrap();
        assert!(quiet_errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_when_handler_fails() {
        let browser = browser_with(&[("http://example.com/", FIXTURE)]);
        let collector = sync_collector(&browser).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));
        let call_counter = Arc::clone(&calls);
        let cleanup_counter = Arc::clone(&cleanups);
        collector.on_html_with(
            "p",
            move |_| {
                let call_counter = Arc::clone(&call_counter);
                async move {
                    call_counter.fetch_add(1, Ordering::SeqCst);
                    Err(CrawlError::from("handler failed"))
                }
            },
            HtmlOptions::new().with_cleanup(move |_| {
                let cleanup_counter = Arc::clone(&cleanup_counter);
                async move {
                    cleanup_counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        let err = collector.visit("http://example.com/").await.unwrap_err();
        assert!(err.is(ErrorKind::General));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detach_removes_html_callbacks() {
        let browser = browser_with(&[("http://example.com/", FIXTURE)]);
        let collector = sync_collector(&browser).await;
        collector.on_html("table", |_| async { Ok(()) });
        collector.on_html_detach("table");
        collector.visit("http://example.com/").await.unwrap();
    }

    #[tokio::test]
    async fn test_clicks_are_recovered_by_going_back() {
        init_tracing();
        let browser = browser_with(&[
            (
                "http://example.com/",
                r#"<ul><li><a href="/a">A</a></li><li><a href="/b">B</a></li><li><a href="/c">C</a></li></ul>"#,
            ),
            ("http://example.com/a", "<h1>A</h1>"),
            ("http://example.com/b", "<h1>B</h1>"),
            ("http://example.com/c", "<h1>C</h1>"),
        ]);
        let collector = sync_collector(&browser).await;
        let errors = record_errors(&collector);

        let clicked = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&clicked);
        collector.on_html("li a", move |e| {
            let sink = Arc::clone(&sink);
            async move {
                let text = e.text().await?;
                e.click().await?;
                sink.lock().push(text);
                Ok(())
            }
        });

        collector.visit("http://example.com/").await.unwrap();
        assert_eq!(*clicked.lock(), vec!["A", "B", "C"]);
        assert!(errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_shrinking_elements_report_stale_and_page_continues() {
        init_tracing();
        let browser = browser_with(&[(
            "http://example.com/",
            "<ul><li>1</li><li>2</li><li>3</li></ul>",
        )]);
        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .stale_element_retries(1)
            .build()
            .await
            .unwrap();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        collector.on_error(move |_, err| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(err);
            }
        });

        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        let site = browser.clone();
        collector.on_html("li", move |_| {
            let counter = Arc::clone(&counter);
            let site = site.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                site.add_page("http://example.com/", "<ul><li>only</li></ul>")?;
                Ok(())
            }
        });
        let scraped = Arc::new(AtomicUsize::new(0));
        let scraped_counter = Arc::clone(&scraped);
        collector.on_scraped(move |_| {
            let scraped_counter = Arc::clone(&scraped_counter);
            async move {
                scraped_counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        collector.visit("http://example.com/").await.unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert_eq!(scraped.load(Ordering::SeqCst), 1);
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].as_ref(),
            CrawlError::Extraction { source, .. }
                if matches!(**source, CrawlError::StaleElements { index: 1, found: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_on_data_honours_base_href() {
        let browser = browser_with(&[(
            "http://example.com/section/page",
            r#"<html><head><base href="/docs/"></head><body><a href="intro.html">intro</a></body></html>"#,
        )]);
        let collector = sync_collector(&browser).await;

        let links = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&links);
        collector.on_data("a", move |e| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(e.link().map(String::from));
                Ok(())
            }
        });
        collector.on_data("table", |_| async { Ok(()) });

        collector.visit("http://example.com/section/page").await.unwrap();
        assert_eq!(
            *links.lock(),
            vec![Some("http://example.com/docs/intro.html".to_string())]
        );
    }

    #[tokio::test]
    async fn test_page_num_ceiling_skips_paging() {
        let browser = browser_with(&[("http://example.com/", FIXTURE)]);
        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .max_page_num(5)
            .build()
            .await
            .unwrap();
        let paged = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&paged);
        collector.on_paging("p", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        collector.update_page_num(5);
        let err = collector.visit("http://example.com/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MaxPageNumReached);
        assert_eq!(paged.load(Ordering::SeqCst), 0);

        let again = CollectorBuilder::new()
            .browser(browser.clone())
            .max_page_num(5)
            .build()
            .await
            .unwrap();
        let counter = Arc::clone(&paged);
        again.on_paging("p", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        again.visit("http://example.com/").await.unwrap();
        assert_eq!(paged.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fork_keeps_depth_and_context() {
        let browser = browser_with(&[
            ("http://example.com/", FIXTURE),
            ("http://example.com/sibling", FIXTURE),
        ]);
        let collector = sync_collector(&browser).await;
        let depths = record_depths(&collector);
        collector.on_request(|req| async move {
            if req.url().path() == "/" {
                req.ctx().put("origin", "root");
            }
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        collector.on_response(move |resp| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock()
                    .push((resp.request().id(), resp.ctx().get_str("origin")));
            }
        });
        collector.on_html("title", |e| async move {
            if e.request().url().path() == "/" {
                let sibling = e.request().fork("http://example.com/sibling")?;
                assert_eq!(sibling.depth(), e.request().depth());
                sibling.perform().await?;
            }
            Ok(())
        });

        collector.visit("http://example.com/").await.unwrap();
        assert_eq!(*depths.lock(), vec![1, 1]);
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].0 > seen[0].0);
        assert_eq!(seen[1].1.as_deref(), Some("root"));
    }

    #[tokio::test]
    async fn test_unmarshal_round_trip() {
        let collector = sync_collector(&MemoryBrowser::new()).await;
        let wire = br#"{"ID":7,"URL":"http://x/?n=1","Depth":2,"Ctx":{"k":"v"}}"#;

        let request = collector.unmarshal_request(wire).unwrap();
        assert_eq!(request.url().as_str(), "http://x/?n=1");
        assert_eq!(request.depth(), 2);
        assert_eq!(request.ctx().get_str("k").as_deref(), Some("v"));

        let back = collector
            .unmarshal_request(&request.marshal().unwrap())
            .unwrap();
        assert_eq!(back.url(), request.url());
        assert_eq!(back.depth(), request.depth());
        assert_eq!(back.ctx().to_map(), request.ctx().to_map());
        assert_ne!(back.id(), request.id());
    }

    #[tokio::test]
    async fn test_display_reports_counts() {
        let browser = browser_with(&[("http://example.com/", FIXTURE)]);
        let collector = sync_collector(&browser).await;
        collector.on_html("p", |_| async { Ok(()) });
        collector.visit("http://example.com/").await.unwrap();

        let text = collector.to_string();
        assert!(text.starts_with("Requests made: 1 (1 responses)"));
        assert!(text.contains("OnHTML: 1"));
    }

    #[tokio::test]
    async fn test_proxy_and_user_agent_reach_the_browser() {
        let browser = browser_with(&[("http://example.com/", FIXTURE)]);
        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .user_agent("pagewalk-test")
            .headless(false)
            .proxies(["http://proxy:3128"])
            .build()
            .await
            .unwrap();
        collector.visit("http://example.com/").await.unwrap();

        let sessions = browser.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].user_agent.as_deref(), Some("pagewalk-test"));
        assert_eq!(sessions[0].proxy.as_deref(), Some("http://proxy:3128"));
        assert!(!sessions[0].headless);
    }

    #[tokio::test]
    async fn test_returned_error_keeps_kind_when_callbacks_keep_it() {
        let browser = MemoryBrowser::new();
        let collector = sync_collector(&browser).await;
        let kept = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kept);
        collector.on_error(move |_, err| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(err);
            }
        });

        let err = collector.visit("http://example.com/gone").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Navigation);
        let kept = kept.lock();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].kind(), ErrorKind::Navigation);
        assert_eq!(kept[0].to_string(), err.to_string());
    }

    async fn link_following_collector(browser: &MemoryBrowser) -> Collector {
        let collector = sync_collector(browser).await;
        follow_links(&collector);
        collector
    }

    #[tokio::test]
    async fn test_parent_extracts_its_own_document_after_nested_visits() {
        let browser = browser_with(&[
            (
                "http://example.com/a",
                r#"<a href="/b">b</a><p>A-para</p>"#,
            ),
            (
                "http://example.com/b",
                r#"<html><head><base href="/elsewhere/"></head><body><a>none</a><p>B-para</p></body></html>"#,
            ),
        ]);
        let collector = link_following_collector(&browser).await;

        let data = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&data);
        collector.on_data("p", move |e| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock()
                    .push((e.request().url().path().to_string(), e.text().to_string()));
                Ok(())
            }
        });
        let paged = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&paged);
        collector.on_paging("p", move |e| {
            let sink = Arc::clone(&sink);
            async move {
                let text = e.text().await?;
                sink.lock().push((e.request().url().path().to_string(), text));
                Ok(())
            }
        });
        let bases = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&bases);
        collector.on_scraped(move |resp| {
            let sink = Arc::clone(&sink);
            async move {
                let resolved = resp.request().absolute_url("x").map(String::from);
                sink.lock().push(resolved);
            }
        });

        collector.visit("http://example.com/a").await.unwrap();

        let expected = vec![
            ("/b".to_string(), "B-para".to_string()),
            ("/a".to_string(), "A-para".to_string()),
        ];
        assert_eq!(*data.lock(), expected);
        assert_eq!(*paged.lock(), expected);
        assert_eq!(
            *bases.lock(),
            vec![
                Some("http://example.com/elsewhere/x".to_string()),
                Some("http://example.com/x".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_siblings_after_a_deep_branch_are_visited() {
        let browser = browser_with(&[
            (
                "http://example.com/",
                r#"<a href="/b1">b1</a><a href="/b2">b2</a>"#,
            ),
            ("http://example.com/b1", r#"<a href="/c">c</a>"#),
            ("http://example.com/c", r#"<a href="/d">d</a>"#),
            ("http://example.com/d", r#"<a href="/e">e</a>"#),
            ("http://example.com/e", "<a>leaf</a>"),
            ("http://example.com/b2", "<a>leaf</a>"),
        ]);
        let collector = link_following_collector(&browser).await;
        let errors = record_errors(&collector);

        collector.visit("http://example.com/").await.unwrap();

        let paths: Vec<String> = browser
            .navigations()
            .iter()
            .map(|url| url.path().to_string())
            .collect();
        assert_eq!(paths, vec!["/", "/b1", "/c", "/d", "/e", "/b2"]);
        assert!(errors.lock().is_empty());
        assert_eq!(collector.response_count(), 6);
    }

    /// Visited store whose lookups take a while, so concurrent checks overlap.
    struct SlowVisitedStore(InMemoryVisitedStore);

    #[async_trait::async_trait]
    impl VisitedStore for SlowVisitedStore {
        async fn is_visited(&self, fingerprint: u64) -> Result<bool, CrawlError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.0.is_visited(fingerprint).await
        }

        async fn mark_visited(&self, fingerprint: u64) -> Result<(), CrawlError> {
            self.0.mark_visited(fingerprint).await
        }
    }

    #[tokio::test]
    async fn test_duplicate_does_not_use_up_a_request() {
        let browser = browser_with(&[
            ("http://example.com/a", FIXTURE),
            ("http://example.com/b", FIXTURE),
        ]);
        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .max_requests(2)
            .build()
            .await
            .unwrap();

        collector.visit("http://example.com/a").await.unwrap();
        let err = collector.visit("http://example.com/a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyVisited);
        collector.visit("http://example.com/b").await.unwrap();
        assert_eq!(collector.request_count(), 2);
    }

    #[tokio::test]
    async fn test_request_over_the_limit_is_not_marked_visited() {
        let browser = browser_with(&[
            ("http://example.com/a", FIXTURE),
            ("http://example.com/b", FIXTURE),
        ]);
        let store = Arc::new(SlowVisitedStore(InMemoryVisitedStore::new()));
        let collector = CollectorBuilder::new()
            .browser(browser.clone())
            .max_requests(1)
            .visited_store(store.clone() as Arc<dyn VisitedStore>)
            .build()
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            collector.visit("http://example.com/a"),
            collector.visit("http://example.com/b"),
        );
        assert!(a.is_ok());
        assert_eq!(b.unwrap_err().kind(), ErrorKind::MaxRequests);

        let b_url = normalize_url("http://example.com/b").unwrap();
        assert!(!store.is_visited(fingerprint(&b_url)).await.unwrap());
        assert_eq!(collector.request_count(), 1);
    }
}
