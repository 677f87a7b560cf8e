//! URL normalization, fingerprinting and crawl policy.
//!
//! Every URL entering the collector goes through [`normalize_url`] first. The
//! normalized form is what the policy checks match against and what
//! [`fingerprint`] hashes for the visited store.

use crate::error::CrawlError;
use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

/// Parses `raw` into its canonical form.
///
/// A `%` that does not start a valid escape is encoded as `%25`, so that
/// `/a%b` and `/a%25b` name the same resource. The WHATWG parse lowercases the
/// scheme and host, drops default ports and gives empty paths a `/`, which
/// makes `http://example.com` and `http://example.com/` equal.
pub fn normalize_url(raw: &str) -> Result<Url, CrawlError> {
    let escaped = escape_lone_percent(raw.trim());
    Url::parse(&escaped).map_err(|e| CrawlError::invalid_url(raw, e))
}

fn escape_lone_percent(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    for (i, ch) in raw.char_indices() {
        let valid_escape = ch == '%'
            && bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
            && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
        if ch == '%' && !valid_escape {
            out.push_str("%25");
        } else {
            out.push(ch);
        }
    }
    out
}

/// 64-bit fingerprint of a normalized URL: the big-endian prefix of its
/// SHA-256 digest. Stable across processes, so shared visited stores agree.
pub fn fingerprint(url: &Url) -> u64 {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Resolves `href` against `base`. Fragment-only references and references
/// that do not parse yield `None`.
pub fn absolute_url(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.starts_with('#') {
        return None;
    }
    base.join(&escape_lone_percent(href)).ok()
}

/// Domain and regex rules deciding whether a URL may be visited.
#[derive(Debug, Clone, Default)]
pub struct UrlPolicy {
    pub allowed_domains: Vec<String>,
    pub disallowed_domains: Vec<String>,
    pub url_filters: Vec<Regex>,
    pub disallowed_url_filters: Vec<Regex>,
}

impl UrlPolicy {
    /// Applies the rules in order: disallowed filters, allow filters, domain
    /// blacklist, domain whitelist. The first failing rule decides the error.
    pub fn check(&self, url: &Url) -> Result<(), CrawlError> {
        let candidate = url.as_str();

        if self
            .disallowed_url_filters
            .iter()
            .any(|re| re.is_match(candidate))
        {
            return Err(CrawlError::ForbiddenUrl(candidate.to_string()));
        }

        if !self.url_filters.is_empty() && !self.url_filters.iter().any(|re| re.is_match(candidate))
        {
            return Err(CrawlError::NoUrlFiltersMatch(candidate.to_string()));
        }

        let domain = url.host_str().unwrap_or_default();
        if !self.is_domain_allowed(domain) {
            return Err(CrawlError::ForbiddenDomain(domain.to_string()));
        }

        Ok(())
    }

    /// The blacklist is consulted on its own, before and regardless of the
    /// whitelist.
    pub fn is_domain_allowed(&self, domain: &str) -> bool {
        if self.disallowed_domains.iter().any(|d| d == domain) {
            return false;
        }
        self.allowed_domains.is_empty() || self.allowed_domains.iter().any(|d| d == domain)
    }
}

/// Compiles string patterns, reporting the first invalid one.
pub(crate) fn compile_filters(patterns: &[String]) -> Result<Vec<Regex>, CrawlError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| CrawlError::Configuration(format!("invalid URL filter {p:?}: {e}")))
        })
        .collect()
}
