//! Site scraper: homepage, then one contact page, then give up.
//!
//! Owns the extraction and error policy; the raw fetch belongs to a
//! [`PageFetcher`]. Failures never propagate: they are logged and read as
//! "no addresses from this site". Results are cached per normalized URL so a
//! site is fetched at most once (homepage + contact page) per TTL window,
//! including when several scrapes of it are in flight together.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use steward_common::{normalize_email, Domain, StewardError};

use crate::cache::{CacheKey, Evidence, EvidenceCache};
use crate::deadline::Deadline;
use crate::rate_gate::RateGate;
use crate::traits::{FetchedPage, PageFetcher};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("valid regex")
});

/// "info [at] city [dot] gov" style obfuscation.
static AT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*[\[(]\s*at\s*[\])]\s*").expect("valid regex"));
static DOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*[\[(]\s*dot\s*[\])]\s*").expect("valid regex"));

/// Asset names that look like addresses (`logo@2x.png`).
const ASSET_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".css", ".js"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeOutcome {
    pub emails: Vec<String>,
    /// The homepage could not be fetched.
    pub failed: bool,
    pub from_cache: bool,
}

pub struct SiteScraper {
    fetcher: Arc<dyn PageFetcher>,
    cache: Arc<EvidenceCache>,
    gate: Arc<RateGate>,
    op_timeout: Duration,
}

impl SiteScraper {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        cache: Arc<EvidenceCache>,
        gate: Arc<RateGate>,
        op_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            cache,
            gate,
            op_timeout,
        }
    }

    pub async fn scrape_domain(&self, domain: &Domain, deadline: Deadline) -> ScrapeOutcome {
        self.scrape(&format!("https://{domain}/"), deadline).await
    }

    pub async fn scrape(&self, target: &str, deadline: Deadline) -> ScrapeOutcome {
        let Some(url) = site_url(target) else {
            debug!(target, "Not a scrapeable URL");
            return ScrapeOutcome::default();
        };
        let key = CacheKey::site(&url);
        if let Some(hit) = self.cached(&key).await {
            return hit;
        }
        // Concurrent scrapes of one site wait here, then read the first one's result.
        let Ok(_claim) = tokio::time::timeout_at(deadline.at(), self.cache.claim(&key)).await else {
            warn!(url = url.as_str(), "Ran out of time waiting on a concurrent scrape");
            return ScrapeOutcome {
                failed: true,
                ..Default::default()
            };
        };
        if let Some(hit) = self.cached(&key).await {
            return hit;
        }

        let home = match self.fetch_once(&url, deadline).await {
            Ok(page) => page,
            Err(FetchError::Elapsed) => {
                warn!(url = url.as_str(), "Homepage fetch ran out of time");
                return ScrapeOutcome {
                    failed: true,
                    ..Default::default()
                };
            }
            Err(FetchError::Failed(e)) => {
                warn!(url = url.as_str(), error = %e, "Homepage fetch failed");
                self.cache.insert(key, Evidence::Emails(Vec::new())).await;
                return ScrapeOutcome {
                    failed: true,
                    ..Default::default()
                };
            }
        };

        let mut emails = extract_emails(&home);
        let mut complete = true;
        if emails.is_empty() {
            if let Some(contact) = contact_link(&home, &url) {
                match self.fetch_once(&contact, deadline).await {
                    Ok(page) => emails = extract_emails(&page),
                    Err(FetchError::Elapsed) => {
                        warn!(url = contact.as_str(), "Contact page fetch ran out of time");
                        complete = false;
                    }
                    Err(FetchError::Failed(e)) => {
                        warn!(url = contact.as_str(), error = %e, "Contact page fetch failed");
                    }
                }
            }
        }

        info!(url = url.as_str(), found = emails.len(), "Site scraped");
        if complete {
            self.cache.insert(key, Evidence::Emails(emails.clone())).await;
        }
        ScrapeOutcome {
            emails,
            failed: false,
            from_cache: false,
        }
    }

    async fn cached(&self, key: &CacheKey) -> Option<ScrapeOutcome> {
        match self.cache.get(key).await {
            Some(Evidence::Emails(emails)) => Some(ScrapeOutcome {
                emails,
                failed: false,
                from_cache: true,
            }),
            _ => None,
        }
    }

    async fn fetch_once(&self, url: &str, deadline: Deadline) -> Result<FetchedPage, FetchError> {
        if deadline.is_expired() {
            return Err(FetchError::Elapsed);
        }
        let attempt = deadline
            .bound(self.op_timeout, async {
                self.gate.acquire().await;
                self.fetcher.fetch(url).await
            })
            .await;
        match attempt {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(e)) => Err(FetchError::Failed(StewardError::FetchFailed(format!(
                "{}: {e:#}",
                self.fetcher.name()
            )))),
            Err(_) => Err(FetchError::Elapsed),
        }
    }
}

enum FetchError {
    /// Deadline or per-fetch timeout hit. Not cached so a later call can retry.
    Elapsed,
    Failed(StewardError),
}

/// Canonical http(s) URL for a site target. Scheme-less input gets https.
pub fn site_url(target: &str) -> Option<String> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    let mut parsed = if target.contains("://") {
        url::Url::parse(target).ok()?
    } else {
        url::Url::parse(&format!("https://{target}")).ok()?
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    parsed.host_str()?;
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// All addresses on a page: mailto targets first, then text matches.
/// Normalized, deduplicated, document order.
pub fn extract_emails(page: &FetchedPage) -> Vec<String> {
    let text = DOT_RE.replace_all(&AT_RE.replace_all(&page.text, "@"), ".").into_owned();
    let found = page
        .mailtos
        .iter()
        .flat_map(|m| m.split(','))
        .map(str::to_string)
        .chain(EMAIL_RE.find_iter(&text).map(|m| m.as_str().to_string()));

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for raw in found {
        let Some(addr) = normalize_email(&raw) else {
            continue;
        };
        if ASSET_SUFFIXES.iter().any(|s| addr.ends_with(s)) {
            continue;
        }
        if seen.insert(addr.clone()) {
            out.push(addr);
        }
    }
    out
}

/// First same-site link whose URL mentions "contact", other than `home` itself.
pub fn contact_link(page: &FetchedPage, home: &str) -> Option<String> {
    let home_url = url::Url::parse(home).ok()?;
    let home_host = home_url.host_str()?.trim_start_matches("www.").to_string();
    page.links
        .iter()
        .filter(|l| l.as_str() != home)
        .find(|l| {
            let Ok(u) = url::Url::parse(l) else {
                return false;
            };
            let same_site = u
                .host_str()
                .map(|h| h.trim_start_matches("www.") == home_host)
                .unwrap_or(false);
            same_site && u.path().to_lowercase().contains("contact")
        })
        .cloned()
}
