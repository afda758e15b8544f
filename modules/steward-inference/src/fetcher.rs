// Plain HTTP page fetcher: GET, then reduce the HTML to readable text,
// absolute links and mailto targets.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};
use tracing::{info, warn};

use crate::traits::{FetchedPage, PageFetcher};

/// Bodies beyond this are truncated before parsing.
const MAX_BODY_BYTES: usize = 2_000_000;

/// Matches `href` attributes, the only semantic "link" in HTML.
static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).expect("valid regex"));

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let parsed = url::Url::parse(url).context("Invalid URL")?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("Only http/https URLs allowed, got: {}", parsed.scheme());
        }

        info!(url, fetcher = "http", "Fetching page");

        let resp = self.client.get(parsed).send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} for {url}", status.as_u16());
        }
        let final_url = resp.url().to_string();
        let mut body = resp.text().await?;

        if body.len() > MAX_BODY_BYTES {
            warn!(url, bytes = body.len(), "Page body truncated");
            let mut cut = MAX_BODY_BYTES;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        let page = parse_page(&final_url, &body);
        info!(
            url,
            fetcher = "http",
            bytes = body.len(),
            mailtos = page.mailtos.len(),
            links = page.links.len(),
            "Fetched successfully"
        );
        Ok(page)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Split raw HTML into the pieces email extraction works from.
pub fn parse_page(url: &str, html: &str) -> FetchedPage {
    let (links, mailtos) = extract_hrefs(html, url);
    FetchedPage {
        url: url.to_string(),
        text: html_to_text(html.as_bytes(), Some(url)),
        mailtos,
        links,
    }
}

/// Convert raw HTML into markdown text. Readability is off so footers and
/// sidebars, where contact addresses usually live, survive.
fn html_to_text(html: &[u8], url: Option<&str>) -> String {
    let parsed_url = url.and_then(|u| url::Url::parse(u).ok());
    let config = TransformConfig {
        readability: false,
        main_content: false,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html,
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    transform_content_input(input, &config)
}

/// Resolve a raw href against a base URL, returning an absolute URL with fragment stripped.
fn resolve_href(raw: &str, base: Option<&url::Url>) -> Option<String> {
    let mut parsed = if raw.starts_with("http://") || raw.starts_with("https://") {
        url::Url::parse(raw).ok()?
    } else {
        base?.join(raw).ok()?
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// Split `href` targets into absolute http(s) links and `mailto:` targets.
/// Both lists are deduplicated and keep document order.
pub fn extract_hrefs(html: &str, base_url: &str) -> (Vec<String>, Vec<String>) {
    let base = url::Url::parse(base_url).ok();
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut mailtos = Vec::new();

    for cap in HREF_RE.captures_iter(html) {
        let raw = cap[1].trim();
        if raw.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("mailto:")) {
            let target = raw[7..].to_string();
            if seen.insert(format!("mailto:{target}")) {
                mailtos.push(target);
            }
            continue;
        }
        if let Some(resolved) = resolve_href(raw, base.as_ref()) {
            if seen.insert(resolved.clone()) {
                links.push(resolved);
            }
        }
    }

    (links, mailtos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hrefs_split_into_links_and_mailtos() {
        let html = r#"
            <a href="/contact-us">Contact</a>
            <a HREF="mailto:Facilities@law.ucla.edu?subject=Hi">Email</a>
            <a href="https://law.ucla.edu/about#team">About</a>
            <a href="/contact-us">Contact again</a>
            <a href="javascript:void(0)">JS</a>
        "#;
        let (links, mailtos) = extract_hrefs(html, "https://law.ucla.edu/");
        assert_eq!(
            links,
            vec!["https://law.ucla.edu/contact-us", "https://law.ucla.edu/about"]
        );
        assert_eq!(mailtos, vec!["Facilities@law.ucla.edu?subject=Hi"]);
    }

    #[test]
    fn relative_links_without_base_are_dropped() {
        let (links, _) = extract_hrefs(r#"<a href="/contact">c</a>"#, "not a url");
        assert!(links.is_empty());
    }
}
