//! Web page crawler.
//!
//! A [`CrawlSession`] owns the visited set for one crawl; recursion depth
//! is an explicit parameter. Pages are fetched with reqwest, converted to
//! markdown with scraper, and child pages (same domain only, capped per
//! page) are aggregated under the parent before chunking.

use anyhow::{bail, Context, Result};
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;

use crate::config::CrawlerConfig;
use crate::models::CrawlPage;

pub struct CrawlSession {
    client: reqwest::Client,
    visited: HashSet<String>,
    max_links_per_page: usize,
}

impl CrawlSession {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            visited: HashSet::new(),
            max_links_per_page: config.max_links_per_page,
        })
    }

    /// Fetch one page, convert it to markdown, and collect its links.
    pub async fn crawl_page(&mut self, url: &str) -> Result<CrawlPage> {
        let normalized = normalize_url(url)?;
        self.visited.insert(normalized.clone());

        let resp = self
            .client
            .get(&normalized)
            .send()
            .await
            .with_context(|| format!("fetching {normalized}"))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("fetch failed for {normalized}: HTTP {status}");
        }
        let html = resp.text().await?;

        let (title, markdown, links) = parse_html(&html, &normalized);
        Ok(CrawlPage {
            url: normalized,
            title,
            markdown,
            links,
        })
    }

    /// Crawl `url` and, for `depth > 1`, aggregate same-domain child
    /// pages under it as `\n\n---\n\n## {title}\n\n{content}` sections.
    /// Already-visited pages are skipped; at most
    /// `max_links_per_page` links are followed per page.
    pub async fn crawl(&mut self, url: &str, depth: u32) -> Result<CrawlPage> {
        let mut page = self.crawl_page(url).await?;
        if depth <= 1 {
            return Ok(page);
        }

        let children: Vec<String> = page
            .links
            .iter()
            .filter(|link| same_domain(&page.url, link))
            .filter(|link| {
                normalize_url(link)
                    .map(|n| !self.visited.contains(&n))
                    .unwrap_or(false)
            })
            .take(self.max_links_per_page)
            .cloned()
            .collect();

        // Children that fail are skipped; the parent page still ingests.
        let mut aggregated = page.markdown.clone();
        for child_url in children {
            match Box::pin(self.crawl(&child_url, depth - 1)).await {
                Ok(child) => {
                    aggregated.push_str(&format!(
                        "\n\n---\n\n## {}\n\n{}",
                        child.title, child.markdown
                    ));
                }
                Err(e) => {
                    tracing::warn!("child crawl failed for {child_url}: {e:#}");
                }
            }
        }
        page.markdown = aggregated;
        Ok(page)
    }

}

/// Strip the fragment and any trailing slash so the visited set treats
/// `https://a/b#x` and `https://a/b/` as the same page.
pub fn normalize_url(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
    parsed.set_fragment(None);
    let mut s = parsed.to_string();
    while s.ends_with('/') && parsed.path() != "/" {
        s.pop();
    }
    if let Some(stripped) = s.strip_suffix('/') {
        // Bare domain: Url always renders a trailing slash for "/".
        s = stripped.to_string();
    }
    Ok(s)
}

pub fn same_domain(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.host_str().is_some() && a.host_str() == b.host_str(),
        _ => false,
    }
}

/// Convert fetched HTML into (title, markdown, absolute links).
fn parse_html(html: &str, base_url: &str) -> (String, String, Vec<String>) {
    let doc = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| base_url.to_string());

    let mut markdown = String::new();
    if let Ok(sel) = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, pre, td, th") {
        for el in doc.select(&sel) {
            let text = el.text().collect::<String>();
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match el.value().name() {
                "h1" => markdown.push_str(&format!("# {}\n\n", text)),
                "h2" => markdown.push_str(&format!("## {}\n\n", text)),
                "h3" => markdown.push_str(&format!("### {}\n\n", text)),
                "h4" | "h5" | "h6" => markdown.push_str(&format!("#### {}\n\n", text)),
                "li" => markdown.push_str(&format!("- {}\n", text)),
                "pre" => markdown.push_str(&format!("```\n{}\n```\n\n", text)),
                _ => markdown.push_str(&format!("{}\n\n", text)),
            }
        }
    }

    let mut links = Vec::new();
    let base = Url::parse(base_url).ok();
    if let (Ok(sel), Some(base)) = (Selector::parse("a[href]"), base) {
        let mut seen = HashSet::new();
        for el in doc.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                if href.starts_with('#') || href.starts_with("mailto:") {
                    continue;
                }
                if let Ok(resolved) = base.join(href) {
                    if resolved.scheme() != "http" && resolved.scheme() != "https" {
                        continue;
                    }
                    let s = resolved.to_string();
                    if seen.insert(s.clone()) {
                        links.push(s);
                    }
                }
            }
        }
    }

    (title, markdown.trim().to_string(), links)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_url("https://example.com/docs/#intro").unwrap(),
            "https://example.com/docs"
        );
        assert_eq!(
            normalize_url("https://example.com/docs/").unwrap(),
            "https://example.com/docs"
        );
        assert_eq!(
            normalize_url("https://example.com").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn same_domain_compares_hosts() {
        assert!(same_domain(
            "https://example.com/a",
            "https://example.com/b/c"
        ));
        assert!(!same_domain("https://example.com/a", "https://other.org/a"));
        assert!(!same_domain("https://example.com/a", "not a url"));
    }

    #[test]
    fn parse_html_extracts_title_markdown_and_links() {
        let html = r##"<html><head><title>Docs Home</title></head>
            <body>
              <h1>Welcome</h1>
              <p>Intro text.</p>
              <ul><li>First</li><li>Second</li></ul>
              <a href="/guide">Guide</a>
              <a href="https://other.org/x">External</a>
              <a href="#top">Top</a>
            </body></html>"##;
        let (title, markdown, links) = parse_html(html, "https://example.com");
        assert_eq!(title, "Docs Home");
        assert!(markdown.starts_with("# Welcome"));
        assert!(markdown.contains("Intro text."));
        assert!(markdown.contains("- First"));
        assert_eq!(
            links,
            vec![
                "https://example.com/guide".to_string(),
                "https://other.org/x".to_string()
            ]
        );
    }

    #[test]
    fn parse_html_falls_back_to_url_for_missing_title() {
        let (title, _, _) = parse_html("<p>x</p>", "https://example.com/page");
        assert_eq!(title, "https://example.com/page");
    }
}
