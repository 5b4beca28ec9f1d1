use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use url::Url;

use crate::models::{Article, ListingEntry};

const MIN_BODY_CHARS: usize = 100;
const BODY_CONTAINERS: [&str; 3] = ["div.article-content", "article", "main"];
const AUTHOR_SELECTORS: [&str; 2] = ["span.author", "a[rel=\"author\"]"];

pub(crate) fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector {}: {:?}", css, e))
}

/// Text content of an element with runs of whitespace collapsed.
pub(crate) fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

enum Download {
    Page(String),
    Refused(StatusCode),
}

/// Downloads article pages and pulls out their text.
pub struct ContentExtractor {
    client: Client,
    retry_base: Duration,
}

impl ContentExtractor {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry_base: Duration::from_millis(500),
        }
    }

    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    pub async fn fetch_article(&self, entry: &ListingEntry) -> Result<Article> {
        for attempt in 0..3u32 {
            match self.try_fetch(&entry.url).await {
                Ok(Download::Page(html)) => return extract_article(&html, entry),
                Ok(Download::Refused(status)) => {
                    anyhow::bail!("{} refused with HTTP {}", entry.url, status)
                }
                Err(e) => {
                    if attempt == 2 {
                        return Err(e);
                    }
                    let backoff = self.retry_base * 2_u32.pow(attempt);
                    tracing::debug!(url = %entry.url, attempt, "retrying after {:?}: {:#}", backoff, e);
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        anyhow::bail!("{}: max retries reached", entry.url)
    }

    async fn try_fetch(&self, url: &str) -> Result<Download> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let status = response.status();
        if status == 401 || status == 403 || status == 404 {
            return Ok(Download::Refused(status));
        }

        if !status.is_success() {
            anyhow::bail!("HTTP error: {}", status);
        }

        let html = response.text().await.context("Failed to read response body")?;
        Ok(Download::Page(html))
    }
}

/// Pull title, author, body and canonical URL out of an article page.
pub fn extract_article(html: &str, entry: &ListingEntry) -> Result<Article> {
    let document = Html::parse_document(html);

    let title = first_text(&document, "h1")?
        .or(meta_content(&document, "meta[property=\"og:title\"]")?)
        .unwrap_or_else(|| entry.title.clone());

    let mut author = None;
    for css in AUTHOR_SELECTORS {
        if let Some(found) = first_text(&document, css)? {
            author = Some(found);
            break;
        }
    }
    if author.is_none() {
        author = meta_content(&document, "meta[name=\"author\"]")?;
    }

    let mut body = paragraph_body(&document)?;
    if body.is_empty() {
        body = html2text::from_read(html.as_bytes(), 100).trim().to_string();
    }
    if body.chars().count() < MIN_BODY_CHARS {
        anyhow::bail!("no article text found at {}", entry.url);
    }

    let url = canonical_url(&document, &entry.url)?.unwrap_or_else(|| entry.url.clone());

    Ok(Article {
        title,
        body,
        author,
        published: entry.published,
        url,
    })
}

fn paragraph_body(document: &Html) -> Result<String> {
    let p = selector("p")?;
    for css in BODY_CONTAINERS {
        let container_sel = selector(css)?;
        if let Some(container) = document.select(&container_sel).next() {
            let paragraphs: Vec<String> = container
                .select(&p)
                .map(|el| element_text(&el))
                .filter(|t| !t.is_empty())
                .collect();
            if !paragraphs.is_empty() {
                return Ok(paragraphs.join("\n\n"));
            }
        }
    }
    Ok(String::new())
}

fn first_text(document: &Html, css: &str) -> Result<Option<String>> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .map(|el| element_text(&el))
        .find(|t| !t.is_empty()))
}

fn meta_content(document: &Html, css: &str) -> Result<Option<String>> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty()))
}

fn canonical_url(document: &Html, page_url: &str) -> Result<Option<String>> {
    let sel = selector("link[rel=\"canonical\"]")?;
    let href = match document.select(&sel).find_map(|el| el.value().attr("href")) {
        Some(href) => href,
        None => return Ok(None),
    };
    let base = Url::parse(page_url).with_context(|| format!("Invalid article URL: {}", page_url))?;
    Ok(base.join(href.trim()).ok().map(|u| u.to_string()))
}
