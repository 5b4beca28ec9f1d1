use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use scraper::Html;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use url::Url;

use crate::config::SourceSettings;
use crate::dates::{date_from_path, in_window};
use crate::extractor::{element_text, selector};
use crate::models::ListingEntry;

pub const LISTING_PATH: &str = "/en/archive/recent";
pub const FEATURED_PATH: &str = "/en/topics/site_area/perspectives";

/// Article links on a listing page, deduplicated, in page order.
pub fn parse_listing(html: &str, page_url: &Url) -> Result<Vec<ListingEntry>> {
    let document = Html::parse_document(html);
    let anchors = selector("a[href]")?;

    let mut entries: Vec<ListingEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for anchor in document.select(&anchors) {
        let href = match anchor.value().attr("href") {
            Some(href) => href.trim(),
            None => continue,
        };
        let mut url = match page_url.join(href) {
            Ok(url) => url,
            Err(_) => continue,
        };
        if url.host_str() != page_url.host_str() || !url.path().contains("/articles/") {
            continue;
        }
        url.set_fragment(None);
        url.set_query(None);

        let published = match date_from_path(url.path()) {
            Some(date) => date,
            None => continue,
        };

        let url = url.to_string();
        let title = element_text(&anchor);

        match index.get(&url) {
            Some(&i) => {
                // Image links often come first; take the title from a later text link.
                if entries[i].title.is_empty() && !title.is_empty() {
                    entries[i].title = title;
                }
            }
            None => {
                index.insert(url.clone(), entries.len());
                entries.push(ListingEntry {
                    title,
                    url,
                    published,
                });
            }
        }
    }

    Ok(entries)
}

/// Walks the site's recent-articles archive.
pub struct ArchiveClient {
    client: Client,
    base: Url,
    max_pages: usize,
    max_articles: usize,
    page_delay: Duration,
}

impl ArchiveClient {
    pub fn new(client: Client, settings: &SourceSettings) -> Result<Self> {
        let base = Url::parse(&settings.base_url)
            .with_context(|| format!("Invalid source URL: {}", settings.base_url))?;

        Ok(Self {
            client,
            base,
            max_pages: settings.max_pages,
            max_articles: settings.max_articles,
            page_delay: Duration::from_millis(300),
        })
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Listing entries published inside the window, newest first.
    ///
    /// Stops at the first entry outside the window, when a page brings
    /// nothing new, or when the page/article bounds are reached.
    pub async fn recent_entries(&self, now: DateTime<Utc>, hours: u32) -> Result<Vec<ListingEntry>> {
        let mut retained = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for page in 1..=self.max_pages {
            if page > 1 {
                tokio::time::sleep(self.page_delay).await;
            }

            let page_url = self.listing_page_url(page)?;
            let html = match self.get_page(&page_url).await {
                Ok(html) => html,
                Err(e) if page == 1 => return Err(e.context("Failed to fetch archive listing")),
                Err(e) => {
                    tracing::warn!(page, "archive page failed, stopping the walk: {:#}", e);
                    break;
                }
            };

            let fresh: Vec<ListingEntry> = parse_listing(&html, &page_url)?
                .into_iter()
                .filter(|entry| seen.insert(entry.url.clone()))
                .collect();

            if fresh.is_empty() {
                tracing::debug!(page, "listing ended");
                break;
            }

            for entry in fresh {
                if !in_window(entry.published, now, hours) {
                    tracing::debug!(url = %entry.url, published = %entry.published, "reached entries older than the window");
                    return Ok(retained);
                }
                retained.push(entry);
                if retained.len() >= self.max_articles {
                    tracing::info!(max = self.max_articles, "article bound reached");
                    return Ok(retained);
                }
            }
        }

        Ok(retained)
    }

    /// The current perspective, taken from the perspectives page.
    ///
    /// `None` when the page lists none or its date falls outside the window.
    pub async fn featured_entry(&self, now: DateTime<Utc>, hours: u32) -> Result<Option<ListingEntry>> {
        let page_url = self
            .base
            .join(FEATURED_PATH)
            .context("Failed to build perspectives URL")?;
        let html = self.get_page(&page_url).await?;
        let entries = parse_listing(&html, &page_url)?;

        let perspective = entries
            .iter()
            .position(|e| e.url.contains("/pers-"))
            .unwrap_or(0);

        let featured = entries
            .into_iter()
            .nth(perspective)
            .filter(|entry| {
                let fresh = in_window(entry.published, now, hours);
                if !fresh {
                    tracing::debug!(url = %entry.url, published = %entry.published, "perspective is older than the window");
                }
                fresh
            });
        Ok(featured)
    }

    /// One bounded GET of the site root.
    pub async fn probe(&self, timeout: Duration) -> Result<()> {
        let response = self
            .client
            .get(self.base.as_str())
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{} returned HTTP {}", self.base, status);
        }
        Ok(())
    }

    fn listing_page_url(&self, page: usize) -> Result<Url> {
        let mut url = self
            .base
            .join(LISTING_PATH)
            .context("Failed to build archive URL")?;
        url.query_pairs_mut().append_pair("page", &page.to_string());
        Ok(url)
    }

    async fn get_page(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{} returned HTTP {}", url, status);
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to read {}", url))
    }
}
