use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::time::Duration;

use crate::archive::ArchiveClient;
use crate::config::SourceSettings;
use crate::error::{BulletinError, Result};
use crate::extractor::ContentExtractor;
use crate::models::{Article, ContentBundle, Listing, ListingEntry};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; WSWSBulletin/0.1)";
const DOCUMENTS_IN_FLIGHT: usize = 4;

#[derive(Debug)]
pub enum FetchOutcome {
    Content(ContentBundle),
    /// Neither recent articles nor a perspective could be gathered.
    NothingFound,
}

/// Retrieves recent articles and the featured perspective from the source.
pub struct ContentFetcher {
    archive: ArchiveClient,
    extractor: ContentExtractor,
}

impl ContentFetcher {
    pub fn new(settings: &SourceSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()
            .map_err(|e| BulletinError::SourceUnavailable(format!("Failed to create HTTP client: {}", e)))?;

        let archive = ArchiveClient::new(client.clone(), settings).map_err(source_unavailable)?;
        let extractor = ContentExtractor::new(client);

        Ok(Self { archive, extractor })
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.archive = self.archive.with_page_delay(delay);
        self
    }

    pub fn source_url(&self) -> &str {
        self.archive.base_url().as_str()
    }

    /// Full content for every entry within the window, plus the perspective.
    ///
    /// Articles whose pages fail to load are skipped; the perspective is
    /// best-effort and held to the same window. Only a failure to read the archive listing is an error.
    pub async fn fetch(&self, window_hours: u32, now: DateTime<Utc>) -> Result<FetchOutcome> {
        tracing::info!(window_hours, "fetching recent articles");
        let entries = self
            .archive
            .recent_entries(now, window_hours)
            .await
            .map_err(source_unavailable)?;
        tracing::info!(count = entries.len(), "articles within window");

        let results: Vec<(ListingEntry, anyhow::Result<Article>)> = stream::iter(entries)
            .map(|entry| async move {
                let article = self.extractor.fetch_article(&entry).await;
                (entry, article)
            })
            .buffered(DOCUMENTS_IN_FLIGHT)
            .collect()
            .await;

        let total = results.len();
        let articles: Vec<Article> = results
            .into_iter()
            .filter_map(|(entry, result)| match result {
                Ok(article) => Some(article),
                Err(e) => {
                    tracing::warn!(url = %entry.url, "skipping article: {:#}", e);
                    None
                }
            })
            .collect();
        if articles.len() < total {
            tracing::warn!("fetched {}/{} articles", articles.len(), total);
        }

        let featured = self.fetch_featured(window_hours, now).await;

        let bundle = ContentBundle::new(articles, featured);
        if bundle.is_empty() {
            Ok(FetchOutcome::NothingFound)
        } else {
            Ok(FetchOutcome::Content(bundle))
        }
    }

    /// Listing entries and perspective link only, without downloading documents.
    pub async fn list(&self, window_hours: u32, now: DateTime<Utc>) -> Result<Listing> {
        let entries = self
            .archive
            .recent_entries(now, window_hours)
            .await
            .map_err(source_unavailable)?;

        let featured = match self.archive.featured_entry(now, window_hours).await {
            Ok(featured) => featured,
            Err(e) => {
                tracing::warn!("could not read perspectives page: {:#}", e);
                None
            }
        };

        Ok(Listing { entries, featured })
    }

    /// Reachability check of the source root, bounded to 10 seconds.
    pub async fn probe(&self) -> Result<()> {
        self.archive
            .probe(Duration::from_secs(10))
            .await
            .map_err(source_unavailable)
    }

    async fn fetch_featured(&self, window_hours: u32, now: DateTime<Utc>) -> Option<Article> {
        tracing::info!("fetching latest perspective");
        let entry = match self.archive.featured_entry(now, window_hours).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::warn!("no perspective within the window");
                return None;
            }
            Err(e) => {
                tracing::warn!("could not read perspectives page: {:#}", e);
                return None;
            }
        };

        match self.extractor.fetch_article(&entry).await {
            Ok(article) => {
                tracing::info!(title = %article.title, "found perspective");
                Some(article)
            }
            Err(e) => {
                tracing::warn!(url = %entry.url, "could not fetch perspective: {:#}", e);
                None
            }
        }
    }
}

fn source_unavailable(e: anyhow::Error) -> BulletinError {
    BulletinError::SourceUnavailable(format!("{:#}", e))
}
