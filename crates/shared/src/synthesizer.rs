use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::time::Duration;

use crate::config::Config;
use crate::error::{BulletinError, Result};
use crate::models::{Article, Bulletin, Citation, ContentBundle, Truncation};
use crate::providers::{provider_from_config, BulletinProvider, BulletinRequest, ProviderError};

pub const SYSTEM_PROMPT: &str = "You are an expert analyst of socialist and Trotskyist political analysis, \
with deep knowledge of Marxist theory, historical materialism, and the Fourth International's \
political perspective. Your task is to synthesize multiple articles from the World Socialist \
Web Site (WSWS) into a comprehensive daily bulletin for advanced readers.

Focus on:
1. The most important political developments and their class character
2. Theoretical and historical lessons that emerge from current events
3. Connections between different struggles and events globally
4. The strategic implications for the international working class
5. Historical parallels and the development of contradictions in capitalism

Your analysis should be sophisticated, assuming the reader is familiar with Marxist concepts \
and the political perspective of the International Committee of the Fourth International (ICFI).";

/// Section headings the provider is asked to produce, in order.
pub const SECTIONS: [&str; 5] = [
    "Executive Summary",
    "Major Political Developments",
    "Theoretical and Historical Insights",
    "International Connections",
    "Key Takeaways",
];

/// Content formatted for the provider, with the sources that made it in.
#[derive(Debug, Clone)]
pub struct PromptDocument {
    pub text: String,
    pub citations: Vec<Citation>,
    pub truncation: Option<Truncation>,
}

/// Format the bundle into at most `max_chars` characters.
///
/// Oldest articles are dropped first (later listing position breaks ties).
/// If a single source still does not fit, its body is cut. An article that
/// repeats the perspective's URL is sent and cited only as the perspective.
pub fn build_prompt_document(bundle: &ContentBundle, max_chars: usize) -> PromptDocument {
    let mut featured = bundle.featured.clone();

    let mut seen: HashSet<&str> = HashSet::new();
    if let Some(f) = &bundle.featured {
        seen.insert(f.url.as_str());
    }
    let mut articles: Vec<Article> = bundle
        .articles
        .iter()
        .filter(|a| seen.insert(a.url.as_str()))
        .cloned()
        .collect();

    let keep_at_least = if featured.is_some() { 0 } else { 1 };
    let mut dropped_articles = 0;
    let mut text = render_document(featured.as_ref(), &articles);

    while text.chars().count() > max_chars && articles.len() > keep_at_least {
        let oldest = articles
            .iter()
            .enumerate()
            .min_by_key(|(i, a)| (a.published, std::cmp::Reverse(*i)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        articles.remove(oldest);
        dropped_articles += 1;
        text = render_document(featured.as_ref(), &articles);
    }

    let mut body_cut = false;
    let length = text.chars().count();
    if length > max_chars {
        let overflow = length - max_chars;
        let remaining = match featured.as_mut() {
            Some(f) => Some(f),
            None => articles.first_mut(),
        };
        if let Some(source) = remaining {
            let keep = source.body.chars().count().saturating_sub(overflow);
            source.body = source.body.chars().take(keep).collect();
            body_cut = true;
            text = render_document(featured.as_ref(), &articles);
        }
    }

    let mut citations = Vec::with_capacity(articles.len() + 1);
    if let Some(f) = &featured {
        citations.push(Citation {
            title: f.title.clone(),
            url: f.url.clone(),
            featured: true,
        });
    }
    citations.extend(articles.iter().map(|a| Citation {
        title: a.title.clone(),
        url: a.url.clone(),
        featured: false,
    }));

    let truncation = if dropped_articles > 0 || body_cut {
        Some(Truncation {
            dropped_articles,
            body_cut,
        })
    } else {
        None
    };

    PromptDocument {
        text,
        citations,
        truncation,
    }
}

fn render_document(featured: Option<&Article>, articles: &[Article]) -> String {
    let mut parts = String::new();

    if let Some(p) = featured {
        parts.push_str("=== PERSPECTIVE (FEATURED ANALYSIS) ===\n");
        push_source(&mut parts, p);
    }

    if !articles.is_empty() {
        parts.push_str(&format!(
            "=== RECENT ARTICLES ({} articles) ===\n\n",
            articles.len()
        ));
        for (i, article) in articles.iter().enumerate() {
            parts.push_str(&format!("--- Article {} ---\n", i + 1));
            push_source(&mut parts, article);
        }
    }

    parts
}

fn push_source(parts: &mut String, article: &Article) {
    parts.push_str(&format!("Title: {}\n", article.title));
    parts.push_str(&format!(
        "Author: {}\n",
        article.author.as_deref().unwrap_or("Unknown")
    ));
    parts.push_str(&format!("Date: {}\n", article.published.format("%Y-%m-%d")));
    parts.push_str(&format!("URL: {}\n\n", article.url));
    parts.push_str(&article.body);
    parts.push_str("\n\n");
}

pub fn user_prompt(document: &str) -> String {
    format!(
        r#"Please analyze and synthesize the following WSWS articles into a
comprehensive daily bulletin. Structure your analysis as follows:

1. **{}**: A brief overview of the most critical developments (2-3 paragraphs)

2. **{}**: Detailed analysis of the most important events, organized
   by region or theme, with focus on:
   - The class forces involved
   - The political trajectory and implications
   - Connection to broader historical processes

3. **{}**: Draw out the key theoretical lessons, including:
   - Historical parallels and precedents
   - Development of class contradictions
   - Strategic questions for the working class
   - Significance for socialist perspective

4. **{}**: How different events and struggles relate to each other
   as part of global class struggle

5. **{}**: 3-5 essential points for revolutionary socialists to understand

Here are the articles:

{}"#,
        SECTIONS[0], SECTIONS[1], SECTIONS[2], SECTIONS[3], SECTIONS[4], document
    )
}

/// Turns a content bundle into a bulletin using one text-generation provider.
pub struct BulletinSynthesizer {
    provider: Box<dyn BulletinProvider>,
    max_input_chars: usize,
    retry_delay: Duration,
}

impl BulletinSynthesizer {
    pub fn new(provider: Box<dyn BulletinProvider>) -> Self {
        let max_input_chars = provider.max_input_chars();
        Self {
            provider,
            max_input_chars,
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut synthesizer = Self::new(provider_from_config(config)?);
        if let Some(max) = config.max_prompt_chars {
            synthesizer = synthesizer.with_max_input_chars(max);
        }
        Ok(synthesizer)
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub async fn synthesize(&self, bundle: &ContentBundle, now: DateTime<Local>) -> Result<Bulletin> {
        if bundle.is_empty() {
            return Err(BulletinError::InsufficientContent);
        }

        let document = build_prompt_document(bundle, self.max_input_chars);
        if let Some(t) = document.truncation {
            tracing::warn!(
                dropped_articles = t.dropped_articles,
                body_cut = t.body_cut,
                max_chars = self.max_input_chars,
                "prompt truncated to fit provider input limit"
            );
        }

        let request = BulletinRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: user_prompt(&document.text),
        };

        tracing::info!(
            provider = self.provider.name(),
            model = self.provider.model(),
            sources = document.citations.len(),
            "generating synthesis"
        );

        let analysis = match self.provider.generate_bulletin(&request).await {
            Ok(text) => text,
            Err(ProviderError::Transient(msg)) => {
                tracing::warn!("{}; retrying once in {:?}", msg, self.retry_delay);
                tokio::time::sleep(self.retry_delay).await;
                self.provider
                    .generate_bulletin(&request)
                    .await
                    .map_err(|e| BulletinError::SynthesisFailed(e.to_string()))?
            }
            Err(e) => return Err(BulletinError::SynthesisFailed(e.to_string())),
        };

        tracing::info!("synthesis complete");

        Ok(Bulletin {
            title: Bulletin::title_for(now.date_naive()),
            generated_at: now,
            analysis,
            citations: document.citations,
            truncation: document.truncation,
        })
    }
}
