use chrono::{DateTime, Local, NaiveDate};
use std::fmt;
use std::path::PathBuf;

const RULE_WIDTH: usize = 80;

/// One scraped document.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub published: NaiveDate,
    pub url: String,
}

/// A listing entry discovered on the archive, before its document is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub title: String,
    pub url: String,
    pub published: NaiveDate,
}

/// Result of walking the archive without downloading any documents.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub entries: Vec<ListingEntry>,
    pub featured: Option<ListingEntry>,
}

/// What the fetcher hands to the synthesizer.
#[derive(Debug, Clone, Default)]
pub struct ContentBundle {
    /// Discovery order of the archive listing (newest first).
    pub articles: Vec<Article>,
    pub featured: Option<Article>,
}

impl ContentBundle {
    pub fn new(articles: Vec<Article>, featured: Option<Article>) -> Self {
        Self { articles, featured }
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty() && self.featured.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub title: String,
    pub url: String,
    pub featured: bool,
}

/// Records how much of the bundle was left out of the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Truncation {
    pub dropped_articles: usize,
    pub body_cut: bool,
}

/// The synthesized analytical document.
#[derive(Debug, Clone)]
pub struct Bulletin {
    pub title: String,
    pub generated_at: DateTime<Local>,
    pub analysis: String,
    pub citations: Vec<Citation>,
    pub truncation: Option<Truncation>,
}

impl Bulletin {
    pub fn title_for(date: NaiveDate) -> String {
        format!("WSWS Daily Bulletin - {}", date.format("%B %-d, %Y"))
    }

    /// Full text document as persisted to disk.
    pub fn render(&self) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let mut out = String::new();

        out.push_str(&rule);
        out.push('\n');
        out.push_str(&center(&self.title, RULE_WIDTH));
        out.push('\n');
        out.push_str(&rule);
        out.push_str("\n\n");

        out.push_str(self.analysis.trim());
        out.push_str("\n\n");

        out.push_str(&rule);
        out.push('\n');
        out.push_str(&format!(
            "Generated: {}\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        ));

        if let Some(t) = self.truncation {
            if t.dropped_articles > 0 {
                out.push_str(&format!(
                    "Note: {} older article(s) omitted to fit the provider's input limit.\n",
                    t.dropped_articles
                ));
            }
            if t.body_cut {
                out.push_str("Note: source text was shortened to fit the provider's input limit.\n");
            }
        }

        out.push_str("\nSource Articles:\n");
        for citation in &self.citations {
            if citation.featured {
                out.push_str(&format!("  • [PERSPECTIVE] {}\n", citation.title));
            } else {
                out.push_str(&format!("  • {}\n", citation.title));
            }
            out.push_str(&format!("    {}\n", citation.url));
        }
        out.push_str(&rule);
        out.push('\n');

        out
    }
}

fn center(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let left = (width - len) / 2;
    let right = width - len - left;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(right))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AudioFormat::Wav => "WAV",
            AudioFormat::Mp3 => "MP3",
        })
    }
}

/// A written audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub bytes: usize,
}
