use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{BulletinError, Result};
use crate::fetcher::{ContentFetcher, FetchOutcome};
use crate::io;
use crate::models::{AudioArtifact, Bulletin};
use crate::speech::{narration_text, SpeechError, SpeechRenderer};
use crate::synthesizer::BulletinSynthesizer;

/// Stage transitions reported while the pipeline runs.
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    Fetching { source: &'a str, window_hours: u32 },
    Fetched { articles: usize, featured: Option<&'a str> },
    NothingFound,
    Synthesizing { provider: &'static str, model: &'a str },
    BulletinWritten { path: &'a Path, citations: usize },
    RenderingAudio { backend: &'static str },
    AudioWritten(&'a AudioArtifact),
    AudioSkipped(&'a str),
    AudioFailed(&'a str),
}

pub trait ProgressObserver {
    fn on_event(&self, event: &PipelineEvent<'_>);
}

/// Observer that ignores every event.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_event(&self, _event: &PipelineEvent<'_>) {}
}

#[derive(Debug)]
pub enum AudioStatus {
    Written(AudioArtifact),
    Skipped(String),
    /// Rendering failed with a non-fatal error; the text bulletin still stands.
    Failed(BulletinError),
}

#[derive(Debug)]
pub enum PipelineReport {
    /// No recent articles and no perspective; nothing was written.
    NothingToDo,
    Produced {
        bulletin: Bulletin,
        bulletin_path: PathBuf,
        audio: AudioStatus,
    },
}

enum AudioStage {
    Disabled,
    Ready(SpeechRenderer),
    Unavailable(String),
}

/// fetch → synthesize → persist text → render audio.
pub struct Pipeline {
    output_dir: PathBuf,
    window_hours: u32,
    fetcher: ContentFetcher,
    synthesizer: BulletinSynthesizer,
    audio: AudioStage,
}

impl Pipeline {
    /// A text-only pipeline; add audio with [`Pipeline::with_renderer`].
    pub fn new(
        output_dir: PathBuf,
        window_hours: u32,
        fetcher: ContentFetcher,
        synthesizer: BulletinSynthesizer,
    ) -> Self {
        Self {
            output_dir,
            window_hours,
            fetcher,
            synthesizer,
            audio: AudioStage::Disabled,
        }
    }

    pub fn with_renderer(mut self, renderer: SpeechRenderer) -> Self {
        self.audio = AudioStage::Ready(renderer);
        self
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = ContentFetcher::new(&config.source)?;
        let synthesizer = BulletinSynthesizer::from_config(config)?;
        let mut pipeline = Self::new(
            config.output_dir.clone(),
            config.recency_hours,
            fetcher,
            synthesizer,
        );

        if config.audio_enabled {
            pipeline.audio = match SpeechRenderer::from_config(config) {
                Ok(renderer) => AudioStage::Ready(renderer),
                Err(e) => {
                    tracing::warn!("audio backend unavailable: {}", e);
                    AudioStage::Unavailable(e.to_string())
                }
            };
        }
        Ok(pipeline)
    }

    pub async fn run(&self, now: DateTime<Local>, observer: &dyn ProgressObserver) -> Result<PipelineReport> {
        io::ensure_output_dir(&self.output_dir)?;

        observer.on_event(&PipelineEvent::Fetching {
            source: self.fetcher.source_url(),
            window_hours: self.window_hours,
        });
        let bundle = match self
            .fetcher
            .fetch(self.window_hours, now.with_timezone(&Utc))
            .await?
        {
            FetchOutcome::Content(bundle) => bundle,
            FetchOutcome::NothingFound => {
                tracing::info!("nothing to synthesize");
                observer.on_event(&PipelineEvent::NothingFound);
                return Ok(PipelineReport::NothingToDo);
            }
        };
        observer.on_event(&PipelineEvent::Fetched {
            articles: bundle.articles.len(),
            featured: bundle.featured.as_ref().map(|f| f.title.as_str()),
        });

        observer.on_event(&PipelineEvent::Synthesizing {
            provider: self.synthesizer.provider_name(),
            model: self.synthesizer.model(),
        });
        let bulletin = self.synthesizer.synthesize(&bundle, now).await?;

        let date = now.date_naive();
        let bulletin_path = io::bulletin_path(&self.output_dir, date);
        io::write_atomic(&bulletin_path, bulletin.render().as_bytes())?;
        tracing::info!(path = %bulletin_path.display(), "bulletin written");
        observer.on_event(&PipelineEvent::BulletinWritten {
            path: &bulletin_path,
            citations: bulletin.citations.len(),
        });

        let audio = match &self.audio {
            AudioStage::Disabled => {
                let reason = "audio disabled";
                observer.on_event(&PipelineEvent::AudioSkipped(reason));
                AudioStatus::Skipped(reason.to_string())
            }
            AudioStage::Unavailable(reason) => {
                audio_failed(SpeechError::Backend(reason.clone()), observer)?
            }
            AudioStage::Ready(renderer) => {
                observer.on_event(&PipelineEvent::RenderingAudio {
                    backend: renderer.backend_name(),
                });
                match renderer
                    .render(&narration_text(&bulletin), &self.output_dir, date)
                    .await
                {
                    Ok(artifact) => {
                        tracing::info!(path = %artifact.path.display(), "audio written");
                        observer.on_event(&PipelineEvent::AudioWritten(&artifact));
                        AudioStatus::Written(artifact)
                    }
                    Err(e) => audio_failed(e, observer)?,
                }
            }
        };

        Ok(PipelineReport::Produced {
            bulletin,
            bulletin_path,
            audio,
        })
    }
}

/// Applies the failure policy to a speech error. Fatal kinds abort the run.
fn audio_failed(err: SpeechError, observer: &dyn ProgressObserver) -> Result<AudioStatus> {
    let reason = err.to_string();
    let err = BulletinError::TtsFailed(err);
    if err.is_fatal() {
        return Err(err);
    }
    tracing::warn!("audio rendering failed: {}", reason);
    observer.on_event(&PipelineEvent::AudioFailed(&reason));
    Ok(AudioStatus::Failed(err))
}
