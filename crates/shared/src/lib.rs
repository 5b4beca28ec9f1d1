// Public modules
pub mod archive;
pub mod config;
pub mod dates;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod io;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod speech;
pub mod synthesizer;

// Re-export commonly used types
pub use config::{AiProvider, ApiKey, Config, ConfigOverrides, TtsEngine};
pub use error::{BulletinError, Result};
pub use fetcher::{ContentFetcher, FetchOutcome};
pub use models::{Article, AudioArtifact, AudioFormat, Bulletin, Citation, ContentBundle, Listing, ListingEntry};
pub use pipeline::{AudioStatus, NoProgress, Pipeline, PipelineEvent, PipelineReport, ProgressObserver};
pub use providers::{AnthropicProvider, BulletinProvider, OpenAiProvider};
pub use speech::{OpenAiSpeechBackend, PiperBackend, SpeechBackend, SpeechError, SpeechRenderer};
pub use synthesizer::BulletinSynthesizer;
