use thiserror::Error;

use crate::speech::SpeechError;

/// Failure kinds surfaced by the bulletin pipeline.
#[derive(Debug, Error)]
pub enum BulletinError {
    #[error("content source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("nothing to synthesize: no recent articles and no perspective")]
    InsufficientContent,

    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("text-to-speech failed: {0}")]
    TtsFailed(#[from] SpeechError),

    #[error("invalid configuration:\n  • {}", .0.join("\n  • "))]
    ConfigInvalid(Vec<String>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BulletinError {
    /// Whether this failure should abort the invocation.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BulletinError::InsufficientContent | BulletinError::TtsFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BulletinError>;
