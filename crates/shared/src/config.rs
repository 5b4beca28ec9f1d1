use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use url::Url;

use crate::error::{BulletinError, Result};

pub const APP_DIR: &str = "wsws-bulletin";

const DEFAULT_ANTHROPIC_MODEL: &str = "claude-haiku-4-5-20251001";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_SOURCE_BASE_URL: &str = "https://www.wsws.org";
const DEFAULT_OPENAI_TTS_MODEL: &str = "tts-1-hd";
const DEFAULT_OPENAI_TTS_VOICE: &str = "alloy";
const DEFAULT_PIPER_VOICE: &str = "en_US-lessac-medium.onnx";
const DEFAULT_PIPER_MODEL_URL: &str =
    "https://huggingface.co/rhasspy/piper-voices/resolve/main/en/en_US/lessac/medium/en_US-lessac-medium.onnx";
const DEFAULT_RECENCY_HOURS: u32 = 24;
/// Ten years.
pub const MAX_RECENCY_HOURS: u32 = 87_600;
const DEFAULT_MAX_ARTICLES: usize = 40;
const DEFAULT_MAX_PAGES: usize = 10;

/// Raw key/value configuration, as read from the env file and process environment.
pub type ConfigVars = HashMap<String, String>;

/// Opaque provider credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProvider {
    Anthropic,
    OpenAi,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProvider::Anthropic => "anthropic",
            AiProvider::OpenAi => "openai",
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            AiProvider::Anthropic => "ANTHROPIC_API_KEY",
            AiProvider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl FromStr for AiProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(AiProvider::Anthropic),
            "openai" => Ok(AiProvider::OpenAi),
            other => Err(format!(
                "unknown AI provider '{}'. Use 'anthropic' or 'openai'",
                other
            )),
        }
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsEngine {
    /// Local Piper voice model, writes WAV.
    Piper,
    /// Hosted OpenAI speech endpoint, writes MP3.
    OpenAi,
}

impl TtsEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtsEngine::Piper => "piper",
            TtsEngine::OpenAi => "openai",
        }
    }
}

impl FromStr for TtsEngine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "piper" | "local" | "coqui" => Ok(TtsEngine::Piper),
            "openai" => Ok(TtsEngine::OpenAi),
            other => Err(format!(
                "unknown TTS engine '{}'. Use 'piper' or 'openai'",
                other
            )),
        }
    }
}

impl fmt::Display for TtsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub base_url: String,
    pub max_articles: usize,
    pub max_pages: usize,
}

#[derive(Debug, Clone)]
pub struct PiperSettings {
    pub binary: PathBuf,
    pub model: PathBuf,
    pub model_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiSpeechSettings {
    pub model: String,
    pub voice: String,
}

/// Values given explicitly on the command line. They win over everything else.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub recency_hours: Option<u32>,
    pub ai_provider: Option<AiProvider>,
    pub tts_engine: Option<TtsEngine>,
    pub output_dir: Option<PathBuf>,
    pub no_audio: bool,
}

/// Resolved, validated configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub recency_hours: u32,
    pub ai_provider: AiProvider,
    pub tts_engine: TtsEngine,
    pub audio_enabled: bool,
    pub output_dir: PathBuf,
    pub anthropic_api_key: Option<ApiKey>,
    pub openai_api_key: Option<ApiKey>,
    pub anthropic_model: String,
    pub openai_model: String,
    pub anthropic_base_url: String,
    pub openai_base_url: String,
    pub openai_speech: OpenAiSpeechSettings,
    pub piper: PiperSettings,
    pub source: SourceSettings,
    pub max_prompt_chars: Option<usize>,
}

impl Config {
    /// Read the env file and process environment, then resolve against `overrides`.
    pub fn load(env_file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let vars = load_vars(env_file)?;
        Self::resolve(&vars, overrides)
    }

    pub fn resolve(vars: &ConfigVars, overrides: &ConfigOverrides) -> Result<Self> {
        let (config, problems) = Self::resolve_with_problems(vars, overrides);
        if problems.is_empty() {
            Ok(config)
        } else {
            Err(BulletinError::ConfigInvalid(problems))
        }
    }

    /// Resolve every field, substituting defaults for bad values, and collect
    /// what was wrong instead of stopping at the first problem.
    pub fn resolve_with_problems(
        vars: &ConfigVars,
        overrides: &ConfigOverrides,
    ) -> (Self, Vec<String>) {
        let mut problems = Vec::new();
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let ai_provider = match overrides.ai_provider {
            Some(p) => p,
            None => match get("AI_PROVIDER") {
                Some(raw) => raw.parse().unwrap_or_else(|_| {
                    problems.push(format!("Invalid AI_PROVIDER: {}", raw));
                    AiProvider::Anthropic
                }),
                None => AiProvider::Anthropic,
            },
        };

        let tts_engine = match overrides.tts_engine {
            Some(e) => e,
            None => match get("TTS_ENGINE") {
                Some(raw) => raw.parse().unwrap_or_else(|_| {
                    problems.push(format!("Invalid TTS_ENGINE: {}", raw));
                    TtsEngine::Piper
                }),
                None => TtsEngine::Piper,
            },
        };

        let recency_hours = match overrides.recency_hours {
            Some(0) => {
                problems.push("Recency window must be a positive number of hours".to_string());
                DEFAULT_RECENCY_HOURS
            }
            Some(h) => h,
            None => parse_positive(get("RECENCY_HOURS"), "RECENCY_HOURS", DEFAULT_RECENCY_HOURS, &mut problems),
        };
        let recency_hours = if recency_hours > MAX_RECENCY_HOURS {
            problems.push(format!(
                "Recency window of {} hours exceeds the maximum of {}",
                recency_hours, MAX_RECENCY_HOURS
            ));
            DEFAULT_RECENCY_HOURS
        } else {
            recency_hours
        };

        let audio_enabled = if overrides.no_audio {
            false
        } else {
            parse_bool(get("AUDIO_ENABLED"), "AUDIO_ENABLED", true, &mut problems)
        };

        let output_dir = overrides
            .output_dir
            .clone()
            .or_else(|| get("OUTPUT_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./output"));

        let anthropic_api_key = get("ANTHROPIC_API_KEY").map(ApiKey::new);
        let openai_api_key = get("OPENAI_API_KEY").map(ApiKey::new);

        let selected_key = match ai_provider {
            AiProvider::Anthropic => &anthropic_api_key,
            AiProvider::OpenAi => &openai_api_key,
        };
        if selected_key.is_none() {
            problems.push(format!(
                "Missing API key for provider '{}'. Set {} in your .env file or environment",
                ai_provider,
                ai_provider.key_var()
            ));
        }

        if audio_enabled && tts_engine == TtsEngine::OpenAi && openai_api_key.is_none() {
            problems.push("TTS_ENGINE is 'openai' but OPENAI_API_KEY is not set".to_string());
        }

        let anthropic_base_url = parse_base_url(
            get("ANTHROPIC_BASE_URL"),
            "ANTHROPIC_BASE_URL",
            DEFAULT_ANTHROPIC_BASE_URL,
            &mut problems,
        );
        let openai_base_url = parse_base_url(
            get("OPENAI_BASE_URL"),
            "OPENAI_BASE_URL",
            DEFAULT_OPENAI_BASE_URL,
            &mut problems,
        );
        let source_base_url = parse_base_url(
            get("WSWS_BASE_URL"),
            "WSWS_BASE_URL",
            DEFAULT_SOURCE_BASE_URL,
            &mut problems,
        );

        let max_articles = parse_positive(get("MAX_ARTICLES"), "MAX_ARTICLES", DEFAULT_MAX_ARTICLES, &mut problems);
        let max_pages = parse_positive(get("MAX_ARCHIVE_PAGES"), "MAX_ARCHIVE_PAGES", DEFAULT_MAX_PAGES, &mut problems);
        let max_prompt_chars = get("MAX_PROMPT_CHARS")
            .map(|raw| parse_positive(Some(raw), "MAX_PROMPT_CHARS", 1usize, &mut problems));

        let piper_model = get("PIPER_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(default_piper_model);
        // An explicitly empty PIPER_MODEL_URL disables downloading.
        let piper_model_url = match vars.get("PIPER_MODEL_URL") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v.trim().to_string()),
            None => Some(DEFAULT_PIPER_MODEL_URL.to_string()),
        };

        let config = Config {
            recency_hours,
            ai_provider,
            tts_engine,
            audio_enabled,
            output_dir,
            anthropic_api_key,
            openai_api_key,
            anthropic_model: get("ANTHROPIC_MODEL").unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            anthropic_base_url,
            openai_base_url,
            openai_speech: OpenAiSpeechSettings {
                model: get("OPENAI_TTS_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_TTS_MODEL.to_string()),
                voice: get("OPENAI_TTS_VOICE").unwrap_or_else(|| DEFAULT_OPENAI_TTS_VOICE.to_string()),
            },
            piper: PiperSettings {
                binary: get("PIPER_BINARY")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("piper")),
                model: piper_model,
                model_url: piper_model_url,
            },
            source: SourceSettings {
                base_url: source_base_url,
                max_articles,
                max_pages,
            },
            max_prompt_chars,
        };

        (config, problems)
    }

    /// Credential for the selected AI provider.
    pub fn api_key(&self) -> Option<&ApiKey> {
        match self.ai_provider {
            AiProvider::Anthropic => self.anthropic_api_key.as_ref(),
            AiProvider::OpenAi => self.openai_api_key.as_ref(),
        }
    }

    /// Model identifier for the selected AI provider.
    pub fn model(&self) -> &str {
        match self.ai_provider {
            AiProvider::Anthropic => &self.anthropic_model,
            AiProvider::OpenAi => &self.openai_model,
        }
    }
}

/// Env file values overlaid with the process environment.
///
/// An explicit `env_file` must exist. Without one the first existing default
/// location is used, if any.
pub fn load_vars(env_file: Option<&Path>) -> Result<ConfigVars> {
    let mut vars = ConfigVars::new();

    let file = match env_file {
        Some(path) => {
            if !path.exists() {
                return Err(BulletinError::ConfigInvalid(vec![format!(
                    "Env file not found: {}",
                    path.display()
                )]));
            }
            Some(path.to_path_buf())
        }
        None => default_env_file(),
    };

    if let Some(path) = file {
        tracing::debug!(path = %path.display(), "reading env file");
        vars.extend(read_env_file(&path)?);
    }

    // A file never clobbers an already-exported variable.
    vars.extend(std::env::vars());

    Ok(vars)
}

fn read_env_file(path: &Path) -> Result<ConfigVars> {
    let invalid = |e: dotenvy::Error| {
        BulletinError::ConfigInvalid(vec![format!(
            "Could not read env file {}: {}",
            path.display(),
            e
        )])
    };

    let mut vars = ConfigVars::new();
    for item in dotenvy::from_path_iter(path).map_err(invalid)? {
        let (key, value) = item.map_err(invalid)?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// First existing env file among the default locations.
pub fn default_env_file() -> Option<PathBuf> {
    // 1. Current directory (for development)
    let local = PathBuf::from(".env");
    if local.exists() {
        return Some(local);
    }

    // 2. ~/.config/wsws-bulletin/.env (standard config location)
    if let Some(config_dir) = dirs::config_dir() {
        let config_path = config_dir.join(APP_DIR).join(".env");
        if config_path.exists() {
            return Some(config_path);
        }
    }

    // 3. ~/.wsws-bulletin.env
    if let Some(home_dir) = dirs::home_dir() {
        let home_path = home_dir.join(".wsws-bulletin.env");
        if home_path.exists() {
            return Some(home_path);
        }
    }

    None
}

fn default_piper_model() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("piper")
        .join(DEFAULT_PIPER_VOICE)
}

fn parse_positive<T>(raw: Option<String>, key: &str, default: T, problems: &mut Vec<String>) -> T
where
    T: FromStr + PartialOrd + Default,
{
    match raw {
        None => default,
        Some(raw) => match raw.parse::<T>() {
            Ok(v) if v > T::default() => v,
            _ => {
                problems.push(format!("Invalid {}: {} (expected a positive integer)", key, raw));
                default
            }
        },
    }
}

fn parse_bool(raw: Option<String>, key: &str, default: bool, problems: &mut Vec<String>) -> bool {
    match raw {
        None => default,
        Some(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                problems.push(format!("Invalid {}: {} (expected true or false)", key, raw));
                default
            }
        },
    }
}

fn parse_base_url(raw: Option<String>, key: &str, default: &str, problems: &mut Vec<String>) -> String {
    let value = raw.unwrap_or_else(|| default.to_string());
    match Url::parse(&value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            value.trim_end_matches('/').to_string()
        }
        _ => {
            problems.push(format!("Invalid {}: {}", key, value));
            default.to_string()
        }
    }
}
