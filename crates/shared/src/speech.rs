use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::{ApiKey, Config, OpenAiSpeechSettings, PiperSettings, TtsEngine};
use crate::io;
use crate::models::{AudioArtifact, AudioFormat, Bulletin};

/// Below this the Piper model fails without a useful message.
pub const PIPER_MIN_CHARS: usize = 50;
/// Input cap of the hosted speech endpoint.
pub const OPENAI_TTS_MAX_CHARS: usize = 4096;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("text too short for speech synthesis ({chars} chars, minimum {min})")]
    TextTooShort { chars: usize, min: usize },

    #[error("voice model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("{0}")]
    Backend(String),

    #[error("speech backend produced no audio")]
    EmptyAudio,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A speech synthesis engine. Each backend produces exactly one format.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn format(&self) -> AudioFormat;

    async fn synthesize_speech(&self, text: &str) -> Result<Vec<u8>, SpeechError>;
}

/// Text to read aloud: the title and the analysis, without markdown markers.
pub fn narration_text(bulletin: &Bulletin) -> String {
    format!("{}.\n\n{}", bulletin.title, strip_markdown(&bulletin.analysis))
}

fn strip_markdown(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        let is_rule = trimmed.chars().count() >= 3
            && trimmed.chars().all(|c| matches!(c, '-' | '*' | '_' | '='));
        if is_rule {
            continue;
        }

        let cleaned: String = trimmed
            .trim_start_matches('#')
            .chars()
            .filter(|c| !matches!(c, '*' | '_'))
            .collect();
        let cleaned = cleaned.trim().to_string();

        if cleaned.is_empty() && out.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        out.push(cleaned);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Split `text` into pieces of at most `limit` chars, preferring paragraph,
/// then sentence, then whitespace boundaries.
pub fn split_for_speech(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if char_len(paragraph) <= limit {
            push_piece(&mut chunks, &mut current, paragraph, "\n\n", limit);
            continue;
        }
        for sentence in sentences(paragraph) {
            if char_len(sentence) <= limit {
                push_piece(&mut chunks, &mut current, sentence, " ", limit);
                continue;
            }
            for word in sentence.split_whitespace() {
                if char_len(word) <= limit {
                    push_piece(&mut chunks, &mut current, word, " ", limit);
                } else {
                    for piece in hard_split(word, limit) {
                        push_piece(&mut chunks, &mut current, &piece, " ", limit);
                    }
                }
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_piece(chunks: &mut Vec<String>, current: &mut String, piece: &str, sep: &str, limit: usize) {
    if current.is_empty() {
        current.push_str(piece);
    } else if char_len(current) + char_len(sep) + char_len(piece) <= limit {
        current.push_str(sep);
        current.push_str(piece);
    } else {
        chunks.push(std::mem::take(current));
        current.push_str(piece);
    }
}

fn sentences(paragraph: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(_, next)) = chars.peek() {
            if next.is_whitespace() {
                let end = i + c.len_utf8();
                let sentence = paragraph[start..end].trim();
                if !sentence.is_empty() {
                    out.push(sentence);
                }
                start = end;
            }
        }
    }
    let rest = paragraph[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

fn hard_split(word: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars.chunks(limit).map(|c| c.iter().collect()).collect()
}

// ==================== Piper ====================

/// Local synthesis through the Piper executable. Writes WAV.
pub struct PiperBackend {
    settings: PiperSettings,
    client: Client,
    timeout: Duration,
}

impl PiperBackend {
    pub fn new(settings: PiperSettings) -> Result<Self, SpeechError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| SpeechError::Backend(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            settings,
            client,
            timeout: Duration::from_secs(600),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The voice config Piper expects next to the model (`<model>.json`).
    pub fn model_config_path(&self) -> PathBuf {
        let mut name = self
            .settings
            .model
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".json");
        self.settings.model.with_file_name(name)
    }

    /// Download the voice model and its config if either is missing.
    pub async fn ensure_model(&self) -> Result<(), SpeechError> {
        let model = &self.settings.model;
        let config = self.model_config_path();
        if model.exists() && config.exists() {
            return Ok(());
        }

        let url = self.settings.model_url.as_deref().ok_or_else(|| {
            SpeechError::ModelUnavailable(format!(
                "{} not found and PIPER_MODEL_URL is empty",
                model.display()
            ))
        })?;

        if !model.exists() {
            tracing::info!(url, "downloading Piper voice model");
            self.download(url, model).await?;
        }
        if !config.exists() {
            self.download(&format!("{}.json", url), &config).await?;
        }
        Ok(())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), SpeechError> {
        let unavailable = |e: reqwest::Error| SpeechError::ModelUnavailable(format!("{}: {}", url, e));

        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?
            .bytes()
            .await
            .map_err(unavailable)?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        io::write_atomic(dest, &bytes)?;
        tracing::debug!(path = %dest.display(), bytes = bytes.len(), "saved");
        Ok(())
    }

    async fn run_piper(&self, text: &str, output: &Path) -> Result<(), SpeechError> {
        let binary = &self.settings.binary;
        let mut child = Command::new(binary)
            .arg("--model")
            .arg(&self.settings.model)
            .arg("--output_file")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpeechError::Backend(format!("could not start {}: {}", binary.display(), e)))?;

        let stdin = child.stdin.take();
        let run = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(text.as_bytes()).await?;
            }
            child.wait_with_output().await
        };

        // Bounds the stdin write as well as the wait.
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| SpeechError::Backend(format!("piper timed out after {:?}", self.timeout)))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpeechError::Backend(format!(
                "piper exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechBackend for PiperBackend {
    fn name(&self) -> &'static str {
        "piper"
    }

    fn format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    async fn synthesize_speech(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        let chars = char_len(text.trim());
        if chars < PIPER_MIN_CHARS {
            return Err(SpeechError::TextTooShort {
                chars,
                min: PIPER_MIN_CHARS,
            });
        }

        self.ensure_model().await?;

        // Removed on drop.
        let wav = tempfile::Builder::new()
            .prefix("wsws-bulletin-")
            .suffix(".wav")
            .tempfile()?;
        self.run_piper(text, wav.path()).await?;
        let audio = tokio::fs::read(wav.path()).await?;
        if audio.is_empty() {
            return Err(SpeechError::EmptyAudio);
        }
        Ok(audio)
    }
}

// ==================== OpenAI ====================

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Hosted synthesis through the OpenAI speech endpoint. Writes MP3.
pub struct OpenAiSpeechBackend {
    client: Client,
    api_key: ApiKey,
    base_url: String,
    settings: OpenAiSpeechSettings,
    max_chars: usize,
}

impl OpenAiSpeechBackend {
    pub fn new(api_key: ApiKey, settings: OpenAiSpeechSettings, base_url: String) -> Result<Self, SpeechError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| SpeechError::Backend(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            base_url,
            settings,
            max_chars: OPENAI_TTS_MAX_CHARS,
        })
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    async fn speak_chunk(&self, chunk: &str) -> Result<Vec<u8>, SpeechError> {
        let body = SpeechRequest {
            model: &self.settings.model,
            input: chunk,
            voice: &self.settings.voice,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeechError::Backend(format!("OpenAI speech request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(SpeechError::Backend(format!(
                "OpenAI speech API error {}: {}",
                status,
                error_text.trim()
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Backend(format!("Failed to read OpenAI speech response: {}", e)))?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechBackend for OpenAiSpeechBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }

    async fn synthesize_speech(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        let chunks = split_for_speech(text, self.max_chars);
        if chunks.len() > 1 {
            tracing::info!(chunks = chunks.len(), "splitting narration for hosted TTS");
        }

        let mut audio = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            tracing::debug!(chunk = i + 1, chars = char_len(chunk), "synthesizing");
            audio.extend(self.speak_chunk(chunk).await?);
        }

        if audio.is_empty() {
            return Err(SpeechError::EmptyAudio);
        }
        Ok(audio)
    }
}

// ==================== Renderer ====================

/// Writes the audio file for a bulletin through the configured backend.
pub struct SpeechRenderer {
    backend: Box<dyn SpeechBackend>,
}

impl SpeechRenderer {
    pub fn new(backend: Box<dyn SpeechBackend>) -> Self {
        Self { backend }
    }

    pub fn from_config(config: &Config) -> Result<Self, SpeechError> {
        let backend: Box<dyn SpeechBackend> = match config.tts_engine {
            TtsEngine::Piper => Box::new(PiperBackend::new(config.piper.clone())?),
            TtsEngine::OpenAi => {
                let api_key = config.openai_api_key.clone().ok_or_else(|| {
                    SpeechError::Backend("OPENAI_API_KEY is required for the openai TTS engine".to_string())
                })?;
                Box::new(OpenAiSpeechBackend::new(
                    api_key,
                    config.openai_speech.clone(),
                    config.openai_base_url.clone(),
                )?)
            }
        };
        Ok(Self::new(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn render(&self, text: &str, output_dir: &Path, date: NaiveDate) -> Result<AudioArtifact, SpeechError> {
        tracing::info!(backend = self.backend.name(), chars = char_len(text), "rendering audio");
        let audio = self.backend.synthesize_speech(text).await?;
        if audio.is_empty() {
            return Err(SpeechError::EmptyAudio);
        }

        let format = self.backend.format();
        let path = io::audio_path(output_dir, date, format);
        io::write_atomic(&path, &audio)?;

        Ok(AudioArtifact {
            path,
            format,
            bytes: audio.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Citation;
    use chrono::{Local, TimeZone};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn long_text() -> String {
        "The strike committee reported that workers at every depot voted to continue.".to_string()
    }

    // ==================== Text Preparation Tests ====================

    #[test]
    fn test_narration_strips_markdown_and_skips_citations() {
        let bulletin = Bulletin {
            title: "WSWS Daily Bulletin - February 3, 2026".to_string(),
            generated_at: Local.with_ymd_and_hms(2026, 2, 3, 7, 0, 0).unwrap(),
            analysis: "## Executive Summary\n\n**Strikes** spread _quickly_.\n\n---\n\n### Key Takeaways\n- One".to_string(),
            citations: vec![Citation {
                title: "Cited".to_string(),
                url: "https://example.org/cited".to_string(),
                featured: false,
            }],
            truncation: None,
        };

        let text = narration_text(&bulletin);
        assert!(text.starts_with("WSWS Daily Bulletin - February 3, 2026."));
        assert!(text.contains("Executive Summary\n\nStrikes spread quickly."));
        assert!(text.contains("Key Takeaways\n- One"));
        assert!(!text.contains('#'));
        assert!(!text.contains("---"));
        assert!(!text.contains("example.org"));
    }

    #[test]
    fn test_split_keeps_short_text_whole() {
        let chunks = split_for_speech("One paragraph.\n\nAnother one.", 4096);
        assert_eq!(chunks, vec!["One paragraph.\n\nAnother one."]);
    }

    #[test]
    fn test_split_prefers_paragraphs_then_sentences() {
        let text = "First paragraph here.\n\nSecond one. It has two sentences.";
        let chunks = split_for_speech(text, 25);
        assert_eq!(
            chunks,
            vec!["First paragraph here.", "Second one.", "It has two sentences."]
        );
        assert!(chunks.iter().all(|c| c.chars().count() <= 25));
    }

    #[test]
    fn test_split_falls_back_to_words_and_preserves_order() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = split_for_speech(text, 12);
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
        assert_eq!(chunks.join(" "), text);
    }

    // ==================== Piper Tests ====================

    fn piper_settings(dir: &Path, binary: PathBuf, model_url: Option<String>) -> PiperSettings {
        PiperSettings {
            binary,
            model: dir.join("voice.onnx"),
            model_url,
        }
    }

    #[tokio::test]
    async fn test_piper_rejects_short_text_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            PiperBackend::new(piper_settings(dir.path(), PathBuf::from("/nonexistent/piper"), None)).unwrap();
        let err = backend.synthesize_speech("Too short.").await.unwrap_err();
        assert!(matches!(err, SpeechError::TextTooShort { chars: 10, min: PIPER_MIN_CHARS }));
    }

    #[tokio::test]
    async fn test_piper_missing_model_without_url() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            PiperBackend::new(piper_settings(dir.path(), PathBuf::from("/nonexistent/piper"), None)).unwrap();
        let err = backend.synthesize_speech(&long_text()).await.unwrap_err();
        assert!(matches!(err, SpeechError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_piper_downloads_model_and_config() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/voices/voice.onnx"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"onnx".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/voices/voice.onnx.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/voices/voice.onnx", server.uri());
        let backend = PiperBackend::new(piper_settings(dir.path(), PathBuf::from("piper"), Some(url))).unwrap();

        backend.ensure_model().await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("voice.onnx")).unwrap(), b"onnx");
        assert!(dir.path().join("voice.onnx.json").exists());

        // Present now, so no second download.
        backend.ensure_model().await.unwrap();
    }

    #[cfg(unix)]
    fn fake_piper(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("piper");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(dir.join("voice.onnx"), b"onnx").unwrap();
        std::fs::write(dir.join("voice.onnx.json"), b"{}").unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_piper_reads_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_piper(
            dir.path(),
            "#!/bin/sh\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"--output_file\" ]; then out=\"$2\"; shift; fi\n  shift\ndone\ncat > /dev/null\nprintf 'RIFFfake' > \"$out\"\n",
        );
        let backend = PiperBackend::new(piper_settings(dir.path(), binary, None)).unwrap();

        let audio = backend.synthesize_speech(&long_text()).await.unwrap();
        assert_eq!(audio, b"RIFFfake");
        assert_eq!(backend.format(), AudioFormat::Wav);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_piper_failure_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_piper(dir.path(), "#!/bin/sh\ncat > /dev/null\necho 'voice exploded' >&2\nexit 3\n");
        let backend = PiperBackend::new(piper_settings(dir.path(), binary, None)).unwrap();

        let err = backend.synthesize_speech(&long_text()).await.unwrap_err();
        assert!(matches!(&err, SpeechError::Backend(msg) if msg.contains("voice exploded")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_piper_timeout_covers_stalled_stdin() {
        let dir = tempfile::tempdir().unwrap();
        // Never reads its input, so a large write blocks once the pipe fills.
        let binary = fake_piper(dir.path(), "#!/bin/sh\nexec sleep 30\n");
        let backend = PiperBackend::new(piper_settings(dir.path(), binary, None))
            .unwrap()
            .with_timeout(Duration::from_millis(300));

        let text = long_text().repeat(5_000);
        let started = std::time::Instant::now();
        let err = backend.synthesize_speech(&text).await.unwrap_err();

        assert!(matches!(&err, SpeechError::Backend(msg) if msg.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    // ==================== OpenAI Speech Tests ====================

    fn openai_backend(server: &MockServer) -> OpenAiSpeechBackend {
        OpenAiSpeechBackend::new(
            ApiKey::new("sk-oa"),
            OpenAiSpeechSettings {
                model: "tts-1-hd".to_string(),
                voice: "alloy".to_string(),
            },
            server.uri(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_openai_chunks_are_concatenated_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(header("authorization", "Bearer sk-oa"))
            .and(body_partial_json(json!({"input": "First part.", "response_format": "mp3", "voice": "alloy"})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"AAA".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(body_partial_json(json!({"input": "Second part."})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"BBB".to_vec()))
            .mount(&server)
            .await;

        let backend = openai_backend(&server).with_max_chars(15);
        let audio = backend
            .synthesize_speech("First part.\n\nSecond part.")
            .await
            .unwrap();
        assert_eq!(audio, b"AAABBB");
    }

    #[tokio::test]
    async fn test_openai_error_status_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = openai_backend(&server)
            .synthesize_speech(&long_text())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("upstream down"));
    }

    #[tokio::test]
    async fn test_empty_audio_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = openai_backend(&server)
            .synthesize_speech(&long_text())
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::EmptyAudio));
    }

    #[tokio::test]
    async fn test_renderer_writes_dated_file_with_backend_extension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3mp3".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let renderer = SpeechRenderer::new(Box::new(openai_backend(&server)));
        let date = NaiveDate::from_ymd_opt(2026, 2, 3).unwrap();

        let artifact = renderer.render(&long_text(), dir.path(), date).await.unwrap();
        assert_eq!(artifact.format, AudioFormat::Mp3);
        assert_eq!(artifact.path, dir.path().join("bulletin_2026-02-03.mp3"));
        assert_eq!(artifact.bytes, 6);
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"ID3mp3");
    }
}
