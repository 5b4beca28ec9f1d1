use chrono::{DateTime, Local, TimeZone};
use serde_json::json;
use shared::config::ConfigVars;
use shared::{
    AudioFormat, AudioStatus, BulletinError, BulletinSynthesizer, Config, ConfigOverrides,
    ContentFetcher, NoProgress, Pipeline, PipelineReport, SpeechRenderer,
};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = "/en/archive/recent";
const PERSPECTIVES: &str = "/en/topics/site_area/perspectives";

fn now() -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn config(server: &MockServer, output_dir: &Path) -> Config {
    let vars: ConfigVars = [
        ("ANTHROPIC_API_KEY", "sk-ant-test".to_string()),
        ("OPENAI_API_KEY", "sk-oa-test".to_string()),
        ("ANTHROPIC_BASE_URL", server.uri()),
        ("OPENAI_BASE_URL", server.uri()),
        ("WSWS_BASE_URL", server.uri()),
        ("TTS_ENGINE", "openai".to_string()),
        ("OUTPUT_DIR", output_dir.display().to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    Config::resolve(&vars, &ConfigOverrides::default()).unwrap()
}

fn pipeline(config: &Config) -> Pipeline {
    let fetcher = ContentFetcher::new(&config.source)
        .unwrap()
        .with_page_delay(Duration::ZERO);
    let synthesizer = BulletinSynthesizer::from_config(config)
        .unwrap()
        .with_retry_delay(Duration::ZERO);
    let renderer = SpeechRenderer::from_config(config).unwrap();

    Pipeline::new(
        config.output_dir.clone(),
        config.recency_hours,
        fetcher,
        synthesizer,
    )
    .with_renderer(renderer)
}

fn links(hrefs: &[&str]) -> String {
    let anchors: String = hrefs
        .iter()
        .map(|h| format!("<li><a href=\"{}\">Headline for {}</a></li>", h, h))
        .collect();
    format!("<html><body><ul>{}</ul></body></html>", anchors)
}

fn article_page(title: &str) -> String {
    format!(
        "<html><head><meta name=\"author\" content=\"Staff\"></head><body><h1>{}</h1>\
         <div class=\"article-content\"><p>{}</p><p>{}</p></div></body></html>",
        title,
        "Thousands of workers walked out on Monday after management announced another round of layoffs.",
        "The union bureaucracy has moved to isolate the strike and prevent it from spreading to other plants."
    )
}

async fn mount_get(server: &MockServer, page_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Three articles inside the window, one stale entry, and a perspective.
async fn mount_source(server: &MockServer) {
    let articles = [
        "/en/articles/2026/03/01/strike.html",
        "/en/articles/2026/03/01/layoffs.html",
        "/en/articles/2026/03/01/rally.html",
    ];
    let mut listing = articles.to_vec();
    listing.push("/en/articles/2026/02/20/old.html");

    Mock::given(method("GET"))
        .and(path(LISTING))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(links(&listing)))
        .mount(server)
        .await;

    for (i, href) in articles.iter().enumerate() {
        mount_get(server, href, article_page(&format!("Article {}", i + 1))).await;
    }

    let perspective = "/en/articles/2026/03/01/pers-m01.html";
    mount_get(server, PERSPECTIVES, links(&[perspective])).await;
    mount_get(server, perspective, article_page("The perspective")).await;
}

async fn mount_llm(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "## Executive Summary\n\nThe strike wave is spreading across the sector."}]
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_tts(server: &MockServer, status: u16) {
    let response = if status == 200 {
        ResponseTemplate::new(200).set_body_bytes(b"ID3-fake-mp3".to_vec())
    } else {
        ResponseTemplate::new(status).set_body_string("speech backend unavailable")
    };
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(response)
        .mount(server)
        .await;
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ==================== Scenario Tests ====================

#[tokio::test]
async fn test_full_run_cites_every_source_and_writes_both_files() {
    let server = MockServer::start().await;
    mount_source(&server).await;
    mount_llm(&server, 1).await;
    mount_tts(&server, 200).await;

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("out");
    let config = config(&server, &dir);
    let report = pipeline(&config).run(now(), &NoProgress).await.unwrap();

    let (bulletin, bulletin_path, audio) = match report {
        PipelineReport::Produced {
            bulletin,
            bulletin_path,
            audio,
        } => (bulletin, bulletin_path, audio),
        PipelineReport::NothingToDo => panic!("expected a bulletin"),
    };

    assert_eq!(bulletin.citations.len(), 4);
    assert!(bulletin.citations[0].featured);
    assert_eq!(bulletin.citations[0].title, "The perspective");
    assert_eq!(bulletin_path, dir.join("bulletin_2026-03-01.md"));

    let text = std::fs::read_to_string(&bulletin_path).unwrap();
    assert!(text.contains("WSWS Daily Bulletin - March 1, 2026"));
    assert!(text.contains("The strike wave is spreading"));
    assert!(text.contains("[PERSPECTIVE] The perspective"));
    assert!(!text.contains("old.html"));

    match audio {
        AudioStatus::Written(artifact) => {
            assert_eq!(artifact.format, AudioFormat::Mp3);
            assert_eq!(std::fs::read(&artifact.path).unwrap(), b"ID3-fake-mp3");
        }
        other => panic!("expected audio, got {:?}", other),
    }

    assert_eq!(
        files_in(&dir),
        vec!["bulletin_2026-03-01.md", "bulletin_2026-03-01.mp3"]
    );
}

#[tokio::test]
async fn test_empty_source_is_nothing_to_do() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LISTING))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(links(&["/en/articles/2026/02/20/old.html"])),
        )
        .mount(&server)
        .await;
    mount_get(&server, PERSPECTIVES, links(&[])).await;
    mount_llm(&server, 0).await;

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("out");
    let config = config(&server, &dir);
    let report = pipeline(&config).run(now(), &NoProgress).await.unwrap();

    assert!(matches!(report, PipelineReport::NothingToDo));
    assert!(files_in(&dir).is_empty());
}

#[tokio::test]
async fn test_stale_perspective_alone_is_nothing_to_do() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LISTING))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(links(&["/en/articles/2026/02/20/old.html"])),
        )
        .mount(&server)
        .await;
    let stale = "/en/articles/2026/01/05/pers-a05.html";
    mount_get(&server, PERSPECTIVES, links(&[stale])).await;
    Mock::given(method("GET"))
        .and(path(stale))
        .respond_with(ResponseTemplate::new(200).set_body_string(article_page("Old perspective")))
        .expect(0)
        .mount(&server)
        .await;
    mount_llm(&server, 0).await;

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("out");
    let config = config(&server, &dir);
    let report = pipeline(&config).run(now(), &NoProgress).await.unwrap();

    assert!(matches!(report, PipelineReport::NothingToDo));
    assert!(files_in(&dir).is_empty());
}

#[tokio::test]
async fn test_audio_failure_keeps_text_bulletin() {
    let server = MockServer::start().await;
    mount_source(&server).await;
    mount_llm(&server, 1).await;
    mount_tts(&server, 500).await;

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("out");
    let config = config(&server, &dir);
    let report = pipeline(&config).run(now(), &NoProgress).await.unwrap();

    match report {
        PipelineReport::Produced { audio, .. } => {
            match audio {
                AudioStatus::Failed(err) => {
                    assert!(matches!(err, BulletinError::TtsFailed(_)));
                    assert!(!err.is_fatal());
                    assert!(err.to_string().contains("speech backend unavailable"));
                }
                other => panic!("expected failed audio, got {:?}", other),
            }
        }
        PipelineReport::NothingToDo => panic!("expected a bulletin"),
    }
    assert_eq!(files_in(&dir), vec!["bulletin_2026-03-01.md"]);
}

#[tokio::test]
async fn test_rerun_on_same_day_overwrites() {
    let server = MockServer::start().await;
    mount_source(&server).await;
    mount_llm(&server, 2).await;
    mount_tts(&server, 200).await;

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("out");
    let config = config(&server, &dir);
    let pipeline = pipeline(&config);
    pipeline.run(now(), &NoProgress).await.unwrap();
    pipeline
        .run(now() + chrono::Duration::hours(3), &NoProgress)
        .await
        .unwrap();

    assert_eq!(
        files_in(&dir),
        vec!["bulletin_2026-03-01.md", "bulletin_2026-03-01.mp3"]
    );
    let text = std::fs::read_to_string(dir.join("bulletin_2026-03-01.md")).unwrap();
    assert!(text.contains("Generated: 2026-03-01 15:00:00"));
}

#[tokio::test]
async fn test_synthesis_failure_writes_nothing() {
    let server = MockServer::start().await;
    mount_source(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_request_error"))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("out");
    let config = config(&server, &dir);
    let err = pipeline(&config).run(now(), &NoProgress).await.unwrap_err();

    assert!(matches!(err, BulletinError::SynthesisFailed(_)));
    assert!(err.is_fatal());
    assert!(files_in(&dir).is_empty());
}

#[tokio::test]
async fn test_unreachable_source_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LISTING))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_llm(&server, 0).await;

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("out");
    let config = config(&server, &dir);
    let err = pipeline(&config).run(now(), &NoProgress).await.unwrap_err();

    assert!(matches!(err, BulletinError::SourceUnavailable(_)));
}
