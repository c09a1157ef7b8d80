use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use murmur::acquire::Acquirer;
use murmur::chunked::{ChunkLimits, ChunkOrchestrator};
use murmur::process::TranscriptionPipeline;
use murmur::server::create_router;
use murmur::{MB, ResponseFormat, TranscribeError, Transcriber, Transcript, TranscriptionOptions};
use murmur_media::{AudioSource, Segment, Segmenter};
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "murmur-test-boundary";

/// Answers with the segment prompt when there is one, `hello` otherwise.
#[derive(Default)]
struct MockTranscriber {
    calls: Mutex<Vec<TranscriptionOptions>>,
}

#[async_trait::async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        options: &TranscriptionOptions,
    ) -> Result<Transcript, TranscribeError> {
        self.calls.lock().push(options.clone());
        if !audio.exists() {
            return Err(TranscribeError::Api {
                status: 400,
                message: "Could not decode audio".to_string(),
            });
        }
        let text = options.prompt.clone().unwrap_or_else(|| "hello".to_string());
        Ok(match options.response_format {
            ResponseFormat::Json | ResponseFormat::VerboseJson => Transcript::from_text(text),
            format => Transcript::Plain { format, body: text },
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockSegmenter;

#[async_trait::async_trait]
impl Segmenter for MockSegmenter {
    async fn segment(
        &self,
        _source: &AudioSource,
        max_chunk_secs: f64,
        output_dir: &Path,
    ) -> murmur_media::Result<Vec<Segment>> {
        tokio::fs::create_dir_all(output_dir).await?;
        let mut segments = Vec::new();
        for index in 0..2 {
            let path = output_dir.join(format!("segment_{index:03}.mp3"));
            tokio::fs::write(&path, b"ID3").await?;
            segments.push(Segment {
                index,
                start_secs: index as f64 * max_chunk_secs,
                duration_secs: max_chunk_secs,
                path,
            });
        }
        Ok(segments)
    }
}

struct TestApp {
    router: Router,
    transcriber: Arc<MockTranscriber>,
    scratch: TempDir,
}

impl TestApp {
    fn new() -> Self {
        Self::with_limits(ChunkLimits::default())
    }

    fn with_limits(limits: ChunkLimits) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(MockTranscriber::default());
        let pipeline = TranscriptionPipeline::new(
            Acquirer::new(scratch.path(), 25 * MB),
            ChunkOrchestrator::new(
                transcriber.clone(),
                Arc::new(MockSegmenter),
                limits,
                scratch.path(),
            ),
            None,
            "whisper-1",
        );
        Self {
            router: create_router(Arc::new(pipeline)),
            transcriber,
            scratch,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    fn provider_calls(&self) -> usize {
        self.transcriber.calls.lock().len()
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
    }
}

fn multipart(file: Option<(&str, &str, &[u8])>, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/transcribe")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn url_request(json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/transcribe/url")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn given_running_server_when_health_check_then_returns_ok() {
    let app = TestApp::new();

    let response = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");
}

#[tokio::test]
async fn given_audio_upload_when_transcribe_then_returns_json_and_cleans_up() {
    let app = TestApp::new();

    let response = app
        .send(multipart(
            Some(("memo.mp3", "audio/mpeg", &[7u8; 4096][..])),
            &[("language", "en")],
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    assert_eq!(json_body(response).await, serde_json::json!({ "text": "hello" }));

    let calls = app.transcriber.calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].language.as_deref(), Some("en"));
    assert_eq!(calls[0].model, "whisper-1");
    assert!(app.scratch_is_empty());
}

#[tokio::test]
async fn given_text_format_when_transcribe_then_returns_plain_text() {
    let app = TestApp::new();

    let response = app
        .send(multipart(
            Some(("memo.ogg", "audio/ogg", &[1u8; 128][..])),
            &[("response_format", "text")],
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello");
}

#[tokio::test]
async fn given_large_upload_when_transcribe_then_segments_are_merged() {
    let app = TestApp::with_limits(ChunkLimits {
        max_single_file_mb: 0.001,
        max_chunk_secs: 30.0,
    });

    let response = app
        .send(multipart(
            Some(("lecture.m4a", "audio/x-m4a", &[2u8; 4096][..])),
            &[("prompt", "Physics"), ("response_format", "srt")],
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "text": "Physics (Part 1) Physics (Part 2)" })
    );
    assert_eq!(app.provider_calls(), 2);
    assert!(app.scratch_is_empty());
}

#[tokio::test]
async fn given_non_audio_upload_when_transcribe_then_returns_bad_request() {
    let app = TestApp::new();

    let response = app
        .send(multipart(
            Some(("notes.txt", "text/plain", &b"not audio"[..])),
            &[],
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "Invalid file type. Only audio files are allowed."
    );
    assert_eq!(app.provider_calls(), 0);
}

#[tokio::test]
async fn given_out_of_range_temperature_when_transcribe_then_no_provider_call() {
    let app = TestApp::new();

    let response = app
        .send(multipart(
            Some(("memo.wav", "audio/wav", &[0u8; 256][..])),
            &[("temperature", "1.5")],
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "Temperature must be between 0 and 1"
    );
    assert_eq!(app.provider_calls(), 0);
    assert!(app.scratch_is_empty());
}

#[tokio::test]
async fn given_no_file_when_transcribe_then_returns_bad_request() {
    let app = TestApp::new();

    let response = app.send(multipart(None, &[("prompt", "hi")])).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No audio file provided");
}

#[tokio::test]
async fn given_unknown_format_when_transcribe_then_returns_bad_request() {
    let app = TestApp::new();

    let response = app
        .send(multipart(
            Some(("memo.mp3", "audio/mpeg", &[0u8; 16][..])),
            &[("response_format", "docx")],
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.provider_calls(), 0);
}

#[tokio::test]
async fn given_missing_url_when_transcribe_url_then_returns_bad_request() {
    let app = TestApp::new();

    let response = app.send(url_request(r#"{"prompt": "hi"}"#)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No audio URL provided");
}

#[tokio::test]
async fn given_numeric_temperature_out_of_range_when_transcribe_url_then_returns_bad_request() {
    let app = TestApp::new();

    let response = app
        .send(url_request(
            r#"{"url": "http://127.0.0.1:9/a.mp3", "temperature": 2}"#,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.provider_calls(), 0);
}

#[tokio::test]
async fn given_unreachable_url_when_transcribe_url_then_returns_bad_gateway() {
    let app = TestApp::new();

    // nothing listens on the discard port
    let response = app
        .send(url_request(r#"{"url": "http://127.0.0.1:9/a.mp3"}"#))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Download failed");
    assert!(body["details"].as_str().unwrap().starts_with("Failed to download audio"));
    assert!(app.scratch_is_empty());
}
