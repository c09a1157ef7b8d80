//! HTTP surface of the relay.

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::TryStreamExt;
use murmur_core::{MB, RequestParams};
use murmur_transcribe::Transcript;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, error, warn};

use crate::acquire::Acquirer;
use crate::cleanup::CleanupList;
use crate::error::{PipelineError, Result};
use crate::process::{TranscriptionPipeline, Upload};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TranscriptionPipeline>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Body of `POST /api/transcribe/url`.
#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    pub params: RequestParams,
}

pub fn create_router(pipeline: Arc<TranscriptionPipeline>) -> Router {
    let body_limit = pipeline.acquirer().max_upload_bytes() + MB;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/transcribe", post(transcribe_upload_handler))
        .route("/api/transcribe/url", post(transcribe_url_handler))
        .layer(DefaultBodyLimit::max(body_limit as usize))
        .layer(trace_layer)
        .layer(cors)
        .with_state(AppState { pipeline })
}

pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
        }),
    )
}

#[tracing::instrument(skip_all)]
pub async fn transcribe_upload_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response> {
    let transcript = state
        .pipeline
        .transcribe_upload(|acquirer, cleanup| receive_upload(multipart, acquirer, cleanup))
        .await?;
    Ok(transcript_response(transcript))
}

#[tracing::instrument(skip_all)]
pub async fn transcribe_url_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<UrlRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = body.map_err(|e| PipelineError::Validation(e.body_text()))?;
    let Some(url) = request.url.filter(|url| !url.trim().is_empty()) else {
        return Err(PipelineError::Validation("No audio URL provided".to_string()));
    };

    let transcript = state.pipeline.transcribe_url(url.trim(), request.params).await?;
    Ok(transcript_response(transcript))
}

/// Reads the multipart body: the `file` field is streamed to scratch
/// storage, every other field is taken as a request parameter.
async fn receive_upload(
    mut multipart: Multipart,
    acquirer: Acquirer,
    cleanup: CleanupList,
) -> Result<Upload> {
    let mut params = RequestParams::default();
    let mut source = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        if name != "file" {
            let value = field.text().await.map_err(multipart_error)?;
            params.set(&name, value);
            continue;
        }

        if source.is_some() {
            return Err(PipelineError::Validation(
                "Only one audio file can be uploaded per request".to_string(),
            ));
        }

        let file_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        debug!(file_name = ?file_name, content_type = ?content_type, "Receiving upload");

        let stored = acquirer
            .store_upload(
                file_name.as_deref(),
                content_type.as_deref(),
                field.map_err(multipart_error),
                &cleanup,
            )
            .await?;
        source = Some(stored);
    }

    let Some(source) = source else {
        return Err(PipelineError::Validation("No audio file provided".to_string()));
    };
    Ok(Upload { source, params })
}

fn multipart_error(err: MultipartError) -> PipelineError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PipelineError::PayloadTooLarge(err.body_text())
    } else {
        PipelineError::Validation(err.body_text())
    }
}

fn transcript_response(transcript: Transcript) -> Response {
    match transcript {
        Transcript::Json(value) => Json(value).into_response(),
        Transcript::Plain { format, body } => {
            ([(header::CONTENT_TYPE, format.content_type())], body).into_response()
        }
    }
}

impl PipelineError {
    /// HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Download(_) => StatusCode::BAD_GATEWAY,
            Self::Media(_) | Self::Transcription(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation(message) | Self::PayloadTooLarge(message) => ErrorResponse {
                error: message.clone(),
                details: None,
            },
            Self::Download(_) => ErrorResponse {
                error: "Download failed".to_string(),
                details: Some(self.to_string()),
            },
            _ => ErrorResponse {
                error: "Transcription failed".to_string(),
                details: Some(self.to_string()),
            },
        };

        if status.is_server_error() {
            error!(status = %status, error = %self, "Request failed");
        } else {
            warn!(status = %status, error = %self, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}
