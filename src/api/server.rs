//! HTTP server: routing, multipart parsing, status-code mapping.

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::handlers;
use super::models::{AnalyzeRequest, MediaSource};
use crate::error::PipelineError;
use crate::fetch::MediaFetcher;
use crate::pipeline::{PipelineOrchestrator, TaskOptions};

/// Uploads are capped at 500 MiB
const MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub fetcher: Arc<MediaFetcher>,
}

/// Configure and start the HTTP server
pub async fn start_http_server(
    orchestrator: Arc<PipelineOrchestrator>,
    fetcher: Arc<MediaFetcher>,
    host: &str,
    port: u16,
) -> Result<()> {
    let app_state = AppState {
        orchestrator,
        fetcher,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/analyze_video", post(analyze_video_handler))
        .route("/api/v1/analysis_result/:task_id", get(analysis_result_handler))
        .route("/api/v1/tasks", get(list_tasks_handler))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors));

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    info!("API server listening on http://{}:{}", host, port);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(handlers::health_check().await)
}

async fn analyze_video_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> impl IntoResponse {
    let request = match parse_analyze_request(multipart).await {
        Ok(request) => request,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": message })),
            )
                .into_response();
        }
    };

    match handlers::submit(state.orchestrator.clone(), state.fetcher.clone(), request).await {
        Ok(response) => (StatusCode::ACCEPTED, Json(response)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn analysis_result_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match handlers::poll(&state.orchestrator, &task_id).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(PipelineError::TaskNotFound(id)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("task not found: {}", id) })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn list_tasks_handler(State(state): State<AppState>) -> impl IntoResponse {
    match handlers::list_tasks(&state.orchestrator).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Pull the media source and task options out of the multipart form.
///
/// Exactly one of `file` and `file_url` must be present.
async fn parse_analyze_request(mut multipart: Multipart) -> Result<AnalyzeRequest, String> {
    let mut file: Option<Vec<u8>> = None;
    let mut file_url: Option<String> = None;
    let mut options = TaskOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("malformed multipart body: {}", e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| format!("could not read uploaded file: {}", e))?;
                file = Some(bytes.to_vec());
            }
            "file_url" => {
                file_url = Some(read_text(field, &name).await?);
            }
            "identifier" => {
                options.identifier = Some(read_text(field, &name).await?);
            }
            "platform" => {
                options.platform = Some(read_text(field, &name).await?);
            }
            "classify_content" => {
                let value = read_text(field, &name).await?;
                options.classify_content = matches!(value.as_str(), "true" | "1" | "yes");
            }
            other => {
                return Err(format!("unexpected form field: {}", other));
            }
        }
    }

    let source = match (file, file_url) {
        (Some(bytes), None) => {
            if bytes.is_empty() {
                return Err("uploaded file is empty".to_string());
            }
            MediaSource::Bytes(bytes)
        }
        (None, Some(url)) => MediaSource::Url(url),
        (Some(_), Some(_)) => {
            return Err("provide either file or file_url, not both".to_string());
        }
        (None, None) => {
            return Err("either file or file_url is required".to_string());
        }
    };

    Ok(AnalyzeRequest { source, options })
}

async fn read_text(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String, String> {
    field
        .text()
        .await
        .map_err(|e| format!("could not read field {}: {}", name, e))
}
