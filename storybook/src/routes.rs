//! HTTP routes under `/api`.

use crate::config::{ServerConfig, BODY_LIMIT};
use crate::error::ApiError;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use storybook_core::{delivery, parse_story_id, themes, Page, Story, StoryEvent, StoryOrchestrator, StoryRequest};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Events buffered between a generation task and its HTTP response.
const EVENT_BUFFER: usize = 32;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: StoryOrchestrator,
}

pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let story_routes = Router::new()
        .route("/generate", post(generate_story))
        .route("/story/:id", get(get_story))
        .route("/regenerate-page", post(regenerate_page))
        .route("/generate-pdf", post(generate_pdf))
        .route("/themes", get(list_themes));

    let mut router = Router::new()
        .nest("/api/story", story_routes)
        .route("/api/health", get(health));

    if let Some(dir) = &config.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire framing of the generation stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    Ndjson,
    Sse,
}

impl StreamFormat {
    /// SSE when the client asks for `text/event-stream`, NDJSON otherwise.
    pub fn negotiate(headers: &HeaderMap) -> Self {
        let wants_sse = headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/event-stream"));
        if wants_sse {
            StreamFormat::Sse
        } else {
            StreamFormat::Ndjson
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            StreamFormat::Ndjson => "application/x-ndjson",
            StreamFormat::Sse => "text/event-stream",
        }
    }

    pub fn frame(self, event: &StoryEvent) -> Result<String, serde_json::Error> {
        match self {
            StreamFormat::Ndjson => event.to_ndjson(),
            StreamFormat::Sse => event.to_sse(),
        }
    }
}

/// Start a generation run and stream its events.
///
/// The run is spawned so it finishes and publishes even if the client
/// disconnects mid-stream.
async fn generate_story(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StoryRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;

    let format = StreamFormat::negotiate(&headers);
    let (mut sink, events) = delivery::channel(EVENT_BUFFER);
    let orchestrator = state.orchestrator.clone();

    tokio::spawn(async move {
        match orchestrator.generate(request, &mut sink).await {
            Ok(id) => tracing::debug!(story_id = %id, "generation task finished"),
            Err(e) => tracing::warn!(error = %e, "generation task ended with error"),
        }
    });

    let body = ReceiverStream::new(events).map(move |event| format.frame(&event));

    Response::builder()
        .header(header::CONTENT_TYPE, format.content_type())
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn get_story(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Story>, ApiError> {
    let id = parse_story_id(&id)?;
    Ok(Json(state.orchestrator.get_story(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegenerateRequest {
    story_id: String,
    page_number: u32,
}

#[derive(Debug, Serialize)]
struct RegenerateResponse {
    success: bool,
    page: Page,
}

async fn regenerate_page(
    State(state): State<AppState>,
    Json(req): Json<RegenerateRequest>,
) -> Result<Json<RegenerateResponse>, ApiError> {
    let id = parse_story_id(&req.story_id)?;
    let page = state.orchestrator.regenerate_page(id, req.page_number).await?;
    Ok(Json(RegenerateResponse {
        success: true,
        page,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PdfRequest {
    story_id: String,
}

async fn generate_pdf(
    State(state): State<AppState>,
    Json(req): Json<PdfRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_story_id(&req.story_id)?;
    let pdf = state.orchestrator.export_pdf(id).await?;
    tracing::info!(story_id = %id, bytes = pdf.len(), "exported pdf");

    Ok((
        [
            (
                header::CONTENT_TYPE,
                state.orchestrator.document_media_type().to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"story-{id}.pdf\""),
            ),
        ],
        pdf,
    ))
}

async fn list_themes() -> Json<Value> {
    Json(json!({ "themes": themes() }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Children's Story Generator API is running",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
