//! HTTP surface: project lifecycle, webhook intake, and the event stream.
//!
//! Routing is a plain method + path-segment match over a shared state
//! object. Webhook deliveries are validated, acknowledged immediately, and
//! processed asynchronously; everything else runs inline.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use eidetic_agents::SynthesizerAgent;
use eidetic_core::{Settings, StoreError, WebhookError};
use eidetic_engine::{
    parse_transcript_payload, verify_signature, EventBus, IngestOutcome, Pipeline, ProjectEvent,
};
use eidetic_storage::ProjectStore;
use futures_util::stream;
use http_body_util::{combinators::BoxBody, BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info};

pub type ResponseBody = BoxBody<Bytes, Infallible>;

/// Shared server state, one per process.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<ProjectStore>,
    pub pipeline: Arc<Pipeline>,
    pub synthesizer: SynthesizerAgent,
    pub bus: Arc<EventBus>,
}

// ============================================================================
// Request shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateProjectRequestV1 {
    id: String,
    research_question: String,
    #[serde(default)]
    seed_angles: Vec<String>,
    #[serde(default)]
    voice_agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SimulateInterviewRequestV1 {
    transcript: String,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

// ============================================================================
// Routing
// ============================================================================

pub async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<ResponseBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().trim_matches('/').to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let resp = match (&method, segments.as_slice()) {
        (&Method::GET, ["healthz"]) => text_response(StatusCode::OK, "ok\n"),

        (&Method::POST, ["projects"]) => {
            let body = req.into_body().collect().await?.to_bytes();
            handle_create_project(&state, &body).await
        }
        (&Method::GET, ["projects"]) => match state.store.list() {
            Ok(ids) => json_response(StatusCode::OK, &json!({ "projects": ids })),
            Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        (&Method::GET, ["projects", id]) => handle_project_summary(&state, id),
        (&Method::DELETE, ["projects", id]) => match state.pipeline.delete_project(id) {
            Ok(()) => json_response(StatusCode::OK, &json!({ "status": "deleted" })),
            Err(e) => store_error_response(e),
        },
        (&Method::POST, ["projects", id, "interviews"]) => {
            let id = id.to_string();
            let body = req.into_body().collect().await?.to_bytes();
            handle_simulate_interview(&state, &id, &body).await
        }
        (&Method::POST, ["projects", id, "republish"]) => match state.pipeline.republish(id).await
        {
            Ok(version) => json_response(
                StatusCode::OK,
                &json!({ "status": "published", "version": version }),
            ),
            Err(e) => json_error(StatusCode::BAD_GATEWAY, &e.to_string()),
        },
        (&Method::POST, ["projects", id, "report"]) => handle_report(&state, id).await,
        (&Method::GET, ["projects", id, "stream"]) => handle_stream(&state, id),

        (&Method::POST, ["webhook", "voice"]) => {
            let signature = req
                .headers()
                .get("elevenlabs-signature")
                .or_else(|| req.headers().get("x-voice-signature"))
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = req.into_body().collect().await?.to_bytes();
            handle_webhook(&state, &body, signature.as_deref()).await
        }

        _ => json_error(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(resp)
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_create_project(state: &Arc<AppState>, body: &[u8]) -> Response<ResponseBody> {
    let req: CreateProjectRequestV1 = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &format!("invalid request: {e}")),
    };
    if req.id.trim().is_empty() || req.research_question.trim().is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "id and research_question are required",
        );
    }

    match state
        .pipeline
        .create_project(
            req.id.trim(),
            req.research_question.trim(),
            req.seed_angles,
            req.voice_agent_id,
        )
        .await
    {
        Ok(project) => json_response(
            StatusCode::CREATED,
            &json!({
                "project_id": &project.id,
                "status": "created",
                "propositions": project.propositions.len(),
                "script_version": project.current_script().map(|s| s.version),
            }),
        ),
        Err(e) => {
            if let Some(StoreError::AlreadyExists(_)) = e.downcast_ref::<StoreError>() {
                return json_error(StatusCode::CONFLICT, &e.to_string());
            }
            error!(error = %e, "project creation failed");
            json_error(StatusCode::BAD_GATEWAY, &e.to_string())
        }
    }
}

fn handle_project_summary(state: &Arc<AppState>, project_id: &str) -> Response<ResponseBody> {
    match state.store.load(project_id) {
        Ok(project) => {
            let active = project.live_propositions().count();
            json_response(
                StatusCode::OK,
                &json!({
                    "id": &project.id,
                    "research_question": &project.research_question,
                    "created_at": project.created_at,
                    "voice_agent_id": &project.voice_agent_id,
                    "interviews": project.interviews.len(),
                    "evidence": project.evidence.len(),
                    "propositions": project.propositions.len(),
                    "active_propositions": active,
                    "scripts": project.scripts.len(),
                    "metrics": &project.metrics,
                    "publish_pending": project.publish_pending,
                }),
            )
        }
        Err(e) => store_error_response(e),
    }
}

async fn handle_simulate_interview(
    state: &Arc<AppState>,
    project_id: &str,
    body: &[u8],
) -> Response<ResponseBody> {
    let req: SimulateInterviewRequestV1 = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &format!("invalid request: {e}")),
    };
    if req.transcript.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "transcript is required");
    }
    let conversation_id = req
        .conversation_id
        .unwrap_or_else(|| format!("sim_{}", uuid::Uuid::new_v4()));

    match state
        .pipeline
        .ingest(project_id, &conversation_id, &req.transcript, req.language)
        .await
    {
        Ok(IngestOutcome::Processed {
            interview_id,
            script_version,
        }) => json_response(
            StatusCode::OK,
            &json!({
                "status": "processed",
                "conversation_id": conversation_id,
                "interview_id": interview_id,
                "script_version": script_version,
            }),
        ),
        Ok(IngestOutcome::Duplicate) => json_response(
            StatusCode::OK,
            &json!({ "status": "duplicate", "conversation_id": conversation_id }),
        ),
        Err(e) => json_error(StatusCode::BAD_GATEWAY, &e.to_string()),
    }
}

async fn handle_report(state: &Arc<AppState>, project_id: &str) -> Response<ResponseBody> {
    let project = match state.store.load(project_id) {
        Ok(p) => p,
        Err(e) => return store_error_response(e),
    };
    match state.synthesizer.synthesize(&project).await {
        Ok(report) => match state.store.save_report(project_id, &report) {
            Ok(path) => json_response(
                StatusCode::OK,
                &json!({
                    "report": report,
                    "report_path": path.display().to_string(),
                }),
            ),
            Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        Err(e) => json_error(StatusCode::BAD_GATEWAY, &e.to_string()),
    }
}

/// Validate, acknowledge, and process asynchronously. Duplicate deliveries
/// are resolved by the pipeline's idempotency check, not here.
async fn handle_webhook(
    state: &Arc<AppState>,
    body: &[u8],
    signature: Option<&str>,
) -> Response<ResponseBody> {
    if !verify_signature(
        body,
        signature,
        &state.settings.webhook_secret,
        state.settings.webhook_tolerance_secs,
        Utc::now().timestamp(),
    ) {
        return json_error(StatusCode::UNAUTHORIZED, "invalid signature");
    }

    let payload: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &format!("invalid JSON: {e}")),
    };
    let incoming = match parse_transcript_payload(&payload) {
        Ok(v) => v,
        Err(WebhookError::InvalidPayload(detail)) => {
            return json_error(StatusCode::BAD_REQUEST, &detail)
        }
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let project_id = match locate_project(state, &incoming.project_id, &incoming.agent_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let pipeline = state.pipeline.clone();
    let conversation_id = incoming.conversation_id.clone();
    info!(project = %project_id, conversation = %conversation_id, "webhook accepted");
    tokio::spawn(async move {
        if let Err(e) = pipeline
            .ingest(
                &project_id,
                &incoming.conversation_id,
                &incoming.transcript,
                incoming.language,
            )
            .await
        {
            error!(project = %project_id, error = %e, "webhook ingestion failed");
        }
    });

    json_response(
        StatusCode::OK,
        &json!({ "status": "accepted", "conversation_id": conversation_id }),
    )
}

/// Explicit project id wins; otherwise the agent binding; otherwise the
/// configured default project.
fn locate_project(
    state: &Arc<AppState>,
    project_id: &Option<String>,
    agent_id: &Option<String>,
) -> Result<String, Response<ResponseBody>> {
    if let Some(id) = project_id {
        if state.store.exists(id) {
            return Ok(id.clone());
        }
        return Err(json_error(
            StatusCode::NOT_FOUND,
            &format!("project '{id}' not found"),
        ));
    }
    if let Some(agent) = agent_id {
        match state.store.find_by_agent(agent) {
            Ok(Some(project)) => return Ok(project.id),
            Ok(None) => {}
            Err(e) => {
                return Err(json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))
            }
        }
    }
    let fallback = &state.settings.default_project_id;
    if state.store.exists(fallback) {
        return Ok(fallback.clone());
    }
    Err(json_error(
        StatusCode::NOT_FOUND,
        "no project owns this delivery",
    ))
}

// ============================================================================
// Event stream (SSE)
// ============================================================================

fn handle_stream(state: &Arc<AppState>, project_id: &str) -> Response<ResponseBody> {
    if !state.store.exists(project_id) {
        return json_error(StatusCode::NOT_FOUND, &format!("project '{project_id}' not found"));
    }
    let rx = state.bus.subscribe(project_id);

    let body_stream = stream::unfold(rx, |mut rx| async move {
        loop {
            let frame = match tokio::time::timeout(
                std::time::Duration::from_secs(15),
                rx.recv(),
            )
            .await
            {
                Ok(Ok(event)) => sse_frame(&event),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => "event: ping\ndata: {}\n\n".to_string(),
            };
            return Some((
                Ok::<_, Infallible>(Frame::data(Bytes::from(frame))),
                rx,
            ));
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/event-stream")
        .header("cache-control", "no-cache")
        .body(BoxBody::new(StreamBody::new(body_stream)))
        .unwrap_or_else(|_| internal_error())
}

fn sse_frame(event: &ProjectEvent) -> String {
    let data = serde_json::to_value(event)
        .ok()
        .and_then(|v| v.get("data").cloned())
        .unwrap_or_else(|| json!({}));
    format!("event: {}\ndata: {}\n\n", event.name(), data)
}

// ============================================================================
// Response helpers
// ============================================================================

fn text_response(status: StatusCode, body: &str) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full(body.as_bytes().to_vec()))
        .unwrap_or_else(|_| internal_error())
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{\"error\":\"serialize\"}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(full(body))
        .unwrap_or_else(|_| internal_error())
}

fn json_error(status: StatusCode, msg: &str) -> Response<ResponseBody> {
    json_response(status, &json!({ "error": msg }))
}

fn store_error_response(e: StoreError) -> Response<ResponseBody> {
    match e {
        StoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, &e.to_string()),
        StoreError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, &e.to_string()),
        _ => json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn full(body: Vec<u8>) -> ResponseBody {
    BoxBody::new(Full::new(Bytes::from(body)))
}

fn internal_error() -> Response<ResponseBody> {
    let mut resp = Response::new(full(b"{\"error\":\"internal\"}".to_vec()));
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp
}
