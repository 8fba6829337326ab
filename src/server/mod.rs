//! HTTP API over the assistant hub.
//!
//! ## Endpoints
//!
//! - `GET /health`
//! - `GET /api/assistants` - assistants with tool counts and example tools
//! - `GET /api/status` - initialization and component state per assistant
//! - `GET /api/assistants/:name/tools`
//! - `GET /api/assistants/:name/messages`, `DELETE` clears the history
//! - `POST /api/assistants/:name/chat` - `{"message": "..."}`, returns the new messages
//! - `POST /api/assistants/:name/initialize` - start an assistant's resources without a prompt
//! - `POST /api/assistants/:name/reconnect`
//! - `POST /api/assistants/:name/refresh`
//! - `POST /api/shutdown` - release every assistant's resources, the server keeps running

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::assistants::{AssistantError, AssistantHub, AssistantKind};
use crate::tickets::TicketsError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        match err {
            AssistantError::Unsupported(_)
            | AssistantError::Tickets(TicketsError::InvalidArgument { .. })
            | AssistantError::MissingArguments(_)
            | AssistantError::UnknownTool(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<AssistantHub>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

fn resolve(state: &AppState, name: &str) -> ApiResult<AssistantKind> {
    name.parse::<AssistantKind>()
        .ok()
        .filter(|kind| state.hub.session(*kind).is_some())
        .ok_or_else(|| ApiError::NotFound(format!("Unknown assistant: {}", name)))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_assistants(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.list())
}

async fn system_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.status())
}

async fn tools(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kind = resolve(&state, &name)?;
    let tools = state.hub.tools(kind).unwrap_or_default();
    Ok(Json(tools))
}

async fn messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kind = resolve(&state, &name)?;
    let messages = state.hub.messages(kind).await.unwrap_or_default();
    Ok(Json(messages))
}

async fn clear_messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kind = resolve(&state, &name)?;
    state.hub.clear_history(kind).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn chat(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let kind = resolve(&state, &name)?;
    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let messages = state.hub.chat(kind, message).await.unwrap_or_default();
    Ok(Json(json!({ "assistant": kind, "messages": messages })))
}

async fn initialize(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kind = resolve(&state, &name)?;
    match state.hub.initialize(kind).await {
        Some(Ok(message)) => Ok(Json(json!({ "assistant": kind, "message": message }))),
        Some(Err(e)) => Err(e.into()),
        None => Err(ApiError::NotFound(format!("Unknown assistant: {}", name))),
    }
}

async fn reconnect(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kind = resolve(&state, &name)?;
    state.hub.reconnect(kind).await;
    Ok(Json(json!({
        "assistant": kind,
        "message": "Resources released; they will be initialized again on the next message",
    })))
}

async fn refresh(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let kind = resolve(&state, &name)?;
    match state.hub.refresh(kind).await {
        Some(Ok(message)) => Ok(Json(json!({ "assistant": kind, "message": message }))),
        Some(Err(e)) => Err(e.into()),
        None => Err(ApiError::NotFound(format!("Unknown assistant: {}", name))),
    }
}

async fn shutdown_assistants(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stopping every assistant on request");
    state.hub.shutdown().await;
    Json(json!({
        "message": "All assistants stopped; they will be initialized again on the next message",
        "status": state.hub.status(),
    }))
}

pub fn create_router(hub: Arc<AssistantHub>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/api/assistants", get(list_assistants))
        .route("/api/status", get(system_status))
        .route("/api/shutdown", post(shutdown_assistants))
        .route("/api/assistants/:name/tools", get(tools))
        .route(
            "/api/assistants/:name/messages",
            get(messages).delete(clear_messages),
        )
        .route("/api/assistants/:name/chat", post(chat))
        .route("/api/assistants/:name/initialize", post(initialize))
        .route("/api/assistants/:name/reconnect", post(reconnect))
        .route("/api/assistants/:name/refresh", post(refresh))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { hub })
}

/// Serves the API until Ctrl-C, then releases every assistant's resources.
pub async fn serve(addr: SocketAddr, hub: Arc<AssistantHub>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP API listening on {}", listener.local_addr()?);

    axum::serve(listener, create_router(Arc::clone(&hub)))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await?;

    hub.shutdown().await;
    Ok(())
}
