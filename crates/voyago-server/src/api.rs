use std::sync::Arc;

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, State},
    http::{request::Parts, HeaderValue, Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use voyago_realtime::{Gateway, EVENT_NEW_MESSAGE};
use voyago_store::{Database, MediaKind, MessageWithAttachments, NewAttachment, UserSummary};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::uploads::UploadStore;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub gateway: Arc<Gateway>,
    pub uploads: Arc<UploadStore>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

/// The caller's identity, read from the `x-user-id` header.
///
/// Stand-in for the session middleware owned by the auth collaborator: the
/// REST surface trusts the header the same way the socket handshake trusts
/// its query parameter, so both sit behind the same deployment boundary.
pub struct AuthUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ServerError::Unauthorized("Missing x-user-id header".to_string()))?;

        Ok(AuthUser(user_id.to_string()))
    }
}

pub fn build_router(state: AppState) -> Router {
    let uploads_dir = state.config.uploads_dir.clone();
    let max_upload = state.config.max_upload_size;

    Router::new()
        .route("/health", get(health_check))
        .route("/messages/conversations", get(sidebar_users))
        .route("/messages/send/:id", post(send_message))
        .route("/messages/:id", get(message_history))
        .route("/ws", get(ws::ws_handler))
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Any-origin CORS when no origins are configured; an explicit allow-list
/// (with credentials) otherwise.
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    if config.cors_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(Any)
        .allow_credentials(false)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance: state.config.instance_name.clone(),
    })
}

/// Sidebar listing: every known user except the caller.
async fn sidebar_users(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserSummary>>, ServerError> {
    let users = state.db.list_users_except(&user_id).await?;
    Ok(Json(users))
}

/// Message history with one other user, oldest first.  No conversation yet
/// means an empty history, not an error.
async fn message_history(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    Path(other_id): Path<String>,
) -> Result<Json<Vec<MessageWithAttachments>>, ServerError> {
    let Some(conversation) = state
        .db
        .find_conversation_by_participants(&user_id, &other_id)
        .await?
    else {
        return Ok(Json(Vec::new()));
    };

    let messages = state.db.list_messages(conversation.id).await?;
    Ok(Json(messages))
}

/// Send a message to another user: persist first (message + attachments in
/// one transaction), then push `newMessage` to the recipient wherever they
/// are connected.  The push is best-effort; the stored message is what the
/// recipient reconciles from.
async fn send_message(
    AuthUser(sender_id): AuthUser,
    State(state): State<AppState>,
    Path(receiver_id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<MessageWithAttachments>), ServerError> {
    let mut body: Option<String> = None;
    let mut attachments: Vec<NewAttachment> = Vec::new();
    let mut stored_names: Vec<String> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        match field.name().unwrap_or("") {
            "message" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                body = Some(text);
            }
            "attachments" => {
                let file_name = field.file_name().unwrap_or("attachment").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;

                let stored = state.uploads.store_upload(&file_name, &data).await?;

                attachments.push(NewAttachment {
                    kind: MediaKind::from_mime(&mime_type),
                    url: stored.url,
                    mime_type,
                    file_name,
                    file_size: stored.size,
                    width: None,
                    height: None,
                    duration_secs: None,
                    metadata: serde_json::json!({
                        "storage": "local",
                        "storedName": stored.stored_name,
                    }),
                });
                stored_names.push(stored.stored_name);
            }
            other => {
                warn!(field = %other, "Ignoring unknown multipart field");
            }
        }
    }

    // Persist message and attachment rows; if that fails, the attachment
    // files written above would be orphans, so they are removed before the
    // error propagates.
    let message = match persist_message(&state, &sender_id, &receiver_id, body.as_deref(), &attachments).await {
        Ok(message) => message,
        Err(e) => {
            discard_uploads(&state.uploads, &stored_names).await;
            return Err(e);
        }
    };

    // Persistence succeeded; the push below is purely an optimization.
    let payload = serde_json::to_value(&message)
        .map_err(|e| ServerError::Internal(format!("Failed to encode message event: {}", e)))?;
    state
        .gateway
        .emit_to_user(&receiver_id, EVENT_NEW_MESSAGE, payload)
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

async fn persist_message(
    state: &AppState,
    sender_id: &str,
    receiver_id: &str,
    body: Option<&str>,
    attachments: &[NewAttachment],
) -> Result<MessageWithAttachments, ServerError> {
    let conversation = state
        .db
        .find_or_create_conversation(sender_id, receiver_id)
        .await?;

    let message = state
        .db
        .append_message(conversation.id, sender_id, body, attachments)
        .await?;

    info!(
        sender = %sender_id,
        receiver = %receiver_id,
        conversation = %conversation.id,
        attachments = attachments.len(),
        "message stored"
    );

    Ok(message)
}

/// Remove attachment files whose message rows never made it to the store.
async fn discard_uploads(uploads: &UploadStore, stored_names: &[String]) {
    for name in stored_names {
        if let Err(e) = uploads.remove(name).await {
            warn!(error = %e, name = %name, "Failed to remove orphaned attachment");
        }
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
