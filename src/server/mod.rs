// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! API server
//!
//! HTTP + WebSocket surface over the job lifecycle engine.
//!
//! # Endpoints
//!
//! - `POST /api/get-info` - Resolve source metadata (single item or playlist)
//! - `POST /api/start-download` - Submit a download job
//! - `POST /api/set-limit` - Change the concurrency ceiling
//! - `POST /api/pause/:id` - Suspend an active job
//! - `POST /api/resume/:id` - Continue a suspended job
//! - `DELETE /api/downloads/:id` - Cancel a job
//! - `GET /api/downloads` - List all tracked jobs
//! - `GET /api/get-thumbnail/:video_id` - Probe for the best thumbnail
//! - `GET /api/download-thumbnail` - Proxy a thumbnail as an attachment
//! - `GET /ws` - Live status stream (register with `{"type":"register","id":...}`)
//! - `GET /downloads/*` - Completed files, served from the storage root
//! - `GET /health` - Health check
//!
//! # Example
//!
//! ```no_run
//! use tubequeue::config::Settings;
//! use tubequeue::server::Server;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let server = Server::new(Settings::default());
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::services::ServeDir;

use crate::config::Settings;
use crate::error::CoreError;
use crate::jobs::{Coordinator, JobSnapshot, SubmitRequest};
use crate::resolve;
use crate::thumbs::ThumbnailClient;

// Maximum request body size (1MB); submissions and info requests are tiny.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Server state shared across handlers.
pub struct AppState {
    /// The job lifecycle engine.
    pub coordinator: Arc<Coordinator>,
    /// HTTP client for thumbnail probing and proxying.
    pub thumbs: ThumbnailClient,
    /// Runtime settings (worker program, storage root).
    pub settings: Settings,
}

/// API server configuration.
#[derive(Debug)]
pub struct Server {
    settings: Settings,
}

impl Default for Server {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Server {
    /// Create a new server from runtime settings.
    /// By default, binds to 127.0.0.1 (localhost only) for security.
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Build the router with all routes.
    pub fn build_router(&self) -> Result<Router> {
        let state = Arc::new(AppState {
            coordinator: Arc::new(Coordinator::new(self.settings.clone())),
            thumbs: ThumbnailClient::new()?,
            settings: self.settings.clone(),
        });

        // Rate limiting: 60 requests per minute per IP
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(1)
                .burst_size(60)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .expect("Failed to build governor config"),
        );

        Ok(Router::new()
            .route("/api/get-info", post(get_info_handler))
            .route("/api/start-download", post(start_download_handler))
            .route("/api/set-limit", post(set_limit_handler))
            .route("/api/pause/:id", post(pause_handler))
            .route("/api/resume/:id", post(resume_handler))
            .route("/api/downloads/:id", delete(cancel_handler))
            .route("/api/downloads", get(list_handler))
            .route("/api/get-thumbnail/:video_id", get(thumbnail_probe_handler))
            .route("/api/download-thumbnail", get(thumbnail_proxy_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .nest_service("/downloads", ServeDir::new(&self.settings.storage_dir))
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
            .layer(GovernorLayer {
                config: governor_conf,
            })
            .with_state(state))
    }

    /// Start the server with graceful shutdown.
    pub async fn start(&self) -> Result<()> {
        let router = self.build_router()?;
        let addr = format!("{}:{}", self.settings.bind_address, self.settings.port);

        tracing::info!("Starting server on {}", addr);

        // Security warning if binding to all interfaces
        if self.settings.bind_address == "0.0.0.0" {
            tracing::warn!(
                "Server is binding to 0.0.0.0 which exposes the API to the network. \
                Use 127.0.0.1 (default) for local-only access."
            );
        }

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. \
                    This usually means another tubequeue server is running. \
                    Try stopping other instances or use a different port with: tubequeue --port <PORT>",
                    self.settings.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }

    /// Get the port.
    pub fn port(&self) -> u16 {
        self.settings.port
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    active: usize,
    queued: usize,
}

/// Metadata resolution request.
#[derive(Deserialize)]
struct GetInfoRequest {
    url: String,
}

/// Submission acknowledgement.
#[derive(Serialize)]
struct StartDownloadResponse {
    #[serde(rename = "downloadId")]
    download_id: String,
}

/// Concurrency ceiling change.
#[derive(Deserialize)]
struct SetLimitRequest {
    limit: usize,
}

/// Thumbnail proxy query string.
#[derive(Deserialize)]
struct ThumbnailProxyQuery {
    url: String,
    id: String,
}

/// Client-to-server WebSocket message.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WsClientMessage {
    /// Attach this connection to a job's status stream.
    Register { id: String },
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (active, queued) = state.coordinator.counts();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active,
        queued,
    })
}

/// Metadata resolution handler.
async fn get_info_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GetInfoRequest>,
) -> Result<Json<resolve::MediaInfo>, Response> {
    if request.url.trim().is_empty() {
        return Err(CoreError::Validation("missing source url".into()).into_response());
    }

    match resolve::fetch_info(&state.settings.worker_program, &request.url).await {
        Ok(info) => Ok(Json(info)),
        Err(e) => {
            tracing::error!("metadata resolution failed: {:#}", e);
            Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "failed to resolve source metadata" })),
            )
                .into_response())
        }
    }
}

/// Submission handler. Returns 201 with the new job id.
async fn start_download_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<StartDownloadResponse>), CoreError> {
    let id = state.coordinator.submit(request)?;
    Ok((
        StatusCode::CREATED,
        Json(StartDownloadResponse { download_id: id }),
    ))
}

/// Concurrency ceiling handler.
async fn set_limit_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetLimitRequest>,
) -> Result<StatusCode, CoreError> {
    state.coordinator.set_limit(request.limit)?;
    Ok(StatusCode::OK)
}

/// Pause handler.
async fn pause_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, CoreError> {
    state.coordinator.pause(&id)?;
    Ok(StatusCode::OK)
}

/// Resume handler.
async fn resume_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, CoreError> {
    state.coordinator.resume(&id)?;
    Ok(StatusCode::OK)
}

/// Cancellation handler. Idempotent, like the operation beneath it.
async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, CoreError> {
    state.coordinator.cancel(&id)?;
    Ok(StatusCode::OK)
}

/// Job listing handler, oldest first.
async fn list_handler(State(state): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(state.coordinator.list())
}

/// Thumbnail probe handler.
async fn thumbnail_probe_handler(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<String>,
) -> Response {
    match state.thumbs.probe(&video_id).await {
        Some(url) => Json(json!({ "success": true, "url": url })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "Could not find a valid thumbnail." })),
        )
            .into_response(),
    }
}

/// Thumbnail download proxy handler.
async fn thumbnail_proxy_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ThumbnailProxyQuery>,
) -> Response {
    match state.thumbs.fetch(&query.url).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "image/jpeg".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}.jpg\"", query.id),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("thumbnail proxy failed: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to download image").into_response()
        }
    }
}

// =============================================================================
// WebSocket
// =============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("status WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Wait for the next update on the registered stream, or forever when the
/// connection has not registered yet.
async fn next_update(
    updates: &mut Option<watch::Receiver<JobSnapshot>>,
) -> Result<(), watch::error::RecvError> {
    match updates {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}

/// One connection observes one job at a time. A register message attaches
/// the connection to that job's stream, answering immediately with the
/// current snapshot; registering again switches streams.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut updates: Option<watch::Receiver<JobSnapshot>> = None;

    loop {
        tokio::select! {
            // Forward status updates for the registered job
            result = next_update(&mut updates) => {
                match result {
                    Ok(()) => {
                        let snapshot = updates
                            .as_mut()
                            .map(|rx| rx.borrow_and_update().clone());
                        if let Some(snapshot) = snapshot {
                            if send_snapshot(&mut socket, &snapshot).await.is_err() {
                                tracing::debug!("status WS client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(_) => {
                        // Job cancelled; its channel is gone. Keep the
                        // connection open for a re-register.
                        tracing::debug!("status stream closed for registered job");
                        updates = None;
                    }
                }
            }

            // Receive register messages from the client
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsClientMessage>(&text) {
                            Ok(WsClientMessage::Register { id }) => {
                                match state.coordinator.subscribe(&id) {
                                    Some(rx) => {
                                        let snapshot = rx.borrow().clone();
                                        tracing::debug!(job_id = %id, "WS client registered");
                                        if send_snapshot(&mut socket, &snapshot).await.is_err() {
                                            break;
                                        }
                                        updates = Some(rx);
                                    }
                                    None => {
                                        // Ids are server-generated, so a miss
                                        // here means the job was cancelled (its
                                        // channel is gone) and there will never
                                        // be updates to attach to. The socket
                                        // stays open for a re-register.
                                        tracing::debug!(job_id = %id, "register for unknown job ignored");
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "unrecognized WS message ignored");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("status WS client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "status WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn send_snapshot(socket: &mut WebSocket, snapshot: &JobSnapshot) -> Result<(), axum::Error> {
    let json = serde_json::to_string(snapshot).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(json)).await
}

// =============================================================================
// Shutdown
// =============================================================================

/// Graceful shutdown signal handler.
///
/// Waits for SIGINT/SIGTERM before allowing the server to shut down.
async fn shutdown_signal() {
    // On Unix, listen for SIGINT and SIGTERM
    // On Windows, fall back to Ctrl+C only
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }

    tracing::info!("Shutting down server");
}
