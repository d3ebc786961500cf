//! HTTP handlers for the Murmur server.
//!
//! Publishing is a plain JSON POST. Reading is a long poll: the request
//! stays open until a message arrives, the poll times out, or the client
//! goes away, in which case its waiter is cancelled.

use crate::config::Config;
use crate::metrics::{self, PollOutcome, WaiterMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use murmur_core::{
    Batch, BufferStats, Message, MessageBuffer, RoomError, Rooms, RoomsConfig, WaiterId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Per-room message buffers.
    pub rooms: Rooms,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let rooms_config = RoomsConfig {
            max_rooms: config.limits.max_rooms,
            cache_size: config.buffer.cache_size,
        };

        Self {
            rooms: Rooms::with_config(rooms_config),
            config,
        }
    }

    fn room(&self, name: Option<&str>) -> Result<Arc<MessageBuffer>, ApiError> {
        let name = name.unwrap_or(&self.config.default_room);
        let buffer = self.rooms.get_or_create(name)?;
        metrics::set_active_rooms(self.rooms.len());
        Ok(buffer)
    }
}

/// API errors, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The message body was empty.
    #[error("Message body cannot be empty")]
    EmptyMessage,

    /// The message body exceeded the configured limit.
    #[error("Message body is {size} bytes, limit is {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// The room could not be resolved.
    #[error(transparent)]
    Room(#[from] RoomError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::EmptyMessage => StatusCode::BAD_REQUEST,
            Self::MessageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Room(RoomError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            Self::Room(RoomError::MaxRoomsReached) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "empty_message",
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::Room(_) => "room",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_error(self.kind());
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Body of `POST /a/message/new`.
#[derive(Debug, Deserialize)]
pub struct NewMessageRequest {
    /// Message text.
    pub body: String,
    /// Target room; the default room if absent.
    #[serde(default)]
    pub room: Option<String>,
    /// Display name of the author.
    #[serde(default)]
    pub author: Option<String>,
}

/// Body of `POST /a/message/updates`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdatesRequest {
    /// Id of the last message the client has seen.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Room to read; the default room if absent.
    #[serde(default)]
    pub room: Option<String>,
}

/// Response of `POST /a/message/updates`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdatesResponse {
    /// New messages, oldest first. Empty when the poll timed out.
    pub messages: Vec<Message>,
}

impl From<Batch> for UpdatesResponse {
    fn from(batch: Batch) -> Self {
        Self {
            messages: batch.to_vec(),
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    // Leave headroom over the body limit for the JSON envelope.
    let body_limit = state.config.limits.max_message_size.saturating_mul(2) + 1024;

    Router::new()
        .route("/a/message/new", post(new_message_handler))
        .route("/a/message/updates", post(updates_handler))
        .route("/a/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Run the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Murmur server listening on {}", addr);
    info!(
        cache_size = config.buffer.cache_size,
        poll_timeout_ms = config.poll.timeout_ms,
        "Long-poll endpoint: http://{}/a/message/updates",
        addr
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Per-room buffer statistics.
async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, BufferStats>> {
    Json(state.rooms.stats().into_iter().collect())
}

/// Publish a new message.
async fn new_message_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewMessageRequest>,
) -> Result<Json<Message>, ApiError> {
    if req.body.trim().is_empty() {
        return Err(ApiError::EmptyMessage);
    }
    let max = state.config.limits.max_message_size;
    if req.body.len() > max {
        return Err(ApiError::MessageTooLarge {
            size: req.body.len(),
            max,
        });
    }

    let buffer = state.room(req.room.as_deref())?;

    let mut message = Message::new(req.body);
    if let Some(author) = req.author {
        message = message.with_author(author);
    }

    let resolved = buffer.publish_one(message.clone());
    metrics::record_publish(message.body_size());

    debug!(message = %message.id, recipients = resolved, "Published");
    Ok(Json(message))
}

/// Long-poll for messages newer than the request's cursor.
async fn updates_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdatesRequest>,
) -> Result<Json<UpdatesResponse>, ApiError> {
    let buffer = state.room(req.room.as_deref())?;
    let mut handle = buffer.wait_newer(req.cursor.as_deref());

    let Some(id) = handle.id() else {
        let batch = handle.await;
        debug!(count = batch.len(), "Caught up from cache");
        metrics::record_poll(PollOutcome::CatchUp, 0.0);
        return Ok(Json(batch.into()));
    };

    let mut pending = PendingPoll::new(Arc::clone(&buffer), id);
    let batch = match tokio::time::timeout(state.config.poll.timeout(), &mut handle).await {
        Ok(batch) => batch,
        Err(_) => {
            buffer.cancel_waiter(id);
            // A publish may have won the race with the cancel.
            handle.await
        }
    };
    let outcome = if batch.is_empty() {
        PollOutcome::TimedOut
    } else {
        PollOutcome::Delivered
    };
    pending.finish(outcome);

    Ok(Json(batch.into()))
}

/// A registered long-poll waiter owned by an in-flight request.
///
/// If the request future is dropped before [`finish`](Self::finish), the
/// client disconnected and the waiter is cancelled.
struct PendingPoll {
    buffer: Arc<MessageBuffer>,
    id: WaiterId,
    started: Instant,
    finished: bool,
    _metrics: WaiterMetricsGuard,
}

impl PendingPoll {
    fn new(buffer: Arc<MessageBuffer>, id: WaiterId) -> Self {
        Self {
            buffer,
            id,
            started: Instant::now(),
            finished: false,
            _metrics: WaiterMetricsGuard::new(),
        }
    }

    fn finish(&mut self, outcome: PollOutcome) {
        self.finished = true;
        metrics::record_poll(outcome, self.started.elapsed().as_secs_f64());
    }
}

impl Drop for PendingPoll {
    fn drop(&mut self) {
        if !self.finished && self.buffer.cancel_waiter(self.id) {
            warn!(waiter = self.id, "Client went away, cancelled waiter");
            metrics::record_poll(PollOutcome::Cancelled, self.started.elapsed().as_secs_f64());
        }
    }
}
