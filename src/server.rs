//! HTTP and WebSocket transport.
//!
//! `POST /upload` takes a multipart `file` field and answers with either the
//! cached output or a job ticket. `GET /ws` upgrades to the notification
//! channel. Rendered images are served from `/output`.

use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::channel::{ChannelTransport, run_channel};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::model::{JobId, SubmitOutcome};
use crate::service::{OUTPUT_ROUTE, Service};

const INDEX_HTML: &str = include_str!("../assets/index.html");

#[derive(Clone)]
pub struct AppState {
    service: Arc<Service>,
}

/// Response body of `POST /upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadResponse {
    Cached {
        fingerprint: Fingerprint,
        output: String,
        link: String,
    },
    Accepted {
        job_id: JobId,
        fingerprint: Fingerprint,
        output: String,
    },
}

impl From<SubmitOutcome> for UploadResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Cached {
                fingerprint,
                output,
            } => UploadResponse::Cached {
                link: Service::output_link(&output),
                fingerprint,
                output,
            },
            SubmitOutcome::Accepted(ticket) => UploadResponse::Accepted {
                job_id: ticket.job_id,
                fingerprint: ticket.fingerprint,
                output: ticket.output,
            },
        }
    }
}

/// Response body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub queued: usize,
    pub pending: usize,
    /// Queued or rendering.
    pub active: usize,
    pub cached: usize,
    pub channels: usize,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Build the application router.
pub fn router(service: Arc<Service>, config: &Config) -> Router {
    let outputs = ServeDir::new(service.output_dir());
    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload))
        .route("/ws", get(ws))
        .route("/health", get(health))
        .nest_service(OUTPUT_ROUTE, outputs)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .with_state(AppState { service })
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("bad multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read file: {e}")))?;
        let outcome = state.service.submit(&bytes).await?;
        return Ok(Json(outcome.into()));
    }
    Err(ApiError::BadRequest("missing multipart field \"file\"".to_string()))
}

async fn ws(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| async move {
        run_channel(state.service, socket).await;
    })
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let service = &state.service;
    Json(Health {
        status: "ok".to_string(),
        queued: service.queue().len(),
        pending: service.pending_len(),
        active: service.active_len(),
        cached: service.cache().len(),
        channels: service.registry().len(),
    })
}

impl ChannelTransport for WebSocket {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match WebSocket::recv(self).await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Close(_)) => return None,
                // Pings are answered by axum; pongs carry nothing for us.
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Err(e) => return Some(Err(Error::Other(format!("websocket: {e}")))),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        WebSocket::send(self, Message::Text(text.into()))
            .await
            .map_err(|e| Error::Other(format!("websocket: {e}")))
    }

    async fn close(&mut self) {
        if let Err(e) = WebSocket::send(self, Message::Close(None)).await {
            warn!(error = %e, "websocket close failed");
        }
    }
}
