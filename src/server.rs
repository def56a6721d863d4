//! Ingestion server
//!
//! Routes:
//! - `GET /`            liveness string
//! - `GET /health`      status, version and uptime
//! - `GET /values`      current raw snapshot (polling fallback)
//! - `POST /healthData` merge an ingestion batch, respond with the merged record
//! - `GET /updates`     server-sent events, one `update` event per record

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;

use crate::error::VitalsError;
use crate::schema::{IngestBatch, RawSnapshot};
use crate::store::SnapshotStore;
use crate::VITALS_VERSION;

/// SSE event name carrying a snapshot
pub const UPDATE_EVENT: &str = "update";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn SnapshotStore>,
    started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            started_at: Instant::now(),
        }
    }
}

/// Build the router over `store`
pub fn router(store: Arc<dyn SnapshotStore>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/values", get(values_handler))
        .route("/healthData", post(ingest_handler))
        .route("/updates", get(updates_handler))
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(store))
}

/// Serve on an already bound listener until the task is dropped
pub async fn serve(
    listener: TcpListener,
    store: Arc<dyn SnapshotStore>,
) -> Result<(), VitalsError> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("ingestion server listening on {}", addr);
    }
    axum::serve(listener, router(store)).await?;
    Ok(())
}

/// Bind `addr` and serve
pub async fn bind_and_serve(
    addr: &str,
    store: Arc<dyn SnapshotStore>,
) -> Result<(), VitalsError> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, store).await
}

async fn root_handler() -> &'static str {
    "vitals-board is up"
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": VITALS_VERSION,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn values_handler(State(state): State<AppState>) -> Json<RawSnapshot> {
    Json(state.store.current().await)
}

async fn ingest_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let batch: IngestBatch = serde_json::from_slice(&body)?;
    let receipt = state.store.ingest(batch).await?;

    let mut response = Json(receipt.snapshot).into_response();
    if let Ok(value) = HeaderValue::from_str(&receipt.batch_id.to_string()) {
        response.headers_mut().insert("x-batch-id", value);
    }
    Ok(response)
}

async fn updates_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before reading so no record falls between the two
    let rx = state.store.subscribe();
    let current = state.store.current().await;
    log::debug!("push subscriber connected");

    let initial = stream::once(async move { Ok::<_, Infallible>(snapshot_event(&current)) });
    let live = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(snapshot) => {
                    return Some((Ok::<_, Infallible>(snapshot_event(&snapshot)), rx))
                }
                // Only the newest record matters; skip what was missed
                Err(RecvError::Lagged(n)) => {
                    log::warn!("push subscriber lagged, skipped {} record(s)", n);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(initial.chain(live)).keep_alive(KeepAlive::default())
}

fn snapshot_event(snapshot: &RawSnapshot) -> Event {
    match Event::default().event(UPDATE_EVENT).json_data(snapshot) {
        Ok(event) => event,
        Err(e) => {
            log::warn!("failed to encode snapshot event: {}", e);
            Event::default().event("error").data(e.to_string())
        }
    }
}

/// Error response wrapper
pub struct ApiError(VitalsError);

impl<E: Into<VitalsError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            VitalsError::Json(_) => (StatusCode::BAD_REQUEST, "JSON_ERROR"),
            VitalsError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        log::warn!("request rejected: {}", self.0);
        let body = serde_json::json!({
            "code": code,
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
