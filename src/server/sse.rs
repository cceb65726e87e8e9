//! Observer transport: server-sent events over HTTP
//!
//! - `GET /events` streams the current snapshot, then one frame per update
//! - `GET /snapshot` returns the current snapshot as JSON
//!
//! Each frame is one `data:<json>\n\n` body chunk. A client that goes away
//! drops its stream, which detaches the observer.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::engine::AggregatorHandle;
use crate::error::Result;
use crate::schema::ResultSet;

/// HTTP listener that attaches one observer per `/events` request
pub struct EventServer {
    listener: TcpListener,
    aggregator: AggregatorHandle,
}

impl EventServer {
    pub async fn bind(addr: SocketAddr, aggregator: AggregatorHandle) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            aggregator,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests until the listener fails
    pub async fn run(self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "event server listening");
        axum::serve(self.listener, router(self.aggregator)).await?;
        Ok(())
    }
}

pub fn router(aggregator: AggregatorHandle) -> Router {
    Router::new()
        .route("/events", get(events_handler))
        .route("/snapshot", get(snapshot_handler))
        .fallback(not_found)
        .with_state(aggregator)
}

/// Logs the observer's lifetime; dropped together with its response body
struct ObserverGuard {
    id: String,
}

impl ObserverGuard {
    fn new() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let guard = Self {
            id: format!("obs_{}", &id[..8]),
        };
        tracing::info!(observer = %guard.id, "observer connected");
        guard
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        tracing::info!(observer = %self.id, "observer disconnected");
    }
}

async fn events_handler(State(aggregator): State<AggregatorHandle>) -> Response {
    let updates = match aggregator.subscribe().await {
        Ok(updates) => updates,
        Err(e) => return unavailable(e),
    };

    let frames = stream::unfold(
        (updates, ObserverGuard::new()),
        |(mut updates, guard): (mpsc::Receiver<ResultSet>, ObserverGuard)| async move {
            let update = updates.recv().await?;
            Some((update.to_event_frame(), (updates, guard)))
        },
    );

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

async fn snapshot_handler(State(aggregator): State<AggregatorHandle>) -> Response {
    match aggregator.snapshot().await {
        Ok(state) => Json(state).into_response(),
        Err(e) => unavailable(e),
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found\n")
}

fn unavailable(e: crate::error::LiveCellError) -> Response {
    tracing::error!(error = %e, "aggregator unavailable");
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
}
