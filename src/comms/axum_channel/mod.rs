//! Axum-based HTTP channel.
//!
//! ```text
//! GET  /api/health
//! POST /api/message
//! GET  /favicon.ico   → 204
//! GET  /              → chat page
//! ```
//!
//! `run()` drives the axum event loop; the shared [`CancellationToken`] is
//! wired to axum's graceful shutdown.

mod api;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::state::CommsState;
use crate::config::AxumChannelConfig;
use crate::error::AppError;
use crate::runtime::{Component, ComponentFuture};

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
pub struct AxumState {
    pub channel_id: Arc<str>,
    pub bot_name: Arc<str>,
    pub comms: Arc<CommsState>,
    /// Bound on one turn once it has started; queueing time is not counted.
    pub turn_timeout: Duration,
}

pub struct AxumChannel {
    bind_addr: String,
    state: AxumState,
}

impl AxumChannel {
    pub fn new(
        channel_id: impl Into<String>,
        config: &AxumChannelConfig,
        bot_name: &str,
        comms: Arc<CommsState>,
    ) -> Self {
        let channel_id: String = channel_id.into();
        Self {
            bind_addr: config.bind.clone(),
            state: AxumState {
                channel_id: Arc::from(channel_id.as_str()),
                bot_name: Arc::from(bot_name),
                comms,
                turn_timeout: Duration::from_secs(config.turn_timeout_seconds),
            },
        }
    }
}

impl Component for AxumChannel {
    fn id(&self) -> &str {
        &self.state.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_axum(self.bind_addr, self.state, shutdown))
    }
}

async fn run_axum(
    bind_addr: String,
    state: AxumState,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let channel_id = state.channel_id.clone();
    let router = build_router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Comms(format!("axum bind failed on {bind_addr}: {e}")))?;

    info!(%channel_id, %bind_addr, "axum channel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Comms(format!("axum server error: {e}")))?;

    info!(%channel_id, "axum channel shut down");
    Ok(())
}

pub fn build_router(state: AxumState) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/message", post(api::message))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route("/", get(ui::root))
        .with_state(state)
}
