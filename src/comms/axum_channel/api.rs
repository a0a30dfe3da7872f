//! Handlers for `/api/*` routes.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use super::AxumState;
use crate::triage::LAST_RESORT_RESPONSE;
use crate::triage::dispatch::ReplySource;
use crate::triage::utterance::{Exchange, ImageRef, Utterance};

#[derive(Deserialize)]
pub(super) struct MessageRequest {
    #[serde(default)]
    message: String,
    image_url: Option<String>,
    image_base64: Option<String>,
    #[serde(default)]
    voice: bool,
    #[serde(default)]
    history: Vec<Exchange>,
}

fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

/// GET /api/health
pub(super) async fn health(State(state): State<AxumState>) -> Response {
    let context = state.comms.context();
    let passages = match context.knowledge.count().await {
        Ok(n) => json!(n),
        Err(e) => {
            warn!(channel_id = %state.channel_id, "knowledge count failed: {e}");
            serde_json::Value::Null
        }
    };
    let body = json!({
        "status": "ok",
        "bot_name": &*state.bot_name,
        "llm": context.dispatcher.llm().name(),
        "tools": context.dispatcher.tool_kinds(),
        "labels": context.labels.len(),
        "labels_fallback": context.labels.is_fallback(),
        "passages": passages,
        "uptime_seconds": state.comms.uptime_seconds(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// POST /api/message
pub(super) async fn message(
    State(state): State<AxumState>,
    Json(req): Json<MessageRequest>,
) -> Response {
    let image = match (req.image_url.as_deref(), req.image_base64.as_deref()) {
        (Some(_), Some(_)) => {
            return (
                StatusCode::BAD_REQUEST,
                json_error("bad_request", "send either image_url or image_base64, not both"),
            )
                .into_response();
        }
        (Some(url), None) => match ImageRef::parse(url) {
            url @ ImageRef::Url(_) => Some(url),
            _ => {
                return (
                    StatusCode::BAD_REQUEST,
                    json_error("bad_request", "image_url must be an http(s) URL"),
                )
                    .into_response();
            }
        },
        (None, Some(b64)) => Some(ImageRef::inline(b64)),
        (None, None) => None,
    };

    let mut utterance = Utterance::new(&req.message).with_voice(req.voice);
    if let Some(image) = image {
        utterance = utterance.with_image(image);
    }

    let turn = state
        .comms
        .start_turn(&state.channel_id, utterance, req.history)
        .await;

    match tokio::time::timeout(state.turn_timeout, turn).await {
        Ok(Ok(reply)) => {
            let body = json!({
                "reply": reply.text,
                "source": reply.source,
                "tools": reply.tools,
                "emergency": reply.emergency,
                "report": reply.report,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(Err(e)) => {
            error!(channel_id = %state.channel_id, "turn task failed: {e}");
            last_resort(StatusCode::INTERNAL_SERVER_ERROR, "internal", "the assessment failed")
        }
        Err(_) => {
            // The turn keeps running and still holds the turn slot.
            warn!(channel_id = %state.channel_id, "turn timed out, detaching");
            last_resort(StatusCode::GATEWAY_TIMEOUT, "timeout", "the assessment took too long")
        }
    }
}

/// Error body that still carries the fixed advice to see a clinician.
fn last_resort(status: StatusCode, code: &str, msg: &str) -> Response {
    let body = json!({
        "error": code,
        "message": msg,
        "reply": LAST_RESORT_RESPONSE,
        "source": ReplySource::LastResort,
        "tools": [],
        "emergency": false,
        "report": null,
    });
    (status, Json(body)).into_response()
}
