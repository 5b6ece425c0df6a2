//! `GET /chat_stream/{message}`: one agent run streamed as SSE.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::state::GatewayState;

#[derive(Debug, Default, Deserialize)]
pub struct ChatStreamQuery {
    /// Conversation to resume. Omitted (or blank) starts a new one.
    pub checkpoint_id: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub async fn chat_stream_handler(
    State(state): State<Arc<GatewayState>>,
    Path(message): Path<String>,
    Query(query): Query<ChatStreamQuery>,
) -> Response {
    if message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "message must not be empty");
    }

    let (id, is_new) = match state
        .store
        .resolve_or_create(query.checkpoint_id.as_deref())
        .await
    {
        Ok(resolved) => resolved,
        Err(e) => {
            error!(%e, "Failed to resolve conversation");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };
    info!(conversation = %id, is_new, "Chat stream opened");

    let cancel = CancellationToken::new();
    let (events, _run) = state
        .graph
        .spawn(state.store.clone(), id.clone(), message, cancel.clone());

    // Dropped with the response body, so a client disconnect cancels the run.
    let guard = cancel.drop_guard();

    let frames = state
        .translator
        .clone()
        .translate_stream(&id, is_new, UnboundedReceiverStream::new(events))
        .map(move |event| {
            let _guard = &guard;
            Event::default().json_data(&event)
        });

    Sse::new(frames).into_response()
}
