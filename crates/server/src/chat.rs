//! Browser chat front end.
//!
//! - `GET  /`                        chat page
//! - `POST /api/chat`                one user turn, `{session_id?, message}`
//! - `DELETE /api/sessions/{id}`     forget a conversation

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use calhelper_agent::AgentRuntime;
use calhelper_core::domain::session::SessionId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Clone)]
pub struct ChatState {
    agent: Arc<AgentRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub reply: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

pub fn router(agent: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/chat", post(chat))
        .route("/api/sessions/{session_id}", delete(clear_session))
        .with_state(ChatState { agent })
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn chat(State(state): State<ChatState>, Json(request): Json<ChatRequest>) -> Response {
    let session_id = request
        .session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(SessionId)
        .unwrap_or_else(SessionId::new_random);

    match state.agent.handle_turn(&session_id, &request.message).await {
        Ok(reply) => {
            let payload = ChatResponse { session_id: session_id.as_str().to_string(), reply };
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => {
            let correlation_id = Uuid::new_v4().to_string();
            let interface = error.into_interface(correlation_id.clone());
            warn!(
                event_name = "system.chat.session_terminated",
                correlation_id = %correlation_id,
                session_id = %session_id,
                error = %interface,
                "chat turn ended the session"
            );
            let payload = ErrorResponse {
                error: "unauthorized",
                message: interface.user_message().to_string(),
                correlation_id,
            };
            (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
        }
    }
}

async fn clear_session(
    State(state): State<ChatState>,
    Path(session_id): Path<String>,
) -> StatusCode {
    let session_id = SessionId(session_id);
    if state.agent.end_session(&session_id).await {
        info!(event_name = "system.chat.cleared", session_id = %session_id, "chat cleared");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
