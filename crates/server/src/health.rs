use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use calhelper_agent::AgentRuntime;
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    agent: Arc<AgentRuntime>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub fn router(agent: Arc<AgentRuntime>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { agent })
}

/// Liveness only; calendar credentials are checked by `calhelper doctor`.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let payload = HealthResponse {
        status: "ready",
        service: HealthCheck {
            status: "ready",
            detail: "calhelper-server runtime initialized".to_string(),
        },
        active_sessions: state.agent.sessions().active_sessions().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{extract::State, http::StatusCode, Json};
    use calhelper_agent::{
        AgentRuntime, InterpretationContext, InterpretedCall, Interpreter, InterpreterError,
    };
    use calhelper_calendar::InMemoryCalendar;
    use calhelper_core::domain::session::SessionId;

    use crate::health::{health, HealthState};

    struct Silent;

    #[async_trait]
    impl Interpreter for Silent {
        async fn interpret(
            &self,
            _context: &InterpretationContext,
        ) -> Result<InterpretedCall, InterpreterError> {
            Ok(InterpretedCall::reply("ok"))
        }
    }

    #[tokio::test]
    async fn health_reports_active_sessions() {
        let agent = Arc::new(
            AgentRuntime::builder()
                .calendar(Arc::new(InMemoryCalendar::new()))
                .interpreter(Arc::new(Silent))
                .build()
                .expect("runtime builds"),
        );
        agent.handle_turn(&SessionId::from("s-1"), "hello").await.expect("turn");

        let (status, Json(payload)) = health(State(HealthState { agent })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.active_sessions, 1);
    }
}
