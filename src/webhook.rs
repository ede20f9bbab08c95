//! Webhook intake for AI agent session and action events (spec §4.8, §6.2).
//!
//! Modeled on the teacher's `server.rs` handler style: typed request/response
//! structs with `#[serde(default)]` for optional fields, and the same
//! `AppError`/`ErrorBody`/`ErrorDetail` error contract used by the ingestion
//! and query routes. Both endpoints return 200 even when the referenced
//! session does not yet exist — webhooks must never fail on a missing
//! referent (spec §4.8).

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{MessageType, SessionStatus};
use crate::server::{bad_request, AppError, AppState};
use crate::session_log;

#[derive(Deserialize)]
pub struct SessionLoggerRequest {
    pub action_type: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub agent_type: String,
    pub user_id: String,
    pub project: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Serialize)]
pub struct SessionLoggerResponse {
    pub success: bool,
    pub session_id: String,
    pub action: String,
    pub timestamp: String,
}

pub async fn handle_session_logger(
    State(state): State<AppState>,
    Json(req): Json<SessionLoggerRequest>,
) -> Result<Json<SessionLoggerResponse>, AppError> {
    let session_id = req
        .session_id
        .clone()
        .unwrap_or_else(|| session_log::generate_id("sess"));
    let context_json = req
        .context
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "{}".to_string());

    match req.action_type.as_str() {
        "session_start" | "session_resume" => {
            session_log::start_session(
                &state.rv,
                &session_id,
                &req.agent_type,
                &req.user_id,
                &req.project,
                &context_json,
            )
            .await
            .map_err(|e| AppError::internal(e.to_string()))?;
        }
        "session_end" => {
            if let Some(mut session) = state
                .rv
                .get_session(&session_id)
                .await
                .map_err(|e| AppError::internal(e.to_string()))?
            {
                if session.end_time.is_none() {
                    session.end_time = Some(Utc::now().timestamp());
                    session.status = abnormal_status(req.reason.as_deref());
                    state
                        .rv
                        .upsert_session(&session)
                        .await
                        .map_err(|e| AppError::internal(e.to_string()))?;
                    let _ = session_log::end_session(&state.rv, &state.orchestrator, &session_id)
                        .await
                        .map_err(|e| AppError::internal(e.to_string()))?;
                }
            }
        }
        other => return Err(bad_request(format!("unknown action_type: {other}"))),
    }

    Ok(Json(SessionLoggerResponse {
        success: true,
        session_id,
        action: req.action_type,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

fn abnormal_status(reason: Option<&str>) -> SessionStatus {
    match reason {
        Some(r) if r.to_lowercase().contains("crash") => SessionStatus::Crashed,
        _ => SessionStatus::Ended,
    }
}

#[derive(Deserialize)]
pub struct ActionTrackerRequest {
    pub session_id: String,
    pub action_type: String,
    pub description: String,
    #[serde(default)]
    pub details: Option<Value>,
    #[serde(default)]
    pub files_affected: Vec<String>,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

#[derive(Serialize)]
pub struct ActionTrackerResponse {
    pub success: bool,
    pub action_id: String,
}

pub async fn handle_action_tracker(
    State(state): State<AppState>,
    Json(req): Json<ActionTrackerRequest>,
) -> Result<Json<ActionTrackerResponse>, AppError> {
    ensure_session_exists(&state, &req.session_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    let details_json = req
        .details
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "{}".to_string());
    let files_json =
        serde_json::to_string(&req.files_affected).unwrap_or_else(|_| "[]".to_string());

    let action_id = session_log::record_action(
        &state.rv,
        &req.session_id,
        &req.action_type,
        &req.description,
        &details_json,
        &files_json,
        req.success,
    )
    .await
    .map_err(|e| AppError::internal(e.to_string()))?;

    if let Some(details) = &req.details {
        if let (Some(message_type), Some(content)) = (
            details.get("message_type").and_then(Value::as_str),
            details.get("content").and_then(Value::as_str),
        ) {
            session_log::record_message(
                &state.rv,
                &req.session_id,
                MessageType::parse(message_type),
                content,
                "{}",
                None,
                "[]",
                "[]",
            )
            .await
            .map_err(|e| AppError::internal(e.to_string()))?;
        }
    }

    Ok(Json(ActionTrackerResponse {
        success: true,
        action_id,
    }))
}

/// Creates a placeholder Session if `session_id` is unknown (spec §4.8).
async fn ensure_session_exists(state: &AppState, session_id: &str) -> anyhow::Result<()> {
    if state.rv.get_session(session_id).await?.is_some() {
        return Ok(());
    }
    session_log::start_session(&state.rv, session_id, "unknown", "unknown", "default", "{}").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abnormal_status_detects_crash_keyword() {
        assert_eq!(abnormal_status(Some("process crashed")), SessionStatus::Crashed);
        assert_eq!(abnormal_status(Some("user closed tab")), SessionStatus::Ended);
        assert_eq!(abnormal_status(None), SessionStatus::Ended);
    }

    #[test]
    fn default_success_is_true() {
        assert!(default_success());
    }

    async fn test_state() -> AppState {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations_on(&pool).await.unwrap();
        let pool = std::sync::Arc::new(pool);

        let config: crate::config::Config = toml::from_str(
            "[db]\npath = \"test.sqlite\"\n[chunking]\n[server]\nbind = \"127.0.0.1:0\"\n",
        )
        .unwrap();

        let rv = crate::store::RvStore::new(pool.clone());
        let vi = crate::store::ViStore::new(pool.clone());
        let gr = crate::store::GrStore::new(pool.clone());
        let orchestrator =
            crate::orchestrator::Orchestrator::new(config.clone(), rv.clone(), vi.clone(), gr.clone());

        AppState {
            config: std::sync::Arc::new(config),
            rv,
            vi,
            gr,
            orchestrator,
        }
    }

    /// A `session_end` webhook carrying a crash reason must persist the
    /// session as `Crashed`, not have it clobbered back to `Ended` by the
    /// transcript-export path that runs immediately after (spec §4.8).
    #[tokio::test]
    async fn session_end_webhook_preserves_crashed_status() {
        let state = test_state().await;
        session_log::start_session(&state.rv, "sess-crash-1", "claude-code", "user-1", "default", "{}")
            .await
            .unwrap();

        let req = SessionLoggerRequest {
            action_type: "session_end".to_string(),
            session_id: Some("sess-crash-1".to_string()),
            agent_type: "claude-code".to_string(),
            user_id: "user-1".to_string(),
            project: "default".to_string(),
            reason: Some("process crashed unexpectedly".to_string()),
            context: None,
        };

        handle_session_logger(State(state.clone()), Json(req)).await.unwrap();

        let session = state.rv.get_session("sess-crash-1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Crashed);
    }
}
