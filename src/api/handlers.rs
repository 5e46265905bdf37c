use axum::extract::rejection::JsonRejection;
use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::engine::{Dispatcher, Introspection};
use crate::types::{ExecutionResult, RoutingContext};

const RECENT_TASKS: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskRequest {
    #[serde(default)]
    pub user_prompt: String,
    pub last_agent_used: Option<String>,
    #[serde(default)]
    pub progress: Option<RoutingContext>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub result: ExecutionResult,
    pub processing_time_ms: u64,
    pub timestamp: String,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn submit_task(
    State(dispatcher): State<Arc<Dispatcher>>,
    payload: Result<Json<SubmitTaskRequest>, JsonRejection>,
) -> Result<Json<SubmitTaskResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let job_id = Uuid::new_v4();
    log::info!("Job {} received", job_id);

    let result = dispatcher
        .submit(
            &request.user_prompt,
            request.last_agent_used.as_deref(),
            request.progress.unwrap_or_default(),
        )
        .await?;

    Ok(Json(SubmitTaskResponse {
        success: true,
        job_id,
        processing_time_ms: result.execution_time_ms,
        result,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

pub async fn list_agents(State(dispatcher): State<Arc<Dispatcher>>) -> Json<Introspection> {
    Json(dispatcher.introspect(RECENT_TASKS))
}

pub async fn reset_history(State(dispatcher): State<Arc<Dispatcher>>) -> Json<Value> {
    let cleared = dispatcher.reset_history();
    Json(json!({ "success": true, "cleared": cleared }))
}
