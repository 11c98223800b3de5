//! System status, executor heartbeat and provider check endpoints.

use axum::{Json, extract::State};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{ServiceError, ServiceResult};
use crate::providers::{Capability, ProbeOutcome, ProviderCredentials};
use crate::service::SystemStatus;

use super::{AppState, SuccessResponse};

pub async fn system_status_handler(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    Json(state.service.system_status())
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub executor_id: String,
    /// Unix seconds; defaults to the time of receipt
    #[serde(default)]
    pub ts: Option<i64>,
    pub payload: serde_json::Value,
}

/// Heartbeat channel for task executors
pub async fn heartbeat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HeartbeatRequest>,
) -> ServiceResult<Json<SuccessResponse>> {
    state
        .service
        .record_heartbeat(&request.executor_id, request.ts, &request.payload)?;
    Ok(SuccessResponse::ok())
}

#[derive(Deserialize)]
pub struct ModelSelection {
    pub capability: Capability,
    pub model: String,
}

#[derive(Deserialize)]
pub struct LlmCheckRequest {
    pub llm_factory: String,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub models: Vec<ModelSelection>,
}

/// Probe an API key against every requested model
pub async fn llm_check_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LlmCheckRequest>,
) -> ServiceResult<Json<Vec<ProbeOutcome>>> {
    let providers = &state.service.providers;
    if request.models.is_empty() {
        let supported: Vec<&str> = providers
            .capabilities(&request.llm_factory)
            .iter()
            .map(Capability::as_str)
            .collect();
        return Err(ServiceError::validation(format!(
            "No model selected for {}; supported capabilities: [{}]",
            request.llm_factory,
            supported.join(", ")
        )));
    }

    let probes: Vec<(Capability, ProviderCredentials)> = request
        .models
        .into_iter()
        .map(|selection| {
            (
                selection.capability,
                ProviderCredentials {
                    api_key: request.api_key.clone(),
                    model: selection.model,
                    base_url: request.base_url.clone(),
                },
            )
        })
        .collect();

    Ok(Json(providers.check(&request.llm_factory, &probes)?))
}
