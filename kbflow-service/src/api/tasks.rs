//! Task executor endpoints: claim, chunk upload and progress reports.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::ServiceResult;
use crate::queue::TaskMessage;

use super::{AppState, SuccessResponse};

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub executor_id: String,
}

#[derive(Serialize)]
pub struct ClaimResponse {
    /// `null` when the queue is empty
    pub task: Option<TaskMessage>,
}

pub async fn claim_task_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClaimRequest>,
) -> ServiceResult<Json<ClaimResponse>> {
    let task = state.service.claim_task(&request.executor_id)?;
    Ok(Json(ClaimResponse { task }))
}

#[derive(Deserialize)]
pub struct TaskProgressRequest {
    pub task_id: String,
    pub progress: f64,
    #[serde(default)]
    pub progress_msg: String,
}

pub async fn task_progress_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TaskProgressRequest>,
) -> ServiceResult<Json<SuccessResponse>> {
    state.service.report_task_progress(
        &request.task_id,
        request.progress,
        &request.progress_msg,
    )?;
    Ok(SuccessResponse::ok())
}

#[derive(Deserialize)]
pub struct StoreChunksRequest {
    pub task_id: String,
    #[serde(default)]
    pub token_num: i64,
    pub chunks: Vec<Map<String, Value>>,
}

#[derive(Serialize)]
pub struct StoreChunksResponse {
    pub stored: usize,
}

pub async fn store_chunks_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StoreChunksRequest>,
) -> ServiceResult<Json<StoreChunksResponse>> {
    let stored =
        state
            .service
            .store_task_chunks(&request.task_id, request.chunks, request.token_num)?;
    Ok(Json(StoreChunksResponse { stored }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::test_support::{app, post_json, send};
    use crate::db::RunStatus;

    #[tokio::test]
    async fn executor_claims_stores_and_reports() {
        let (h, app) = app();
        let kb = h.kb("K1");
        let doc = h.service.create_virtual(&kb.id, "notes.txt", "user-1").unwrap();
        h.service
            .run_documents(&[doc.id.clone()], RunStatus::Running, false)
            .unwrap();

        let (status, body) = send(
            &app,
            post_json("/api/task/claim", json!({"executor_id": "exec-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["doc"]["id"], json!(doc.id));
        let task_id = body["task"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            post_json(
                "/api/task/chunks",
                json!({"task_id": task_id, "token_num": 5, "chunks": [{"content": "hi"}]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stored"], 1);

        let (status, _) = send(
            &app,
            post_json(
                "/api/task/progress",
                json!({"task_id": task_id, "progress": 1.0, "progress_msg": "Done"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let task = h.db.get_task(&task_id).unwrap().unwrap();
        assert_eq!(task.progress, 1.0);

        let (status, body) = send(
            &app,
            post_json("/api/task/claim", json!({"executor_id": "exec-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["task"].is_null());
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let (_h, app) = app();
        let (status, body) = send(
            &app,
            post_json(
                "/api/task/progress",
                json!({"task_id": "missing", "progress": 0.5}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "task_not_found");

        let (status, body) = send(
            &app,
            post_json(
                "/api/task/progress",
                json!({"task_id": "missing", "progress": 2.0}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");
    }
}
