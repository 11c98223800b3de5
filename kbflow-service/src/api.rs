//! HTTP API for the kbflow service.
//!
//! This module provides the REST API endpoints for:
//! - Health and metrics monitoring
//! - Knowledge base management
//! - Document lifecycle operations
//! - Knowledge base tags
//! - File tree uploads and file-to-document conversion
//! - Task claiming and reporting by executors
//! - System status and provider checks

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::LifecycleService;

pub mod documents;
pub mod files;
pub mod knowledgebases;
pub mod system;
pub mod tasks;

use documents::{
    change_parser_handler, change_status_handler, create_virtual_handler, delete_documents_handler,
    document_content_handler, document_infos_handler, list_documents_handler,
    rename_document_handler, run_handler, set_meta_handler, upload_documents_handler,
    web_crawl_handler,
};
use files::{convert_files_handler, unlink_files_handler, upload_file_handler};
use knowledgebases::{
    create_kb_handler, delete_kb_handler, get_kb_handler, kb_tags_handler, list_kbs_handler,
    remove_tags_handler, rename_tag_handler, tags_handler, update_kb_handler,
};
use system::{heartbeat_handler, llm_check_handler, system_status_handler};
use tasks::{claim_task_handler, store_chunks_handler, task_progress_handler};

/// Application state
pub struct AppState {
    pub service: Arc<LifecycleService>,
    pub metrics: PrometheusHandle,
    pub start_time: Instant,
}

/// Generic success body for operations without a payload
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

/// Build the API router
pub fn router(service: Arc<LifecycleService>, metrics: PrometheusHandle) -> Router {
    // Leave room for multipart framing around the largest allowed document
    let max_body_size = service.config.limits.max_document_size_bytes as usize + 64 * 1024;

    let state = Arc::new(AppState {
        service,
        metrics,
        start_time: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Knowledge bases
        .route("/kb/create", post(create_kb_handler))
        .route("/kb/update", post(update_kb_handler))
        .route("/kb/rm", post(delete_kb_handler))
        .route("/kb/list", get(list_kbs_handler))
        .route("/kb/tags", get(tags_handler))
        .route("/kb/{id}", get(get_kb_handler))
        .route("/kb/{id}/tags", get(kb_tags_handler))
        .route("/kb/{id}/rm_tags", post(remove_tags_handler))
        .route("/kb/{id}/rename_tag", post(rename_tag_handler))
        // Documents - uploads get the larger body limit
        .route(
            "/document/upload",
            post(upload_documents_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route(
            "/document/web_crawl",
            post(web_crawl_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/document/create", post(create_virtual_handler))
        .route("/document/list", get(list_documents_handler))
        .route("/document/infos", post(document_infos_handler))
        .route("/document/rename", post(rename_document_handler))
        .route("/document/change_parser", post(change_parser_handler))
        .route("/document/change_status", post(change_status_handler))
        .route("/document/rm", post(delete_documents_handler))
        .route("/document/run", post(run_handler))
        .route("/document/set_meta", post(set_meta_handler))
        .route("/document/get/{id}", get(document_content_handler))
        // File tree
        .route(
            "/file/upload",
            post(upload_file_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/file2document/convert", post(convert_files_handler))
        .route("/file2document/rm", post(unlink_files_handler))
        // Executors - produced chunks can be as large as an upload
        .route("/task/claim", post(claim_task_handler))
        .route("/task/progress", post(task_progress_handler))
        .route(
            "/task/chunks",
            post(store_chunks_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        // System
        .route("/system/status", get(system_status_handler))
        .route("/system/heartbeat", post(heartbeat_handler))
        .route("/llm/check", post(llm_check_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
