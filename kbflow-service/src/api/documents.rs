//! Document API endpoints.
//!
//! Handlers for document creation (upload, crawl, virtual), in-place
//! mutations, run control, deletion and content download.

use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::content::{CrawledPage, UploadedFile};
use crate::db::{Document, RunStatus};
use crate::error::{BatchFailure, ServiceError, ServiceResult};

use super::{AppState, SuccessResponse};

/// Text fields and file parts of a multipart request
#[derive(Default)]
struct MultipartForm {
    fields: Vec<(String, String)>,
    files: Vec<(String, Bytes)>,
}

impl MultipartForm {
    async fn read(mut multipart: Multipart) -> ServiceResult<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ServiceError::validation(e.to_string()))?
        {
            let name = field.name().unwrap_or("").to_string();
            if name == "file" {
                let filename = field.file_name().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::validation(e.to_string()))?;
                form.files.push((filename, data));
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServiceError::validation(e.to_string()))?;
                form.fields.push((name, value));
            }
        }
        Ok(form)
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    fn require(&self, name: &str) -> ServiceResult<&str> {
        self.field(name)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ServiceError::validation(format!("Lack of \"{name}\"")))
    }
}

/// Upload one or more files into a knowledge base.
///
/// Every file is attempted; if any fails the request fails with the
/// collected per-file messages.
pub async fn upload_documents_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ServiceResult<Json<Vec<Document>>> {
    let form = MultipartForm::read(multipart).await?;
    let kb_id = form.require("kb_id")?;
    let user_id = form.require("user_id")?;
    if form.files.is_empty() {
        return Err(ServiceError::validation("No file part!"));
    }

    let mut created = Vec::new();
    let mut failures = BatchFailure::default();
    for (filename, data) in &form.files {
        if filename.is_empty() {
            failures.record("", &ServiceError::validation("No file selected!"));
            continue;
        }
        let upload = UploadedFile::new(filename.clone(), data.clone());
        match state.service.create_from_upload(kb_id, &upload, user_id) {
            Ok(doc) => created.push(doc),
            Err(e) => failures.record(filename, &e),
        }
    }

    failures.into_result()?;
    Ok(Json(created))
}

/// Store a crawled page rendered to PDF as a document
pub async fn web_crawl_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ServiceResult<Json<Document>> {
    let form = MultipartForm::read(multipart).await?;
    let kb_id = form.require("kb_id")?;
    let user_id = form.require("user_id")?;
    let name = form.require("name")?;
    let url = form.require("url")?;
    let rendered = form
        .files
        .first()
        .map(|(_, data)| data.clone())
        .unwrap_or_default();

    let page = CrawledPage::new(name, url, rendered)?;
    let doc = state.service.create_from_crawl(kb_id, &page, user_id)?;
    Ok(Json(doc))
}

#[derive(Deserialize)]
pub struct CreateVirtualRequest {
    pub kb_id: String,
    pub name: String,
    pub user_id: String,
}

pub async fn create_virtual_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateVirtualRequest>,
) -> ServiceResult<Json<Document>> {
    let doc = state
        .service
        .create_virtual(&request.kb_id, &request.name, &request.user_id)?;
    Ok(Json(doc))
}

#[derive(Deserialize)]
pub struct ListDocumentsParams {
    pub kb_id: String,
}

pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDocumentsParams>,
) -> ServiceResult<Json<Vec<Document>>> {
    Ok(Json(state.service.list_documents(&params.kb_id)?))
}

#[derive(Deserialize)]
pub struct DocumentInfosRequest {
    pub doc_ids: Vec<String>,
}

/// Metadata for a batch of documents; unknown ids are skipped
pub async fn document_infos_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DocumentInfosRequest>,
) -> ServiceResult<Json<Vec<Document>>> {
    Ok(Json(state.service.document_infos(&request.doc_ids)?))
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub doc_id: String,
    pub name: String,
}

pub async fn rename_document_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenameRequest>,
) -> ServiceResult<Json<Document>> {
    let doc = state
        .service
        .rename_document(&request.doc_id, &request.name)?;
    Ok(Json(doc))
}

#[derive(Deserialize)]
pub struct ChangeParserRequest {
    pub doc_id: String,
    pub parser_id: String,
    #[serde(default)]
    pub parser_config: Option<serde_json::Value>,
}

pub async fn change_parser_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChangeParserRequest>,
) -> ServiceResult<Json<Document>> {
    let doc = state.service.change_parser(
        &request.doc_id,
        &request.parser_id,
        request.parser_config.as_ref(),
    )?;
    Ok(Json(doc))
}

#[derive(Deserialize)]
pub struct ChangeStatusRequest {
    pub doc_id: String,
    pub enabled: bool,
}

pub async fn change_status_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChangeStatusRequest>,
) -> ServiceResult<Json<SuccessResponse>> {
    state
        .service
        .change_status(&request.doc_id, request.enabled)?;
    Ok(SuccessResponse::ok())
}

#[derive(Deserialize)]
pub struct DeleteDocumentsRequest {
    pub doc_ids: Vec<String>,
}

pub async fn delete_documents_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeleteDocumentsRequest>,
) -> ServiceResult<Json<SuccessResponse>> {
    state.service.delete_documents(&request.doc_ids)?;
    Ok(SuccessResponse::ok())
}

#[derive(Deserialize)]
pub struct RunRequest {
    pub doc_ids: Vec<String>,
    pub run: RunStatus,
    /// Discard previous tasks and index entries first
    #[serde(default)]
    pub delete: bool,
}

pub async fn run_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunRequest>,
) -> ServiceResult<Json<SuccessResponse>> {
    state
        .service
        .run_documents(&request.doc_ids, request.run, request.delete)?;
    Ok(SuccessResponse::ok())
}

#[derive(Deserialize)]
pub struct SetMetaRequest {
    pub doc_id: String,
    /// JSON object encoded as a string
    pub meta: String,
}

pub async fn set_meta_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetMetaRequest>,
) -> ServiceResult<Json<SuccessResponse>> {
    state.service.set_meta(&request.doc_id, &request.meta)?;
    Ok(SuccessResponse::ok())
}

/// Download a document's content
pub async fn document_content_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<impl IntoResponse> {
    let (doc, data) = state.service.document_content(&id)?;
    let disposition = format!("attachment; filename=\"{}\"", doc.name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    ))
}
