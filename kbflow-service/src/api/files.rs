//! File tree and file-to-document API endpoints.

use axum::{
    Json,
    extract::{Multipart, State},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::content::UploadedFile;
use crate::db::{FileDocumentLink, FileRecord};
use crate::error::{ServiceError, ServiceResult};

use super::{AppState, SuccessResponse};

/// Upload files into the user's folder tree
pub async fn upload_file_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ServiceResult<Json<Vec<FileRecord>>> {
    let mut tenant_id: Option<String> = None;
    let mut parent_id: Option<String> = None;
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::validation(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                if filename.is_empty() {
                    return Err(ServiceError::validation("No file selected!"));
                }
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::validation(e.to_string()))?;
                uploads.push(UploadedFile::new(filename, data));
            }
            "user_id" => {
                tenant_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ServiceError::validation(e.to_string()))?,
                );
            }
            "parent_id" => {
                let id = field
                    .text()
                    .await
                    .map_err(|e| ServiceError::validation(e.to_string()))?;
                if !id.is_empty() {
                    parent_id = Some(id);
                }
            }
            _ => {}
        }
    }

    let tenant_id = tenant_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServiceError::validation("Lack of \"user_id\""))?;
    if uploads.is_empty() {
        return Err(ServiceError::validation("No file part!"));
    }

    let mut stored = Vec::with_capacity(uploads.len());
    for upload in &uploads {
        stored.push(
            state
                .service
                .upload_file(&tenant_id, parent_id.as_deref(), upload)?,
        );
    }
    Ok(Json(stored))
}

#[derive(Deserialize)]
pub struct ConvertRequest {
    pub file_ids: Vec<String>,
    pub kb_ids: Vec<String>,
    pub user_id: String,
}

/// Turn files into documents of the given knowledge bases
pub async fn convert_files_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConvertRequest>,
) -> ServiceResult<Json<Vec<FileDocumentLink>>> {
    let links =
        state
            .service
            .convert_files(&request.file_ids, &request.kb_ids, &request.user_id)?;
    Ok(Json(links))
}

#[derive(Deserialize)]
pub struct UnlinkRequest {
    pub file_ids: Vec<String>,
}

pub async fn unlink_files_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UnlinkRequest>,
) -> ServiceResult<Json<SuccessResponse>> {
    state.service.unlink_files(&request.file_ids)?;
    Ok(SuccessResponse::ok())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::test_support::{app, multipart, post_json, send};

    #[tokio::test]
    async fn upload_convert_and_unlink() {
        let (h, app) = app();
        let kb = h.kb("K1");

        let (status, body) = send(
            &app,
            multipart(
                "/api/file/upload",
                &[("user_id", "user-1")],
                &[("guide.txt", "read me")],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let file_id = body[0]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            post_json(
                "/api/file2document/convert",
                json!({"file_ids": [file_id.clone()], "kb_ids": [kb.id.clone()], "user_id": "user-1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let doc_id = body[0]["document_id"].as_str().unwrap().to_string();
        assert_eq!(h.service.document(&doc_id).unwrap().kb_id, kb.id);

        let (status, _) = send(
            &app,
            post_json("/api/file2document/rm", json!({"file_ids": [file_id.clone()]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(h.db.get_document(&doc_id).unwrap().is_none());
        assert!(h.db.get_file(&file_id).unwrap().is_some());

        let (status, body) = send(
            &app,
            post_json("/api/file2document/rm", json!({"file_ids": [file_id]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "file_not_found");
    }
}
