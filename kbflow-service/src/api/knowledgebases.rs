//! Knowledge base API endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{KnowledgeBase, KnowledgeBaseOrder, KnowledgeBaseQuery};
use crate::error::ServiceResult;
use crate::service::{KnowledgeBasePage, KnowledgeBaseUpdate, TagCount};

use super::{AppState, SuccessResponse};

#[derive(Deserialize)]
pub struct CreateKnowledgeBaseRequest {
    pub user_id: String,
    #[serde(flatten)]
    pub fields: KnowledgeBaseUpdate,
}

#[derive(Deserialize)]
pub struct UpdateKnowledgeBaseRequest {
    pub kb_id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub fields: KnowledgeBaseUpdate,
}

#[derive(Deserialize)]
pub struct DeleteKnowledgeBaseRequest {
    pub kb_id: String,
}

pub async fn create_kb_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateKnowledgeBaseRequest>,
) -> ServiceResult<Json<KnowledgeBase>> {
    let kb = state
        .service
        .create_knowledge_base(&request.user_id, &request.fields)?;
    Ok(Json(kb))
}

pub async fn update_kb_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateKnowledgeBaseRequest>,
) -> ServiceResult<Json<KnowledgeBase>> {
    let kb = state.service.update_knowledge_base(
        &request.kb_id,
        &request.user_id,
        &request.fields,
    )?;
    Ok(Json(kb))
}

/// Delete a knowledge base with every document in it
pub async fn delete_kb_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeleteKnowledgeBaseRequest>,
) -> ServiceResult<Json<SuccessResponse>> {
    state.service.delete_knowledge_base(&request.kb_id)?;
    Ok(SuccessResponse::ok())
}

pub async fn get_kb_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<KnowledgeBase>> {
    Ok(Json(state.service.knowledge_base(&id)?))
}

#[derive(Deserialize)]
pub struct ListKnowledgeBasesParams {
    pub user_id: String,
    #[serde(default)]
    pub keywords: String,
    pub parser_id: Option<String>,
    #[serde(default)]
    pub orderby: KnowledgeBaseOrder,
    pub desc: Option<bool>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn list_kbs_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListKnowledgeBasesParams>,
) -> ServiceResult<Json<KnowledgeBasePage>> {
    let defaults = KnowledgeBaseQuery::default();
    let query = KnowledgeBaseQuery {
        keywords: params.keywords,
        parser_id: params.parser_id.filter(|id| !id.is_empty()),
        order_by: params.orderby,
        desc: params.desc.unwrap_or(defaults.desc),
        page: params.page.unwrap_or(defaults.page),
        page_size: params.page_size.unwrap_or(defaults.page_size),
    };
    Ok(Json(
        state.service.list_knowledge_bases(&params.user_id, &query)?,
    ))
}

#[derive(Serialize)]
pub struct TagsResponse {
    pub tags: Vec<TagCount>,
}

pub async fn kb_tags_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<TagsResponse>> {
    let tags = state.service.list_tags(&[id])?;
    Ok(Json(TagsResponse { tags }))
}

#[derive(Deserialize)]
pub struct MultiKbTagsParams {
    /// Comma separated knowledge base ids
    pub kb_ids: String,
}

pub async fn tags_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MultiKbTagsParams>,
) -> ServiceResult<Json<TagsResponse>> {
    let kb_ids: Vec<String> = params
        .kb_ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    let tags = state.service.list_tags(&kb_ids)?;
    Ok(Json(TagsResponse { tags }))
}

#[derive(Deserialize)]
pub struct RemoveTagsRequest {
    pub tags: Vec<String>,
}

pub async fn remove_tags_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RemoveTagsRequest>,
) -> ServiceResult<Json<SuccessResponse>> {
    state.service.remove_tags(&id, &request.tags)?;
    Ok(SuccessResponse::ok())
}

#[derive(Deserialize)]
pub struct RenameTagRequest {
    pub from_tag: String,
    pub to_tag: String,
}

pub async fn rename_tag_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RenameTagRequest>,
) -> ServiceResult<Json<SuccessResponse>> {
    state
        .service
        .rename_tag(&id, &request.from_tag, &request.to_tag)?;
    Ok(SuccessResponse::ok())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use crate::api::test_support::{app, get, post_json, send};
    use crate::index::{IndexStore, index_name};

    #[tokio::test]
    async fn create_update_and_remove() {
        let (h, app) = app();

        let (status, body) = send(
            &app,
            post_json(
                "/api/kb/create",
                json!({"user_id": "user-1", "name": "Manuals", "description": "product docs"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let kb_id = body["id"].as_str().unwrap().to_string();
        assert_eq!(body["tenant_id"], "user-1");

        let (status, body) = send(
            &app,
            post_json(
                "/api/kb/update",
                json!({"kb_id": kb_id, "user_id": "user-1", "name": "Guides", "pagerank": 3}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Guides");
        assert_eq!(body["pagerank"], 3);

        let (status, _) = send(&app, post_json("/api/kb/rm", json!({"kb_id": kb_id}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(h.db.get_knowledge_base(&kb_id).unwrap().is_none());

        let (status, _) = send(&app, get(&format!("/api/kb/{kb_id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let (_h, app) = app();
        let (status, body) = send(
            &app,
            post_json("/api/kb/create", json!({"user_id": "user-1", "name": " "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");
    }

    #[tokio::test]
    async fn list_pages_and_filters_by_keywords() {
        let (_h, app) = app();
        for name in ["Alpha manuals", "Beta notes", "Alpha guides"] {
            let (status, _) = send(
                &app,
                post_json("/api/kb/create", json!({"user_id": "user-1", "name": name})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(
            &app,
            get("/api/kb/list?user_id=user-1&keywords=alpha&orderby=name&desc=false&page=1&page_size=1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["kbs"].as_array().unwrap().len(), 1);
        assert_eq!(body["kbs"][0]["name"], "Alpha guides");
    }

    #[tokio::test]
    async fn tags_are_listed_removed_and_renamed() {
        let (h, app) = app();
        let kb = h.kb("K1");
        let row = match json!({"id": "c1", "doc_id": "d1", "kb_id": kb.id, "tag_kwd": ["red", "blue"]}) {
            Value::Object(row) => row,
            _ => unreachable!(),
        };
        h.index
            .upsert(&index_name(&kb.tenant_id), &kb.id, vec![row])
            .unwrap();

        let (status, body) = send(&app, get(&format!("/api/kb/{}/tags", kb.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tags"].as_array().unwrap().len(), 2);

        let (status, _) = send(
            &app,
            post_json(
                &format!("/api/kb/{}/rename_tag", kb.id),
                json!({"from_tag": "red", "to_tag": "green"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &app,
            post_json(&format!("/api/kb/{}/rm_tags", kb.id), json!({"tags": ["blue"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, get(&format!("/api/kb/tags?kb_ids={}", kb.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tags"], json!([{"tag": "green", "count": 1}]));

        let (status, body) = send(&app, get("/api/kb/tags?kb_ids=missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "knowledge_base_not_found");
    }
}
