//! Knowledge base CRUD operations.

use rusqlite::{OptionalExtension, params};
use serde::Deserialize;

use super::models::{KNOWLEDGE_BASE_COLUMNS, KnowledgeBase};
use super::{Database, now_rfc3339};
use crate::error::{DatabaseError, ServiceResult};

/// Sort column for knowledge base listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum KnowledgeBaseOrder {
    #[default]
    #[serde(rename = "create_time")]
    CreateTime,
    #[serde(rename = "update_time")]
    UpdateTime,
    #[serde(rename = "name")]
    Name,
}

impl KnowledgeBaseOrder {
    fn column(&self) -> &'static str {
        match self {
            KnowledgeBaseOrder::CreateTime => "created_at",
            KnowledgeBaseOrder::UpdateTime => "updated_at",
            KnowledgeBaseOrder::Name => "name COLLATE NOCASE",
        }
    }
}

/// Filters and paging for listing a tenant's knowledge bases
#[derive(Debug, Clone)]
pub struct KnowledgeBaseQuery {
    /// Case-insensitive substring of the name; empty matches everything.
    pub keywords: String,
    pub parser_id: Option<String>,
    pub order_by: KnowledgeBaseOrder,
    pub desc: bool,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl Default for KnowledgeBaseQuery {
    fn default() -> Self {
        Self {
            keywords: String::new(),
            parser_id: None,
            order_by: KnowledgeBaseOrder::default(),
            desc: true,
            page: 1,
            page_size: 150,
        }
    }
}

impl Database {
    /// Insert a new knowledge base
    pub fn insert_knowledge_base(&self, kb: &KnowledgeBase) -> ServiceResult<()> {
        let conn = self.conn();

        conn.execute(
            r#"
            INSERT INTO knowledgebases (id, tenant_id, name, description, parser_id, parser_config, pagerank, doc_num, token_num, chunk_num, created_by, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                kb.id,
                kb.tenant_id,
                kb.name,
                kb.description,
                kb.parser_id,
                kb.parser_config.to_string(),
                kb.pagerank,
                kb.doc_num,
                kb.token_num,
                kb.chunk_num,
                kb.created_by,
                kb.created_at.to_rfc3339(),
                kb.updated_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a knowledge base by ID
    pub fn get_knowledge_base(&self, id: &str) -> ServiceResult<Option<KnowledgeBase>> {
        let conn = self.conn();

        conn.query_row(
            &format!("SELECT {KNOWLEDGE_BASE_COLUMNS} FROM knowledgebases WHERE id = ?1"),
            params![id],
            KnowledgeBase::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// A tenant's knowledge bases whose name matches case-insensitively
    pub fn find_knowledge_bases_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> ServiceResult<Vec<KnowledgeBase>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {KNOWLEDGE_BASE_COLUMNS} FROM knowledgebases WHERE tenant_id = ?1 AND name = ?2 COLLATE NOCASE"
            ))
            .map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map(params![tenant_id, name], KnowledgeBase::from_row)
            .map_err(DatabaseError::Query)?;

        let mut kbs = Vec::new();
        for row in rows {
            kbs.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(kbs)
    }

    /// One page of a tenant's knowledge bases plus the total match count
    pub fn list_knowledge_bases(
        &self,
        tenant_id: &str,
        query: &KnowledgeBaseQuery,
    ) -> ServiceResult<(Vec<KnowledgeBase>, i64)> {
        let conn = self.conn();

        let mut filter = String::from(" WHERE tenant_id = ?1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(tenant_id.to_string())];
        if !query.keywords.is_empty() {
            params_vec.push(Box::new(query.keywords.to_lowercase()));
            filter.push_str(&format!(
                " AND instr(lower(name), ?{}) > 0",
                params_vec.len()
            ));
        }
        if let Some(parser_id) = &query.parser_id {
            params_vec.push(Box::new(parser_id.clone()));
            filter.push_str(&format!(" AND parser_id = ?{}", params_vec.len()));
        }
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM knowledgebases{filter}"),
                params_refs.as_slice(),
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        let page_size = i64::from(query.page_size.max(1));
        let offset = i64::from(query.page.max(1) - 1) * page_size;
        let sql = format!(
            "SELECT {KNOWLEDGE_BASE_COLUMNS} FROM knowledgebases{filter} ORDER BY {} {} LIMIT {page_size} OFFSET {offset}",
            query.order_by.column(),
            if query.desc { "DESC" } else { "ASC" },
        );
        let mut stmt = conn.prepare(&sql).map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map(params_refs.as_slice(), KnowledgeBase::from_row)
            .map_err(DatabaseError::Query)?;

        let mut kbs = Vec::new();
        for row in rows {
            kbs.push(row.map_err(DatabaseError::Query)?);
        }

        Ok((kbs, total))
    }

    /// Persist the user-editable fields of a knowledge base
    pub fn update_knowledge_base(&self, kb: &KnowledgeBase) -> ServiceResult<bool> {
        self.execute_update(
            "UPDATE knowledgebases SET name = ?1, description = ?2, parser_id = ?3, parser_config = ?4, pagerank = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                kb.name,
                kb.description,
                kb.parser_id,
                kb.parser_config.to_string(),
                kb.pagerank,
                now_rfc3339(),
                kb.id
            ],
        )
    }

    /// Delete a knowledge base row
    pub fn delete_knowledge_base(&self, id: &str) -> ServiceResult<bool> {
        self.execute_update("DELETE FROM knowledgebases WHERE id = ?1", params![id])
    }
}
