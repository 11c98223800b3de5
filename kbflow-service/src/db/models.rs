//! Database model structs.
//!
//! This module contains the data structures for database records.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Content category of a document or file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Virtual,
    Text,
    Visual,
    Aural,
    Presentation,
    Email,
    Folder,
    Other,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Virtual => "virtual",
            FileType::Text => "text",
            FileType::Visual => "visual",
            FileType::Aural => "aural",
            FileType::Presentation => "presentation",
            FileType::Email => "email",
            FileType::Folder => "folder",
            FileType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "virtual" => FileType::Virtual,
            "text" => FileType::Text,
            "visual" => FileType::Visual,
            "aural" => FileType::Aural,
            "presentation" => FileType::Presentation,
            "email" => FileType::Email,
            "folder" => FileType::Folder,
            _ => FileType::Other,
        }
    }
}

/// Built-in parser identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserType {
    Naive,
    Presentation,
    Picture,
    Audio,
    Email,
}

impl ParserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserType::Naive => "naive",
            ParserType::Presentation => "presentation",
            ParserType::Picture => "picture",
            ParserType::Audio => "audio",
            ParserType::Email => "email",
        }
    }
}

/// Parse run state of a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Unstart,
    Running,
    Cancelled,
    Done,
    Fail,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Unstart => "unstart",
            RunStatus::Running => "running",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Done => "done",
            RunStatus::Fail => "fail",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => RunStatus::Running,
            "cancelled" => RunStatus::Cancelled,
            "done" => RunStatus::Done,
            "fail" => RunStatus::Fail,
            _ => RunStatus::Unstart,
        }
    }
}

/// How a document entered its knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Local,
    Crawl,
    Virtual,
    File,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSource::Local => "local",
            DocumentSource::Crawl => "crawl",
            DocumentSource::Virtual => "virtual",
            DocumentSource::File => "file",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "crawl" => DocumentSource::Crawl,
            "virtual" => DocumentSource::Virtual,
            "file" => DocumentSource::File,
            _ => DocumentSource::Local,
        }
    }
}

/// Owner of a file row in the virtual file tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSource {
    /// Private to a knowledge base; removed with its document.
    KnowledgeBase,
    /// Part of a user's general folder tree; only ever linked.
    Local,
}

impl FileSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileSource::KnowledgeBase => "knowledgebase",
            FileSource::Local => "local",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "knowledgebase" => FileSource::KnowledgeBase,
            _ => FileSource::Local,
        }
    }
}

/// Document record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub kb_id: String,
    #[serde(rename = "type")]
    pub doc_type: FileType,
    pub parser_id: String,
    pub parser_config: serde_json::Value,
    pub source_type: DocumentSource,
    pub created_by: String,
    pub name: String,
    /// Blob key; empty for virtual documents.
    pub location: String,
    pub size: u64,
    pub enabled: bool,
    pub run: RunStatus,
    pub progress: f64,
    pub progress_msg: String,
    pub chunk_num: i64,
    pub token_num: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_begin_at: Option<DateTime<Utc>>,
    pub process_duration: f64,
    pub meta_fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const DOCUMENT_COLUMNS: &str = "id, kb_id, doc_type, parser_id, parser_config, \
     source_type, created_by, name, location, size, status, run, progress, progress_msg, \
     chunk_num, token_num, process_begin_at, process_duration, meta_fields, created_at, updated_at";

impl Document {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let doc_type: String = row.get(2)?;
        let parser_config: String = row.get(4)?;
        let source_type: String = row.get(5)?;
        let size: i64 = row.get(9)?;
        let status: i64 = row.get(10)?;
        let run: String = row.get(11)?;
        let process_begin_at: Option<String> = row.get(16)?;
        let meta_fields: String = row.get(18)?;
        let created_at: String = row.get(19)?;
        let updated_at: String = row.get(20)?;

        Ok(Self {
            id: row.get(0)?,
            kb_id: row.get(1)?,
            doc_type: FileType::from_str(&doc_type),
            parser_id: row.get(3)?,
            parser_config: parse_json_object(&parser_config),
            source_type: DocumentSource::from_str(&source_type),
            created_by: row.get(6)?,
            name: row.get(7)?,
            location: row.get(8)?,
            size: size.max(0) as u64,
            enabled: status != 0,
            run: RunStatus::from_str(&run),
            progress: row.get(12)?,
            progress_msg: row.get(13)?,
            chunk_num: row.get(14)?,
            token_num: row.get(15)?,
            process_begin_at: process_begin_at.as_deref().map(parse_timestamp),
            process_duration: row.get(17)?,
            meta_fields: parse_json_object(&meta_fields),
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

/// Knowledge base record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: String,
    pub parser_id: String,
    pub parser_config: serde_json::Value,
    pub pagerank: i64,
    pub doc_num: i64,
    pub token_num: i64,
    pub chunk_num: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const KNOWLEDGE_BASE_COLUMNS: &str = "id, tenant_id, name, description, parser_id, \
     parser_config, pagerank, doc_num, token_num, chunk_num, created_by, created_at, updated_at";

impl KnowledgeBase {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let parser_config: String = row.get(5)?;
        let created_at: String = row.get(11)?;
        let updated_at: String = row.get(12)?;

        Ok(Self {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            parser_id: row.get(4)?,
            parser_config: parse_json_object(&parser_config),
            pagerank: row.get(6)?,
            doc_num: row.get(7)?,
            token_num: row.get(8)?,
            chunk_num: row.get(9)?,
            created_by: row.get(10)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

/// One unit of parse work for a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub doc_id: String,
    pub from_page: i64,
    pub to_page: i64,
    /// 0.0 to 1.0 while running; -1.0 marks a failed task.
    pub progress: f64,
    pub progress_msg: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let created_at: String = row.get(6)?;
        let updated_at: String = row.get(7)?;

        Ok(Self {
            id: row.get(0)?,
            doc_id: row.get(1)?,
            from_page: row.get(2)?,
            to_page: row.get(3)?,
            progress: row.get(4)?,
            progress_msg: row.get(5)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }
}

/// Entry in the virtual file tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    /// Parent folder id; a root folder is its own parent.
    pub parent_id: String,
    pub tenant_id: String,
    pub created_by: String,
    pub name: String,
    pub location: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub source_type: FileSource,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let size: i64 = row.get(6)?;
        let file_type: String = row.get(7)?;
        let source_type: String = row.get(8)?;
        let created_at: String = row.get(9)?;

        Ok(Self {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            tenant_id: row.get(2)?,
            created_by: row.get(3)?,
            name: row.get(4)?,
            location: row.get(5)?,
            size: size.max(0) as u64,
            file_type: FileType::from_str(&file_type),
            source_type: FileSource::from_str(&source_type),
            created_at: parse_timestamp(&created_at),
        })
    }

    pub fn is_folder(&self) -> bool {
        self.file_type == FileType::Folder
    }
}

/// Link between a file and a document built from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDocumentLink {
    pub id: String,
    pub file_id: String,
    pub document_id: String,
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_json_object(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({}))
}
