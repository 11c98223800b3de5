use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Knowledge base not found: {kb_id}")]
    KnowledgeBaseNotFound { kb_id: String },

    #[error("Tenant not found for document {document_id}")]
    TenantNotFound { document_id: String },

    #[error("File not found: {file_id}")]
    FileNotFound { file_id: String },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Duplicated document name in the same knowledge base: {name}")]
    DuplicateName { name: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Blob storage error")]
    Storage(#[from] StorageError),

    #[error("Index store error")]
    Index(#[from] IndexError),

    #[error("Task queue error")]
    Queue(#[from] QueueError),

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Batch(BatchFailure),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation {
            message: message.into(),
        }
    }
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },
}

/// Blob storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid object address: {bucket}/{key}")]
    InvalidKey { bucket: String, key: String },

    #[error("I/O failure on {bucket}/{key}")]
    Io {
        bucket: String,
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Index store errors
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index not found: {index_name}/{kb_id}")]
    IndexNotFound { index_name: String, kb_id: String },

    #[allow(dead_code)] // Raised by networked index engines
    #[error("Index engine unavailable: {message}")]
    Unavailable { message: String },
}

/// Task queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage failed")]
    Storage(#[source] rusqlite::Error),

    #[error("Invalid task payload")]
    Payload(#[source] serde_json::Error),
}

/// Model provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Unsupported provider: {factory} ({capability})")]
    UnsupportedProvider { factory: String, capability: String },

    #[error("Provider {factory} rejected the credentials: {message}")]
    Rejected { factory: String, message: String },
}

/// A single failed item in a batch operation.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub id: String,
    pub message: String,
}

/// Failures accumulated while a batch operation continued past them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchFailure {
    pub failures: Vec<ItemFailure>,
}

impl BatchFailure {
    pub fn record(&mut self, id: &str, error: &ServiceError) {
        self.failures.push(ItemFailure {
            id: id.to_string(),
            message: format_error_chain(error),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Convert into `Err` when anything failed.
    pub fn into_result(self) -> ServiceResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Batch(self))
        }
    }
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .failures
            .iter()
            .map(|item| format!("{}: {}", item.id, item.message))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{joined}")
    }
}

/// Render an error with its full `source()` chain, outermost first.
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. }
            | ServiceError::KnowledgeBaseNotFound { .. }
            | ServiceError::TenantNotFound { .. }
            | ServiceError::FileNotFound { .. }
            | ServiceError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Validation { .. } | ServiceError::DuplicateName { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Provider(ProviderError::UnsupportedProvider { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Provider(ProviderError::Rejected { .. }) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::KnowledgeBaseNotFound { .. } => "knowledge_base_not_found",
            ServiceError::TenantNotFound { .. } => "tenant_not_found",
            ServiceError::FileNotFound { .. } => "file_not_found",
            ServiceError::TaskNotFound { .. } => "task_not_found",
            ServiceError::Validation { .. } => "invalid_request",
            ServiceError::DuplicateName { .. } => "duplicate_name",
            ServiceError::FileTooLarge { .. } => "file_too_large",
            ServiceError::Database(_) => "database_error",
            ServiceError::Storage(StorageError::NotFound { .. }) => "object_not_found",
            ServiceError::Storage(_) => "storage_error",
            ServiceError::Index(_) => "index_error",
            ServiceError::Queue(_) => "queue_error",
            ServiceError::Provider(ProviderError::UnsupportedProvider { .. }) => {
                "unsupported_provider"
            }
            ServiceError::Provider(ProviderError::Rejected { .. }) => "provider_rejected",
            ServiceError::Batch(_) => "partial_failure",
            ServiceError::Config { .. } => "config_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let details = match &self {
            ServiceError::Batch(batch) => serde_json::to_value(&batch.failures).ok(),
            _ => None,
        };

        let response = ErrorResponse {
            message: format_error_chain(&self),
            code: Some(code),
            details,
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
