//! Sources of document content.

use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use crate::blob::BlobStore;
use crate::error::{ServiceError, ServiceResult};

/// Anything that can hand over a named payload to be stored as a document.
pub trait ContentSource {
    fn filename(&self) -> &str;

    fn read_all(&self) -> ServiceResult<Bytes>;
}

/// A file part received from an upload request
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}

impl ContentSource for UploadedFile {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn read_all(&self) -> ServiceResult<Bytes> {
        Ok(self.data.clone())
    }
}

/// A web page already rendered to PDF by the crawler
#[derive(Debug, Clone)]
pub struct CrawledPage {
    filename: String,
    pub url: String,
    pub rendered: Bytes,
}

impl CrawledPage {
    /// The document is named after the page, with a `.pdf` suffix.
    pub fn new(name: &str, url: &str, rendered: impl Into<Bytes>) -> ServiceResult<Self> {
        if !is_valid_url(url) {
            return Err(ServiceError::validation("The URL format is invalid"));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::validation("Page name can't be empty"));
        }
        Ok(Self {
            filename: format!("{name}.pdf"),
            url: url.to_string(),
            rendered: rendered.into(),
        })
    }
}

impl ContentSource for CrawledPage {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn read_all(&self) -> ServiceResult<Bytes> {
        if self.rendered.is_empty() {
            return Err(ServiceError::validation(format!(
                "Download failure: {}",
                self.url
            )));
        }
        Ok(self.rendered.clone())
    }
}

/// An object already in blob storage
pub struct StoredBlob {
    store: Arc<dyn BlobStore>,
    bucket: String,
    key: String,
    filename: String,
}

impl StoredBlob {
    pub fn new(store: Arc<dyn BlobStore>, bucket: &str, key: &str, filename: &str) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            key: key.to_string(),
            filename: filename.to_string(),
        }
    }
}

impl ContentSource for StoredBlob {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn read_all(&self) -> ServiceResult<Bytes> {
        Ok(self.store.get(&self.bucket, &self.key)?)
    }
}

/// Absolute `http`/`https` URL with a host
pub fn is_valid_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some(),
        Err(_) => false,
    }
}
