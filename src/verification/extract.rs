//! Certificate data extraction from uploaded documents.

use crate::{CapabilityError, WorkflowError, WorkflowResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Document kinds accepted for verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Image,
    Json,
}

impl MediaType {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(MediaType::Pdf),
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "tif" | "tiff" => {
                Some(MediaType::Image)
            }
            "json" => Some(MediaType::Json),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        match mime.as_str() {
            "application/pdf" => Some(MediaType::Pdf),
            "application/json" => Some(MediaType::Json),
            m if m.starts_with("image/") => Some(MediaType::Image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub path: PathBuf,
    pub media_type: MediaType,
}

impl DocumentRef {
    /// Reference a document by path, inferring its type from the extension
    pub fn from_path(path: impl Into<PathBuf>) -> WorkflowResult<Self> {
        let path = path.into();
        let media_type =
            MediaType::from_path(&path).ok_or_else(|| WorkflowError::InvalidField {
                field: "document",
                value: path.display().to_string(),
            })?;
        Ok(Self { path, media_type })
    }
}

/// Best-effort certificate fields read from a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedCertificate {
    pub certificate_id: Option<String>,
    pub organization: Option<String>,
    pub target_description: Option<String>,
    pub wipe_standard: Option<String>,
    pub issue_date: Option<String>,
    pub verification_hash: Option<String>,
}

impl ExtractedCertificate {
    /// The certificate id, if one was found and is not blank
    pub fn certificate_id(&self) -> Option<&str> {
        self.certificate_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub status: ExtractionStatus,
    pub output: Option<ExtractedCertificate>,
}

impl ExtractionResult {
    pub fn success(output: ExtractedCertificate) -> Self {
        Self {
            status: ExtractionStatus::Success,
            output: Some(output),
        }
    }

    pub fn failure() -> Self {
        Self {
            status: ExtractionStatus::Failure,
            output: None,
        }
    }
}

/// JSON schema handed to the extraction capability
pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "certificate_id": {"type": "string"},
            "organization": {"type": "string"},
            "target_description": {"type": "string"},
            "wipe_standard": {"type": "string"},
            "issue_date": {"type": "string"},
            "verification_hash": {"type": "string"}
        }
    })
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Pull the fields described by `schema` out of `document`.
    ///
    /// `Ok` with [`ExtractionStatus::Failure`] means the document was read but
    /// held nothing usable. `Err` means the capability itself failed.
    async fn extract(
        &self,
        document: &DocumentRef,
        schema: &Value,
    ) -> Result<ExtractionResult, CapabilityError>;
}

/// Reads certificates exported as JSON. PDFs and images yield a failed
/// extraction since there is no OCR backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDocumentExtractor;

impl JsonDocumentExtractor {
    fn read_fields(value: &Value, schema: &Value) -> ExtractedCertificate {
        let field = |name: &str| -> Option<String> {
            let declared = schema
                .get("properties")
                .and_then(|p| p.get(name))
                .is_some();
            if !declared {
                return None;
            }
            value.get(name).and_then(Value::as_str).map(String::from)
        };

        ExtractedCertificate {
            certificate_id: field("certificate_id"),
            organization: field("organization"),
            target_description: field("target_description"),
            wipe_standard: field("wipe_standard"),
            // Exported certificates carry their issue date as created_date
            issue_date: field("issue_date").or_else(|| {
                value
                    .get("created_date")
                    .and_then(Value::as_str)
                    .map(String::from)
            }),
            verification_hash: field("verification_hash"),
        }
    }
}

#[async_trait]
impl DocumentExtractor for JsonDocumentExtractor {
    async fn extract(
        &self,
        document: &DocumentRef,
        schema: &Value,
    ) -> Result<ExtractionResult, CapabilityError> {
        if document.media_type != MediaType::Json {
            tracing::debug!(
                path = %document.path.display(),
                media_type = ?document.media_type,
                "No extractor backend for document type"
            );
            return Ok(ExtractionResult::failure());
        }

        let bytes = tokio::fs::read(&document.path).await.map_err(|e| {
            CapabilityError::Unavailable(format!("{}: {}", document.path.display(), e))
        })?;

        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Document is not valid JSON");
                return Ok(ExtractionResult::failure());
            }
        };

        let extracted = Self::read_fields(&value, schema);
        if extracted.is_empty() {
            return Ok(ExtractionResult::failure());
        }
        Ok(ExtractionResult::success(extracted))
    }
}
