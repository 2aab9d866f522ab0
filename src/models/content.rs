use serde::Serialize;
use sqlx::FromRow;

/// One row per distinct byte sequence
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ContentBlob {
    pub content_id: String,
    #[serde(skip_serializing)]
    pub hash: String,
    pub size: i64,
    pub mime_type: String,
    #[serde(skip_serializing)]
    pub storage_key: String,
    #[serde(skip_serializing)]
    pub reference_count: i64,
    pub created_at: String,
}

/// Insert payload for a content blob seen for the first time.
/// The initial reference count is always 1 and is not caller-controlled.
#[derive(Debug, Clone)]
pub struct NewContentBlob {
    pub content_id: String,
    pub hash: String,
    pub size: i64,
    pub mime_type: String,
    pub storage_key: String,
}

/// Outcome of ingesting a byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub content_id: String,
    /// true when the bytes were new and written to the blob store
    pub created: bool,
    pub size: i64,
    pub mime_type: String,
}
