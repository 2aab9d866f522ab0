use serde::Serialize;
use sqlx::FromRow;

use super::{ContentBlob, LogicalFile};

/// Public share link, at most one per logical file
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ShareLink {
    pub share_id: String,
    pub file_id: String,
    pub is_public: bool,
    pub share_token: String,
    pub download_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Result of toggling a share
#[derive(Debug, Clone, Serialize)]
pub struct ShareToggle {
    pub share_token: String,
    pub is_public: bool,
}

/// A share resolved by token
#[derive(Debug, Clone)]
pub struct ResolvedShare {
    pub file: LogicalFile,
    pub content: ContentBlob,
    /// Count including this resolution, or the stored value if the
    /// increment could not be persisted
    pub download_count: i64,
}

/// Public view of a resolved share
#[derive(Debug, Serialize)]
pub struct PublicShareInfo {
    pub file_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub download_count: i64,
    pub created_at: String,
}

impl From<&ResolvedShare> for PublicShareInfo {
    fn from(resolved: &ResolvedShare) -> Self {
        Self {
            file_id: resolved.file.file_id.clone(),
            filename: resolved.file.display_name.clone(),
            mime_type: resolved.content.mime_type.clone(),
            size: resolved.content.size,
            download_count: resolved.download_count,
            created_at: resolved.file.created_at.clone(),
        }
    }
}

/// Share item for the owner's listing
#[derive(Debug, Serialize, FromRow)]
pub struct ShareListItem {
    pub share_id: String,
    pub file_id: String,
    pub file_name: String,
    pub size: i64,
    pub mime_type: String,
    pub is_public: bool,
    pub share_token: String,
    pub download_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Entry in the public listing of every live public share
#[derive(Debug, Serialize, FromRow)]
pub struct PublicShareListItem {
    pub share_id: String,
    pub file_id: String,
    pub filename: String,
    pub owner_id: String,
    pub mime_type: String,
    pub size: i64,
    pub download_count: i64,
    pub share_token: String,
    pub created_at: String,
}
