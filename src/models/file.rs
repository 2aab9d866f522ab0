use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User-visible file
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LogicalFile {
    pub file_id: String,
    pub owner_id: String,
    pub content_id: String,
    pub display_name: String,
    pub is_deleted: bool,
    pub created_at: String,
}

/// Insert payload for a logical file. New rows are never soft-deleted.
#[derive(Debug, Clone)]
pub struct NewLogicalFile {
    pub file_id: String,
    pub owner_id: String,
    pub content_id: String,
    pub display_name: String,
    pub created_at: String,
}

/// Logical file joined with its content's size and mime type
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileEntry {
    pub file_id: String,
    pub owner_id: String,
    pub content_id: String,
    pub display_name: String,
    pub created_at: String,
    pub size: i64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Name,
    Created,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Caller-requested ordering for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ListSort {
    pub field: SortField,
    #[serde(default)]
    pub order: SortOrder,
}

impl ListSort {
    pub fn order_by_clause(&self) -> &'static str {
        match (self.field, self.order) {
            (SortField::Name, SortOrder::Asc) => "f.display_name ASC",
            (SortField::Name, SortOrder::Desc) => "f.display_name DESC",
            (SortField::Created, SortOrder::Asc) => "f.created_at ASC",
            (SortField::Created, SortOrder::Desc) => "f.created_at DESC",
            (SortField::Size, SortOrder::Asc) => "c.size ASC",
            (SortField::Size, SortOrder::Desc) => "c.size DESC",
        }
    }
}

/// Listing query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub sort: Option<SortField>,
    pub order: Option<SortOrder>,
}

impl ListQuery {
    pub fn to_sort(&self) -> Option<ListSort> {
        self.sort.map(|field| ListSort {
            field,
            order: self.order.unwrap_or_default(),
        })
    }
}

/// Conjunctive search filters; absent fields are ignored
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFilter {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}
