use serde::Serialize;

/// Per-owner usage and deduplication savings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub storage_quota: i64,
    pub file_count: i64,
    /// Sum of content sizes over every live file
    pub original_bytes: i64,
    /// Sum of content sizes over the distinct contents of those files
    pub deduplicated_bytes: i64,
    /// Bytes charged against the quota
    pub used_bytes: i64,
    pub savings_bytes: i64,
    pub savings_pct: f64,
}
