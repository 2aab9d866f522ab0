use crate::db::Database;
use crate::error::Result;
use crate::models::StorageStats;
use crate::services::content::owner_usage;

pub struct StatsService;

impl StatsService {
    /// Original versus deduplicated usage over the owner's live files.
    /// Both sums are read in one transaction so they describe the same state.
    pub async fn compute(db: &Database, owner_id: &str, storage_quota: i64) -> Result<StorageStats> {
        let mut tx = db.begin().await?;

        let (file_count, original_bytes): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(c.size), 0)
            FROM files f
            JOIN content_blobs c ON c.content_id = f.content_id
            WHERE f.owner_id = ? AND f.is_deleted = 0
            "#,
        )
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?;

        let deduplicated_bytes = owner_usage(&mut tx, owner_id).await?;
        tx.commit().await?;

        Ok(summarize(storage_quota, file_count, original_bytes, deduplicated_bytes))
    }
}

fn summarize(storage_quota: i64, file_count: i64, original_bytes: i64, deduplicated_bytes: i64) -> StorageStats {
    let savings_bytes = original_bytes - deduplicated_bytes;
    let savings_pct = if original_bytes == 0 {
        0.0
    } else {
        let pct = 100.0 * savings_bytes as f64 / original_bytes as f64;
        (pct * 100.0).round() / 100.0
    };

    StorageStats {
        storage_quota,
        file_count,
        original_bytes,
        deduplicated_bytes,
        used_bytes: deduplicated_bytes,
        savings_bytes,
        savings_pct,
    }
}
