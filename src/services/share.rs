use bytes::Bytes;
use rand::{distributions::Alphanumeric, Rng};
use uuid::Uuid;

use crate::db::{self, Database};
use crate::error::{AppError, Result};
use crate::models::{
    ContentBlob, LogicalFile, PublicShareListItem, ResolvedShare, ShareLink, ShareListItem, ShareToggle,
};
use crate::services::{ContentStore, FileService};

const TOKEN_LEN: usize = 32;
const TOKEN_ATTEMPTS: usize = 10;

pub struct ShareService;

impl ShareService {
    /// Create the file's share link as public, or flip an existing one.
    /// Every call issues a new token; the previous one stops resolving.
    pub async fn toggle(db: &Database, file_id: &str, owner_id: &str) -> Result<ShareToggle> {
        let file = FileService::get_file(db, file_id).await?;
        if file.is_deleted {
            return Err(AppError::NotFound("File not found".to_string()));
        }
        if file.owner_id != owner_id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }

        let mut last_error: Option<sqlx::Error> = None;
        for _ in 0..TOKEN_ATTEMPTS {
            let candidate = generate_token();
            let now = db::now();

            let result: std::result::Result<(bool, String), sqlx::Error> = sqlx::query_as(
                r#"
                INSERT INTO shares (share_id, file_id, is_public, share_token, download_count, created_at, updated_at)
                VALUES (?, ?, 1, ?, 0, ?, ?)
                ON CONFLICT(file_id) DO UPDATE SET
                    is_public = NOT shares.is_public,
                    share_token = excluded.share_token,
                    updated_at = excluded.updated_at
                RETURNING is_public, share_token
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(file_id)
            .bind(&candidate)
            .bind(&now)
            .bind(&now)
            .fetch_one(db.pool())
            .await;

            match result {
                Ok((is_public, share_token)) => {
                    tracing::info!(
                        "User {} set share for file {} to {}",
                        owner_id,
                        file_id,
                        if is_public { "public" } else { "private" }
                    );
                    return Ok(ShareToggle {
                        share_token,
                        is_public,
                    });
                }
                Err(e) if db::is_unique_violation(&e, "shares.share_token") => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Internal(format!(
            "Failed to generate unique share token: {}",
            last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )))
    }

    /// Resolve a public token to its file and content, counting the access.
    ///
    /// Unknown tokens, private shares and shares of deleted files all fail
    /// with the same error.
    pub async fn resolve_by_token(db: &Database, token: &str) -> Result<ResolvedShare> {
        if token.is_empty() {
            return Err(AppError::NotFoundOrPrivate);
        }

        let share: ShareLink = sqlx::query_as("SELECT * FROM shares WHERE share_token = ?")
            .bind(token)
            .fetch_optional(db.pool())
            .await?
            .filter(|s: &ShareLink| s.is_public)
            .ok_or(AppError::NotFoundOrPrivate)?;

        let file: LogicalFile = sqlx::query_as("SELECT * FROM files WHERE file_id = ? AND is_deleted = 0")
            .bind(&share.file_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or(AppError::NotFoundOrPrivate)?;

        let content: ContentBlob = sqlx::query_as("SELECT * FROM content_blobs WHERE content_id = ?")
            .bind(&file.content_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or(AppError::NotFoundOrPrivate)?;

        let counted: std::result::Result<Option<i64>, sqlx::Error> = sqlx::query_scalar(
            r#"
            UPDATE shares SET download_count = download_count + 1
            WHERE share_id = ? AND share_token = ? AND is_public = 1
            RETURNING download_count
            "#,
        )
        .bind(&share.share_id)
        .bind(token)
        .fetch_optional(db.pool())
        .await;

        let download_count = match counted {
            Ok(Some(count)) => count,
            // toggled away while we were reading
            Ok(None) => return Err(AppError::NotFoundOrPrivate),
            Err(e) => {
                tracing::warn!("Failed to record download for share {}: {}", share.share_id, e);
                share.download_count
            }
        };

        Ok(ResolvedShare {
            file,
            content,
            download_count,
        })
    }

    /// Resolve a public token and read the shared bytes
    pub async fn download(db: &Database, content: &ContentStore, token: &str) -> Result<(ResolvedShare, Bytes)> {
        let resolved = Self::resolve_by_token(db, token).await?;
        let data = content.read(&resolved.content).await?;
        Ok((resolved, data))
    }

    /// Share links of the owner's live files
    pub async fn list_for_owner(db: &Database, owner_id: &str) -> Result<Vec<ShareListItem>> {
        let items = sqlx::query_as(
            r#"
            SELECT
                s.share_id,
                s.file_id,
                f.display_name AS file_name,
                c.size,
                c.mime_type,
                s.is_public,
                s.share_token,
                s.download_count,
                s.created_at,
                s.updated_at
            FROM shares s
            JOIN files f ON f.file_id = s.file_id
            JOIN content_blobs c ON c.content_id = f.content_id
            WHERE f.owner_id = ? AND f.is_deleted = 0
            ORDER BY s.updated_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(db.pool())
        .await?;
        Ok(items)
    }

    /// Every public share of a live file, across all owners. Listing does
    /// not count as a download.
    pub async fn list_public(db: &Database) -> Result<Vec<PublicShareListItem>> {
        let items = sqlx::query_as(
            r#"
            SELECT
                s.share_id,
                s.file_id,
                f.display_name AS filename,
                f.owner_id,
                c.mime_type,
                c.size,
                s.download_count,
                s.share_token,
                s.created_at
            FROM shares s
            JOIN files f ON f.file_id = s.file_id
            JOIN content_blobs c ON c.content_id = f.content_id
            WHERE s.is_public = 1 AND f.is_deleted = 0
            ORDER BY s.updated_at DESC, s.share_id
            "#,
        )
        .fetch_all(db.pool())
        .await?;
        Ok(items)
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
