use bytes::Bytes;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::db::{self, Database};
use crate::error::{AppError, Result};
use crate::models::{CurrentUser, FileEntry, ListSort, LogicalFile, NewLogicalFile, SearchFilter};
use crate::services::ContentStore;

const ENTRY_SELECT: &str = r#"
    SELECT f.file_id, f.owner_id, f.content_id, f.display_name, f.created_at, c.size, c.mime_type
    FROM files f
    JOIN content_blobs c ON c.content_id = f.content_id
"#;

const NAME_ATTEMPTS: usize = 10;

/// File service
pub struct FileService;

impl FileService {
    /// Store `data` for `user` and record it as a new logical file.
    ///
    /// Ingest and file creation share one ledger transaction, so a failed or
    /// cancelled upload leaves neither a content row nor a file row behind.
    pub async fn upload(
        content: &ContentStore,
        user: &CurrentUser,
        name: &str,
        declared_mime: Option<&str>,
        data: Bytes,
    ) -> Result<FileEntry> {
        validate_name(name)?;

        let owner = content.lock_owner(&user.id).await;
        let mut pending = content
            .ingest(&owner, user.storage_quota, data, declared_mime)
            .await?;

        let content_id = pending.outcome().content_id.clone();
        let file = match Self::create_logical_file(pending.conn(), &user.id, &content_id, name).await {
            Ok(file) => file,
            Err(e) => {
                pending.abort().await;
                return Err(e);
            }
        };

        let outcome = pending.commit().await?;
        drop(owner);

        tracing::info!(
            "User {} uploaded {} as {} (content {}, new: {})",
            user.id,
            file.display_name,
            file.file_id,
            outcome.content_id,
            outcome.created
        );

        Ok(FileEntry {
            file_id: file.file_id,
            owner_id: file.owner_id,
            content_id: file.content_id,
            display_name: file.display_name,
            created_at: file.created_at,
            size: outcome.size,
            mime_type: outcome.mime_type,
        })
    }

    /// Insert a live logical file, disambiguating the name if the owner
    /// already has a live file called `requested_name`
    pub async fn create_logical_file(
        conn: &mut SqliteConnection,
        owner_id: &str,
        content_id: &str,
        requested_name: &str,
    ) -> Result<LogicalFile> {
        validate_name(requested_name)?;

        let mut last_error: Option<sqlx::Error> = None;
        for attempt in 0..NAME_ATTEMPTS {
            let display_name = if attempt == 0 {
                requested_name.to_string()
            } else {
                disambiguate(requested_name)
            };

            let new_file = NewLogicalFile {
                file_id: Uuid::new_v4().to_string(),
                owner_id: owner_id.to_string(),
                content_id: content_id.to_string(),
                display_name,
                created_at: db::now(),
            };

            let result = sqlx::query(
                r#"
                INSERT INTO files (file_id, owner_id, content_id, display_name, is_deleted, created_at)
                VALUES (?, ?, ?, ?, 0, ?)
                "#,
            )
            .bind(&new_file.file_id)
            .bind(&new_file.owner_id)
            .bind(&new_file.content_id)
            .bind(&new_file.display_name)
            .bind(&new_file.created_at)
            .execute(&mut *conn)
            .await;

            match result {
                Ok(_) => {
                    if attempt > 0 {
                        tracing::debug!(
                            "Name '{}' taken for {}, stored as '{}'",
                            requested_name,
                            owner_id,
                            new_file.display_name
                        );
                    }
                    return Ok(LogicalFile {
                        file_id: new_file.file_id,
                        owner_id: new_file.owner_id,
                        content_id: new_file.content_id,
                        display_name: new_file.display_name,
                        is_deleted: false,
                        created_at: new_file.created_at,
                    });
                }
                Err(e) if db::is_unique_violation(&e, "files.owner_id, files.display_name") => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Conflict(format!(
            "Could not find a free name for '{}': {}",
            requested_name,
            last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )))
    }

    /// Hide a file from its owner and drop its content reference
    pub async fn soft_delete(
        db: &Database,
        content: &ContentStore,
        file_id: &str,
        owner_id: &str,
    ) -> Result<()> {
        let file = Self::get_file(db, file_id).await?;
        if file.is_deleted {
            return Err(AppError::NotFound("File not found".to_string()));
        }
        if file.owner_id != owner_id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }

        let release = content.lock_for_release(&file.content_id).await?;

        let mut tx = db.begin_write().await?;
        let flipped = sqlx::query("UPDATE files SET is_deleted = 1 WHERE file_id = ? AND is_deleted = 0")
            .bind(file_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if flipped == 0 {
            // lost a race with another delete of the same file
            return Err(AppError::NotFound("File not found".to_string()));
        }
        let remaining = release.decrement(&mut tx).await?;
        tx.commit().await?;

        tracing::info!("User {} deleted file {}", owner_id, file_id);
        content.finish_release(release, remaining).await;
        Ok(())
    }

    /// List the owner's live files, newest first unless a sort is given
    pub async fn list(db: &Database, owner_id: &str, sort: Option<ListSort>) -> Result<Vec<FileEntry>> {
        let order_by = sort
            .map(|s| s.order_by_clause())
            .unwrap_or("f.created_at DESC");
        let sql = format!(
            "{} WHERE f.owner_id = ? AND f.is_deleted = 0 ORDER BY {}, f.file_id",
            ENTRY_SELECT, order_by
        );

        let files = sqlx::query_as(&sql)
            .bind(owner_id)
            .fetch_all(db.pool())
            .await?;
        Ok(files)
    }

    /// Search the owner's live files; every present filter must match
    pub async fn search(db: &Database, owner_id: &str, filter: &SearchFilter) -> Result<Vec<FileEntry>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(ENTRY_SELECT);
        query
            .push(" WHERE f.owner_id = ")
            .push_bind(owner_id.to_string())
            .push(" AND f.is_deleted = 0");

        if let Some(name) = filter.name.as_deref().filter(|n| !n.is_empty()) {
            query
                .push(" AND instr(lower(f.display_name), lower(")
                .push_bind(name.to_string())
                .push(")) > 0");
        }

        if let Some(mime_type) = filter.mime_type.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            let mime_type = mime_type.to_ascii_lowercase();
            match mime_type.strip_suffix("/*") {
                Some(kind) => {
                    query
                        .push(" AND c.mime_type LIKE ")
                        .push_bind(format!("{}/%", kind));
                }
                None => {
                    query.push(" AND c.mime_type = ").push_bind(mime_type);
                }
            }
        }

        if let Some(min_size) = filter.min_size {
            query.push(" AND c.size >= ").push_bind(min_size);
        }
        if let Some(max_size) = filter.max_size {
            query.push(" AND c.size <= ").push_bind(max_size);
        }
        if let Some(after) = filter.created_after {
            query
                .push(" AND f.created_at >= ")
                .push_bind(db::format_timestamp(after));
        }
        if let Some(before) = filter.created_before {
            query
                .push(" AND f.created_at <= ")
                .push_bind(db::format_timestamp(before));
        }

        query.push(" ORDER BY f.created_at DESC, f.file_id");

        let files = query.build_query_as::<FileEntry>().fetch_all(db.pool()).await?;
        Ok(files)
    }

    /// Get a file row by ID, deleted or not
    pub async fn get_file(db: &Database, file_id: &str) -> Result<LogicalFile> {
        sqlx::query_as("SELECT * FROM files WHERE file_id = ?")
            .bind(file_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    /// Metadata of one of the owner's live files
    pub async fn get(db: &Database, file_id: &str, owner_id: &str) -> Result<FileEntry> {
        let sql = format!("{} WHERE f.file_id = ? AND f.is_deleted = 0", ENTRY_SELECT);
        let entry: FileEntry = sqlx::query_as(&sql)
            .bind(file_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        if entry.owner_id != owner_id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }
        Ok(entry)
    }

    /// Metadata and bytes of one of the owner's live files
    pub async fn download(
        db: &Database,
        content: &ContentStore,
        file_id: &str,
        owner_id: &str,
    ) -> Result<(FileEntry, Bytes)> {
        let entry = Self::get(db, file_id, owner_id).await?;
        let blob = content.get(&entry.content_id).await?;
        let data = content.read(&blob).await?;
        Ok((entry, data))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.contains('/') || name.contains('\\') {
        return Err(AppError::BadRequest("Invalid file name".to_string()));
    }
    Ok(())
}

/// Short random prefix plus the original name
fn disambiguate(name: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", &id[..8], name)
}
