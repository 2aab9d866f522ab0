use bytes::Bytes;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{self, Database, WriteTx};
use crate::error::{AppError, Result};
use crate::models::{ContentBlob, IngestOutcome, NewContentBlob};
use crate::services::locks::{KeyGuard, KeyedLocks};
use crate::services::mime;
use crate::storage::StorageProvider;

/// Content-addressed, reference-counted blob storage.
///
/// Every `reference_count` mutation for a given content happens while the
/// content lock for its hash is held, and the lock is only given up after
/// the surrounding ledger transaction has committed. Lock order is always
/// owner lock, then content lock, then ledger connection.
pub struct ContentStore {
    db: Database,
    provider: Arc<dyn StorageProvider>,
    owner_locks: KeyedLocks,
    content_locks: KeyedLocks,
    io_timeout: Duration,
}

/// Exclusive hold on one owner's quota domain
#[derive(Debug)]
pub struct OwnerGuard(KeyGuard);

impl OwnerGuard {
    pub fn owner_id(&self) -> &str {
        self.0.key()
    }
}

/// An ingest whose ledger writes are not yet committed.
///
/// Further writes belonging to the same upload go through [`PendingIngest::conn`].
/// Dropping it without committing rolls the ledger back; a blob written for
/// new content is then left behind as an orphan.
pub struct PendingIngest {
    tx: WriteTx,
    outcome: IngestOutcome,
    written_key: Option<String>,
    provider: Arc<dyn StorageProvider>,
    _content_lock: KeyGuard,
}

impl PendingIngest {
    pub fn outcome(&self) -> &IngestOutcome {
        &self.outcome
    }

    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    pub async fn commit(self) -> Result<IngestOutcome> {
        let PendingIngest {
            tx,
            outcome,
            written_key,
            provider,
            _content_lock,
        } = self;

        if let Err(e) = tx.commit().await {
            discard_blob(provider.as_ref(), written_key.as_deref()).await;
            return Err(e);
        }
        Ok(outcome)
    }

    /// Roll back and remove any blob this ingest wrote
    pub async fn abort(self) {
        let PendingIngest {
            tx,
            written_key,
            provider,
            _content_lock,
            ..
        } = self;

        if let Err(e) = tx.rollback().await {
            tracing::warn!("Rollback of aborted ingest failed: {:?}", e);
        }
        discard_blob(provider.as_ref(), written_key.as_deref()).await;
    }
}

/// A content reference about to be dropped, holding the content lock
pub struct ContentRelease {
    content: ContentBlob,
    _lock: KeyGuard,
}

impl ContentRelease {
    pub fn content(&self) -> &ContentBlob {
        &self.content
    }

    /// Decrement the reference count inside the caller's transaction and
    /// remove the row when it reaches zero. Returns the remaining count.
    pub async fn decrement(&self, conn: &mut SqliteConnection) -> Result<i64> {
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE content_blobs
            SET reference_count = reference_count - 1
            WHERE content_id = ? AND reference_count > 0
            RETURNING reference_count
            "#,
        )
        .bind(&self.content.content_id)
        .fetch_optional(&mut *conn)
        .await?;

        let remaining = remaining.ok_or_else(|| {
            AppError::NotFound(format!("Content not found: {}", self.content.content_id))
        })?;

        if remaining == 0 {
            sqlx::query("DELETE FROM content_blobs WHERE content_id = ? AND reference_count = 0")
                .bind(&self.content.content_id)
                .execute(&mut *conn)
                .await?;
        }

        Ok(remaining)
    }
}

impl ContentStore {
    pub fn new(db: Database, provider: Arc<dyn StorageProvider>, io_timeout: Duration) -> Self {
        Self {
            db,
            provider,
            owner_locks: KeyedLocks::new(),
            content_locks: KeyedLocks::new(),
            io_timeout,
        }
    }

    /// Serialize quota check-then-insert for one owner
    pub async fn lock_owner(&self, owner_id: &str) -> OwnerGuard {
        OwnerGuard(self.owner_locks.lock(owner_id).await)
    }

    /// Validate, hash and store `data` for the guarded owner, or add a
    /// reference to identical content already stored.
    pub async fn ingest(
        &self,
        owner: &OwnerGuard,
        quota: i64,
        data: Bytes,
        declared_mime: Option<&str>,
    ) -> Result<PendingIngest> {
        let mime_type = mime::validate(declared_mime, &data)?;
        let size = data.len() as i64;
        let hash = {
            let data = data.clone();
            tokio::task::spawn_blocking(move || hash_content(&data))
                .await
                .map_err(|e| AppError::Internal(format!("Hashing task failed: {}", e)))?
        };

        let content_lock = self.content_locks.lock(&hash).await;
        let mut tx = self.db.begin_write().await?;

        let existing = find_by_hash(&mut tx, &hash).await?;
        let already_owned = match &existing {
            Some(content) => owner_references(&mut tx, owner.owner_id(), &content.content_id).await?,
            None => false,
        };

        let used = owner_usage(&mut tx, owner.owner_id()).await?;
        let incoming = if already_owned { 0 } else { size };
        if used + incoming > quota {
            tracing::info!(
                "Rejected upload for {}: {} used + {} incoming > {} quota",
                owner.owner_id(),
                used,
                incoming,
                quota
            );
            return Err(AppError::QuotaExceeded {
                used,
                incoming,
                quota,
            });
        }

        let (outcome, written_key) = match existing {
            Some(content) => {
                let count: Option<i64> = sqlx::query_scalar(
                    "UPDATE content_blobs SET reference_count = reference_count + 1 WHERE content_id = ? RETURNING reference_count",
                )
                .bind(&content.content_id)
                .fetch_optional(&mut *tx)
                .await?;
                let count = count.ok_or_else(|| {
                    AppError::Internal(format!("Content {} vanished under lock", content.content_id))
                })?;

                tracing::debug!(
                    "Dedup hit for {}: content {} now has {} references",
                    owner.owner_id(),
                    content.content_id,
                    count
                );

                let outcome = IngestOutcome {
                    content_id: content.content_id,
                    created: false,
                    size: content.size,
                    mime_type: content.mime_type,
                };
                (outcome, None)
            }
            None => {
                let storage_key = format!("uploads/{}", Uuid::new_v4());
                self.put_blob(&storage_key, data).await?;

                let new_content = NewContentBlob {
                    content_id: Uuid::new_v4().to_string(),
                    hash,
                    size,
                    mime_type,
                    storage_key,
                };
                if let Err(e) = insert_content(&mut tx, &new_content).await {
                    discard_blob(self.provider.as_ref(), Some(&new_content.storage_key)).await;
                    return Err(e);
                }

                tracing::info!(
                    "Stored new content {} ({} bytes) at {}",
                    new_content.content_id,
                    new_content.size,
                    new_content.storage_key
                );

                let outcome = IngestOutcome {
                    content_id: new_content.content_id,
                    created: true,
                    size: new_content.size,
                    mime_type: new_content.mime_type,
                };
                (outcome, Some(new_content.storage_key))
            }
        };

        Ok(PendingIngest {
            tx,
            outcome,
            written_key,
            provider: self.provider.clone(),
            _content_lock: content_lock,
        })
    }

    /// Look up `content_id` and take its content lock
    pub async fn lock_for_release(&self, content_id: &str) -> Result<ContentRelease> {
        let content = self.get(content_id).await?;
        let lock = self.content_locks.lock(&content.hash).await;
        Ok(ContentRelease {
            content,
            _lock: lock,
        })
    }

    /// Drop one reference to `content_id`, reclaiming the blob when it was
    /// the last one. Returns the remaining reference count.
    pub async fn release(&self, content_id: &str) -> Result<i64> {
        let release = self.lock_for_release(content_id).await?;

        let mut tx = self.db.begin_write().await?;
        let remaining = release.decrement(&mut tx).await?;
        tx.commit().await?;

        self.finish_release(release, remaining).await;
        Ok(remaining)
    }

    /// Called after the decrement has committed. Removes the blob when no
    /// references remain; a failed delete leaves an orphan and is only logged.
    pub async fn finish_release(&self, release: ContentRelease, remaining: i64) {
        if remaining > 0 {
            tracing::debug!(
                "Content {} still has {} references",
                release.content.content_id,
                remaining
            );
            return;
        }

        let content = &release.content;
        tracing::info!(
            "Reference count is 0 for content {}, reclaiming {}",
            content.content_id,
            content.storage_key
        );
        let key = content.storage_key.clone();
        match self.bounded(self.provider.delete(&key)).await {
            Ok(()) => {}
            Err(e) => tracing::error!(
                "Failed to delete blob {} for reclaimed content {}: {}. Leaving orphan.",
                key,
                content.content_id,
                e
            ),
        }
    }

    /// Read the bytes of `content` from the blob store
    pub async fn read(&self, content: &ContentBlob) -> Result<Bytes> {
        self.bounded(self.provider.get(&content.storage_key))
            .await
            .map_err(AppError::StorageReadFailed)
    }

    /// Get a content blob by ID
    pub async fn get(&self, content_id: &str) -> Result<ContentBlob> {
        sqlx::query_as("SELECT * FROM content_blobs WHERE content_id = ?")
            .bind(content_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Content not found: {}", content_id)))
    }

    async fn put_blob(&self, key: &str, data: Bytes) -> Result<()> {
        self.bounded(self.provider.put(key, data))
            .await
            .map_err(AppError::StorageWriteFailed)
    }

    /// Apply the blob store timeout, flattening failures into a message
    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> std::result::Result<T, String> {
        match tokio::time::timeout(self.io_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "{} store timed out after {:?}",
                self.provider.storage_type(),
                self.io_timeout
            )),
        }
    }
}

/// Lowercase hex SHA-256 of the full byte stream
pub fn hash_content(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub async fn find_by_hash(conn: &mut SqliteConnection, hash: &str) -> Result<Option<ContentBlob>> {
    let content = sqlx::query_as("SELECT * FROM content_blobs WHERE hash = ?")
        .bind(hash)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(content)
}

/// Bytes charged to `owner_id`: each distinct live content counted once
pub async fn owner_usage(conn: &mut SqliteConnection, owner_id: &str) -> Result<i64> {
    let used: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(size), 0)
        FROM content_blobs
        WHERE content_id IN (
            SELECT content_id FROM files WHERE owner_id = ? AND is_deleted = 0
        )
        "#,
    )
    .bind(owner_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(used)
}

async fn owner_references(conn: &mut SqliteConnection, owner_id: &str, content_id: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM files WHERE owner_id = ? AND content_id = ? AND is_deleted = 0)",
    )
    .bind(owner_id)
    .bind(content_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

async fn insert_content(conn: &mut SqliteConnection, content: &NewContentBlob) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO content_blobs (content_id, hash, size, mime_type, storage_key, reference_count, created_at)
        VALUES (?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(&content.content_id)
    .bind(&content.hash)
    .bind(content.size)
    .bind(&content.mime_type)
    .bind(&content.storage_key)
    .bind(db::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn discard_blob(provider: &dyn StorageProvider, key: Option<&str>) {
    if let Some(key) = key {
        if let Err(e) = provider.delete(key).await {
            tracing::warn!("Failed to discard blob {} of rolled back ingest: {}", key, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::test_database;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;

    pub(crate) const PDF: &[u8] = b"%PDF-1.4\nshared report body";

    pub(crate) async fn setup() -> (Database, Arc<MemoryStorage>, Arc<ContentStore>) {
        let db = test_database().await;
        let storage = Arc::new(MemoryStorage::new());
        let store = Arc::new(ContentStore::new(
            db.clone(),
            storage.clone(),
            Duration::from_secs(5),
        ));
        (db, storage, store)
    }

    async fn ingest_committed(store: &ContentStore, owner: &str, data: &[u8]) -> Result<IngestOutcome> {
        let guard = store.lock_owner(owner).await;
        store
            .ingest(&guard, i64::MAX, Bytes::copy_from_slice(data), Some("application/pdf"))
            .await?
            .commit()
            .await
    }

    async fn reference_count(db: &Database, content_id: &str) -> Option<i64> {
        sqlx::query_scalar("SELECT reference_count FROM content_blobs WHERE content_id = ?")
            .bind(content_id)
            .fetch_optional(db.pool())
            .await
            .unwrap()
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            hash_content(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn first_ingest_creates_then_dedups() {
        let (db, storage, store) = setup().await;

        let first = ingest_committed(&store, "alice", PDF).await.unwrap();
        assert!(first.created);
        assert_eq!(first.size, PDF.len() as i64);
        assert_eq!(first.mime_type, "application/pdf");

        let second = ingest_committed(&store, "bob", PDF).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.content_id, first.content_id);

        assert_eq!(reference_count(&db, &first.content_id).await, Some(2));
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_ingests_count_every_reference() {
        let (db, storage, store) = setup().await;
        const N: usize = 24;

        let mut handles = Vec::new();
        for i in 0..N {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                ingest_committed(&store, &format!("owner-{}", i), PDF).await.unwrap()
            }));
        }
        let mut created = 0;
        let mut content_ids = std::collections::HashSet::new();
        for handle in handles {
            let outcome = handle.await.unwrap();
            created += outcome.created as usize;
            content_ids.insert(outcome.content_id);
        }

        assert_eq!(created, 1);
        assert_eq!(content_ids.len(), 1);
        let content_id = content_ids.into_iter().next().unwrap();
        assert_eq!(reference_count(&db, &content_id).await, Some(N as i64));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn interleaved_ingest_and_release_never_lose_updates() {
        let (db, storage, store) = setup().await;
        const N: usize = 12;

        // one reference beyond the N released below keeps the content alive
        let seed = ingest_committed(&store, "seed", PDF).await.unwrap();
        for i in 0..N {
            ingest_committed(&store, &format!("pre-{}", i), PDF).await.unwrap();
        }
        assert_eq!(reference_count(&db, &seed.content_id).await, Some(N as i64 + 1));

        let mut handles = Vec::new();
        for i in 0..N {
            let adder = store.clone();
            handles.push(tokio::spawn(async move {
                ingest_committed(&adder, &format!("post-{}", i), PDF).await.map(|_| ())
            }));
            let remover = store.clone();
            let content_id = seed.content_id.clone();
            handles.push(tokio::spawn(async move {
                remover.release(&content_id).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(reference_count(&db, &seed.content_id).await, Some(N as i64 + 1));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn last_release_reclaims_blob_and_row() {
        let (db, storage, store) = setup().await;
        let a = ingest_committed(&store, "alice", PDF).await.unwrap();
        ingest_committed(&store, "alice", PDF).await.unwrap();

        assert_eq!(store.release(&a.content_id).await.unwrap(), 1);
        assert_eq!(storage.len(), 1);
        assert_eq!(reference_count(&db, &a.content_id).await, Some(1));

        assert_eq!(store.release(&a.content_id).await.unwrap(), 0);
        assert!(storage.is_empty());
        assert_eq!(reference_count(&db, &a.content_id).await, None);

        assert!(matches!(store.release(&a.content_id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn reingest_after_reclaim_stores_fresh_copy() {
        let (_db, storage, store) = setup().await;
        let a = ingest_committed(&store, "alice", PDF).await.unwrap();
        store.release(&a.content_id).await.unwrap();

        let b = ingest_committed(&store, "alice", PDF).await.unwrap();
        assert!(b.created);
        assert_ne!(a.content_id, b.content_id);
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.write_count(), 2);
    }

    #[tokio::test]
    async fn failed_blob_delete_still_removes_row() {
        let (db, storage, store) = setup().await;
        let a = ingest_committed(&store, "alice", PDF).await.unwrap();

        storage.set_fail_deletes(true);
        assert_eq!(store.release(&a.content_id).await.unwrap(), 0);
        assert_eq!(reference_count(&db, &a.content_id).await, None);
        // orphaned bytes are left for reconciliation
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn failed_blob_write_leaves_no_metadata() {
        let (db, storage, store) = setup().await;
        storage.set_fail_writes(true);

        let result = ingest_committed(&store, "alice", PDF).await;
        assert!(matches!(result, Err(AppError::StorageWriteFailed(_))));

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_blobs")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn abort_discards_written_blob() {
        let (db, storage, store) = setup().await;
        let guard = store.lock_owner("alice").await;
        let pending = store
            .ingest(&guard, i64::MAX, Bytes::from_static(PDF), Some("application/pdf"))
            .await
            .unwrap();
        let content_id = pending.outcome().content_id.clone();
        assert_eq!(storage.len(), 1);

        pending.abort().await;
        assert!(storage.is_empty());
        assert_eq!(reference_count(&db, &content_id).await, None);
    }

    #[tokio::test]
    async fn dropped_ingest_rolls_back_ledger() {
        let (db, _storage, store) = setup().await;
        let guard = store.lock_owner("alice").await;
        let pending = store
            .ingest(&guard, i64::MAX, Bytes::from_static(PDF), Some("application/pdf"))
            .await
            .unwrap();
        let content_id = pending.outcome().content_id.clone();
        drop(pending);

        assert_eq!(reference_count(&db, &content_id).await, None);
    }

    #[tokio::test]
    async fn mime_is_validated_before_anything_is_stored() {
        let (_db, storage, store) = setup().await;
        let guard = store.lock_owner("alice").await;

        let missing = store.ingest(&guard, i64::MAX, Bytes::from_static(PDF), None).await;
        assert!(matches!(missing, Err(AppError::MimeMissing)));

        let mismatch = store
            .ingest(&guard, i64::MAX, Bytes::from_static(PDF), Some("image/png"))
            .await;
        assert!(matches!(mismatch, Err(AppError::MimeMismatch { .. })));
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn read_failure_maps_to_storage_read_failed() {
        let (_db, storage, store) = setup().await;
        let a = ingest_committed(&store, "alice", PDF).await.unwrap();
        let content = store.get(&a.content_id).await.unwrap();
        assert_eq!(store.read(&content).await.unwrap(), Bytes::from_static(PDF));

        storage.set_fail_reads(true);
        assert!(matches!(store.read(&content).await, Err(AppError::StorageReadFailed(_))));
    }

    struct StalledStorage;

    #[async_trait]
    impl StorageProvider for StalledStorage {
        async fn put(&self, _key: &str, _data: Bytes) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        async fn get(&self, _key: &str) -> Result<Bytes> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Bytes::new())
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        fn storage_type(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn blob_store_timeout_is_a_write_failure() {
        let db = test_database().await;
        let store = ContentStore::new(db.clone(), Arc::new(StalledStorage), Duration::from_millis(20));

        let result = ingest_committed(&store, "alice", PDF).await;
        assert!(matches!(result, Err(AppError::StorageWriteFailed(_))));

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_blobs")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }
}
