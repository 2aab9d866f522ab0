use crate::db::{self, Database};
use crate::error::{AppError, Result};
use crate::models::Account;

/// User service
pub struct UserService;

impl UserService {
    /// Get account by ID
    pub async fn get_account(db: &Database, user_id: &str) -> Result<Account> {
        let account: Account = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        Ok(account)
    }

    /// Load the account, provisioning it with `default_quota` on first sight
    pub async fn ensure_account(db: &Database, user_id: &str, default_quota: i64) -> Result<Account> {
        let inserted = sqlx::query(
            "INSERT INTO users (id, storage_quota, created_at) VALUES (?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(user_id)
        .bind(default_quota)
        .bind(db::now())
        .execute(db.pool())
        .await?
        .rows_affected();

        if inserted > 0 {
            tracing::info!("Provisioned account {} with quota {} bytes", user_id, default_quota);
        }

        Self::get_account(db, user_id).await
    }
}
