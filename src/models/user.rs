use serde::Serialize;
use sqlx::FromRow;

/// Account record as seen by the vault
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: String,
    pub storage_quota: i64,
    pub created_at: String,
}

/// Identity of the caller, supplied by the upstream auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    pub storage_quota: i64,
}

impl From<Account> for CurrentUser {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            storage_quota: account.storage_quota,
        }
    }
}
