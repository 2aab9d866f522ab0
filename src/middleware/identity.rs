use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::models::CurrentUser;
use crate::services::UserService;
use crate::AppState;

/// Set by the upstream auth gateway once the caller is authenticated
pub const USER_ID_HEADER: &str = "x-user-id";
/// Optional per-request quota override from the same gateway
pub const USER_QUOTA_HEADER: &str = "x-user-quota";

const MAX_USER_ID_LEN: usize = 128;

/// Identity middleware
/// Trusts the gateway's headers verbatim and attaches the caller's account
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_USER_ID_LEN)
        .ok_or_else(|| AppError::Unauthorized("Missing or invalid X-User-Id header".to_string()))?
        .to_string();

    let quota_override = match request.headers().get(USER_QUOTA_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|quota| *quota >= 0)
                .ok_or_else(|| AppError::BadRequest("Invalid X-User-Quota header".to_string()))?,
        ),
        None => None,
    };

    let account =
        UserService::ensure_account(&state.db, &user_id, state.config.quota.default_bytes).await?;
    let mut current_user = CurrentUser::from(account);
    if let Some(quota) = quota_override {
        current_user.storage_quota = quota;
    }

    request.extensions_mut().insert(current_user);

    Ok(next.run(request).await)
}
