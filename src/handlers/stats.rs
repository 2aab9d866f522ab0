use axum::{extract::State, Extension, Json};

use crate::error::{ApiResponse, Result};
use crate::models::{CurrentUser, StorageStats};
use crate::services::StatsService;
use crate::AppState;

/// Storage usage and deduplication savings
/// GET /api/v1/stats
pub async fn get_stats(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<StorageStats>>> {
    let stats = StatsService::compute(&state.db, &current_user.id, current_user.storage_quota).await?;
    Ok(Json(ApiResponse::success(stats)))
}
