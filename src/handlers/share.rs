use axum::{
    extract::{Path, State},
    response::Response,
    Extension, Json,
};

use crate::error::{ApiResponse, Result};
use crate::handlers::attachment;
use crate::models::{CurrentUser, PublicShareInfo, PublicShareListItem, ShareListItem};
use crate::services::ShareService;
use crate::AppState;

/// List user's shares
/// GET /api/v1/shares
pub async fn list_my_shares(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<ShareListItem>>>> {
    let shares = ShareService::list_for_owner(&state.db, &current_user.id).await?;
    Ok(Json(ApiResponse::success(shares)))
}

/// List every live public share
/// GET /api/v1/public/shares
pub async fn list_public_shares(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<PublicShareListItem>>>> {
    let shares = ShareService::list_public(&state.db).await?;
    Ok(Json(ApiResponse::success(shares)))
}

/// Get public share info
/// GET /api/v1/public/share/:token
pub async fn get_public_share(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<PublicShareInfo>>> {
    let resolved = ShareService::resolve_by_token(&state.db, &token).await?;
    Ok(Json(ApiResponse::success(PublicShareInfo::from(&resolved))))
}

/// Download a publicly shared file
/// GET /api/v1/public/share/:token/download
pub async fn download_public_share(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response> {
    let (resolved, data) = ShareService::download(&state.db, &state.content, &token).await?;
    attachment(&resolved.file.display_name, &resolved.content.mime_type, data)
}
