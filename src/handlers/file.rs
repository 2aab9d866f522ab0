use axum::{
    extract::{Multipart, Path, Query, State},
    response::Response,
    Extension, Json,
};
use bytes::Bytes;

use crate::error::{ApiResponse, AppError, Result};
use crate::handlers::attachment;
use crate::models::{CurrentUser, FileEntry, ListQuery, SearchFilter, ShareToggle};
use crate::services::{FileService, ShareService};
use crate::AppState;

/// List the caller's files
/// GET /api/v1/files?sort=name|created|size&order=asc|desc
pub async fn list_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<FileEntry>>>> {
    let files = FileService::list(&state.db, &current_user.id, query.to_sort()).await?;
    Ok(Json(ApiResponse::success(files)))
}

/// Search the caller's files
/// GET /api/v1/files/search?name=&mime_type=&min_size=&max_size=&created_after=&created_before=
pub async fn search_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(filter): Query<SearchFilter>,
) -> Result<Json<ApiResponse<Vec<FileEntry>>>> {
    let files = FileService::search(&state.db, &current_user.id, &filter).await?;
    Ok(Json(ApiResponse::success(files)))
}

/// Upload a file
/// POST /api/v1/files (multipart, field `file`, optional field `name`)
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<FileEntry>>> {
    let mut data: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut name_override: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                data = Some(field.bytes().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read file: {}", e))
                })?);
            }
            "name" => {
                let text = field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read name: {}", e))
                })?;
                if !text.is_empty() {
                    name_override = Some(text);
                }
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;
    let file_name = name_override
        .or(file_name)
        .ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;

    let file = FileService::upload(
        &state.content,
        &current_user,
        &file_name,
        content_type.as_deref(),
        data,
    )
    .await?;

    Ok(Json(ApiResponse::success(file)))
}

/// Get a specific file
/// GET /api/v1/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileEntry>>> {
    let file = FileService::get(&state.db, &id, &current_user.id).await?;
    Ok(Json(ApiResponse::success(file)))
}

/// Download a file
/// GET /api/v1/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response> {
    let (file, data) = FileService::download(&state.db, &state.content, &id, &current_user.id).await?;
    attachment(&file.display_name, &file.mime_type, data)
}

/// Delete a file
/// DELETE /api/v1/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    FileService::soft_delete(&state.db, &state.content, &id, &current_user.id).await?;
    Ok(Json(ApiResponse::<()>::success_message("File deleted")))
}

/// Toggle the file's public share link
/// POST /api/v1/files/:id/share
pub async fn toggle_share(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ShareToggle>>> {
    let share = ShareService::toggle(&state.db, &id, &current_user.id).await?;
    Ok(Json(ApiResponse::success(share)))
}
