pub mod file;
pub mod share;
pub mod stats;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use bytes::Bytes;

use crate::error::{AppError, Result};

/// Build a download response with an RFC 6266 Content-Disposition
pub(crate) fn attachment(name: &str, mime_type: &str, data: Bytes) -> Result<Response> {
    let fallback_name = name.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(name);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type)
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
