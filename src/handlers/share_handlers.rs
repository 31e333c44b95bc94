//! HTTP handlers for creating and accessing shares.
//!
//! These handlers are presentation plumbing only: they parse the multipart
//! form, enforce the upload rules, and translate the lifecycle engine's
//! outcome variants into responses. All lifecycle decisions happen in
//! `ShareService`.

use crate::{
    errors::AppError,
    handlers::AppState,
    services::share_service::Delivery,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON body returned after a successful upload.
#[derive(Debug, Serialize)]
pub struct CreateShareResponse {
    pub id: Uuid,
    pub url: String,
    pub display_name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_downloads: Option<i64>,
    pub requires_password: bool,
}

/// Query params accepted by the download endpoint.
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub password: Option<String>,
}

/// POST `/shares` — multipart upload with `file`, `expiry`, `max_downloads`
/// and `password` fields.
pub async fn create_share(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut file: Option<(String, Option<String>, bytes::Bytes)> = None;
    let mut expiry: Option<String> = None;
    let mut max_downloads: Option<String> = None;
    let mut password: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(|ct| ct.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string()))?;
                file = Some((filename, content_type, bytes));
            }
            "expiry" => expiry = Some(read_text_field(field).await?),
            "max_downloads" => max_downloads = Some(read_text_field(field).await?),
            "password" => password = Some(read_text_field(field).await?),
            other => {
                return Err(AppError::new(
                    StatusCode::BAD_REQUEST,
                    format!("unexpected form field `{other}`"),
                ));
            }
        }
    }

    let (filename, content_type, bytes) =
        file.ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "missing `file` field"))?;
    if filename.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "no file selected"));
    }
    if !state.uploads.extension_allowed(&filename) {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "file type not allowed",
        ));
    }
    if bytes.len() > state.uploads.max_upload_bytes {
        return Err(AppError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "file exceeds upload size limit",
        ));
    }
    let expiry =
        expiry.ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "missing `expiry` field"))?;

    let record = state
        .service
        .create(
            &bytes,
            &filename,
            content_type,
            &expiry,
            max_downloads.as_deref(),
            password.as_deref().filter(|p| !p.is_empty()),
        )
        .await?;

    let body = CreateShareResponse {
        id: record.id,
        url: format!("/shares/{}/download", record.id),
        display_name: record.display_name,
        expires_at: record.expires_at,
        max_downloads: record.max_downloads,
        requires_password: record.password_hash.is_some(),
    };
    Ok((StatusCode::CREATED, Json(body)))
}

/// GET `/shares/{id}` — validity snapshot, no content, no counter change.
pub async fn share_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let status = state.service.status(id).await?;
    Ok(Json(status))
}

/// GET `/shares/{id}/download` — deliver the file, consuming one download.
pub async fn download_share(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let delivery = state
        .service
        .consume(id, query.password.as_deref().filter(|p| !p.is_empty()))
        .await?;
    Ok(delivery_response(delivery, "attachment"))
}

/// GET `/shares/{id}/preview` — deliver the file inline without consuming
/// quota. Password-protected shares are not previewable.
pub async fn preview_share(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let delivery = state.service.preview(id).await?;
    Ok(delivery_response(delivery, "inline"))
}

fn delivery_response(delivery: Delivery, disposition: &str) -> Response {
    let content_type = delivery
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    let filename = sanitize_display_name(&delivery.display_name);

    let mut response = Response::new(Body::from(delivery.bytes));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("{disposition}; filename=\"{filename}\""))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    response
}

/// Reduce an untrusted display name to something safe for a header value:
/// last path component only, control and quote characters stripped.
fn sanitize_display_name(name: &str) -> String {
    let last_component = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);
    let cleaned: String = last_component
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize_display_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_display_name("C:\\temp\\evil.exe"), "evil.exe");
        assert_eq!(sanitize_display_name("plain.txt"), "plain.txt");
    }

    #[test]
    fn sanitize_strips_quotes_and_controls() {
        assert_eq!(sanitize_display_name("a\"b\r\n.txt"), "ab.txt");
    }

    #[test]
    fn sanitize_falls_back_on_empty() {
        assert_eq!(sanitize_display_name(""), "download");
        assert_eq!(sanitize_display_name("\"\""), "download");
        assert_eq!(sanitize_display_name(".."), "download");
        assert_eq!(sanitize_display_name("dir/"), "download");
    }
}
