use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{
    error::AppError,
    models::{FileResponse, IncomingFile, ListQuery, ListResponse, UploadResponse},
    state::AppState,
    utils::attachment_disposition,
};

const FLASH_COOKIE: &str = "flash";

fn flash_cookie(message: String) -> Cookie<'static> {
    Cookie::build((FLASH_COOKIE, message))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Attach the error's user-facing message as a flash before rendering it.
fn flash_error(jar: SignedCookieJar, err: AppError) -> (SignedCookieJar, AppError) {
    let jar = match err.flash_message() {
        Some(message) => jar.add(flash_cookie(message)),
        None => jar,
    };
    (jar, err)
}

/// List every file, or only those matching `?q=`.
pub async fn list_files(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<ListQuery>,
) -> Result<(SignedCookieJar, Json<ListResponse>), AppError> {
    let q = params.q.unwrap_or_default().trim().to_string();
    let files = state.service.search(&q).await?;

    // Flash messages are shown once
    let flash = jar.get(FLASH_COOKIE).map(|c| c.value().to_string());
    let jar = if flash.is_some() {
        jar.remove(Cookie::build(FLASH_COOKIE).path("/"))
    } else {
        jar
    };

    Ok((
        jar,
        Json(ListResponse {
            files: files.into_iter().map(FileResponse::from).collect(),
            q,
            flash,
        }),
    ))
}

/// Upload one or more files using multipart/form-data (field name `file`).
pub async fn upload_file(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    multipart: Multipart,
) -> Result<(StatusCode, SignedCookieJar, Json<UploadResponse>), (SignedCookieJar, AppError)> {
    let max_request_size = state.service.limits().max_request_size;

    let files = read_file_parts(multipart, max_request_size)
        .await
        .map_err(|e| flash_error(jar.clone(), e))?;
    let saved = state
        .service
        .upload(files)
        .await
        .map_err(|e| flash_error(jar.clone(), e))?;

    let jar = jar.add(flash_cookie(format!(
        "Uploaded {} file(s) successfully.",
        saved.len()
    )));

    Ok((
        StatusCode::CREATED,
        jar,
        Json(UploadResponse {
            count: saved.len(),
            files: saved.into_iter().map(FileResponse::from).collect(),
        }),
    ))
}

async fn read_file_parts(
    mut multipart: Multipart,
    max_request_size: u64,
) -> Result<Vec<IncomingFile>, AppError> {
    let mut files = Vec::new();
    let mut total: u64 = 0;

    // Parse multipart fields
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }

        // Browsers submit an empty part when no file was chosen
        let filename = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };
        let content_type = field.content_type().map(|s| s.to_string());
        let data = field.bytes().await?;

        total += data.len() as u64;
        if total > max_request_size {
            return Err(AppError::PayloadTooLarge(format!(
                "Upload exceeds maximum limit of {} bytes",
                max_request_size
            )));
        }

        files.push(IncomingFile {
            filename,
            content_type,
            data,
        });
    }

    Ok(files)
}

/// Download a file by id under its original name.
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let (file, reader) = state.service.download(id).await?;

    let content_type = file
        .mime_type
        .as_deref()
        .and_then(|m| header::HeaderValue::from_str(m).ok())
        .unwrap_or_else(|| header::HeaderValue::from_static("application/octet-stream"));

    // Set Content-Disposition header to force download
    // and preserve the original filename
    let disposition = header::HeaderValue::from_str(&attachment_disposition(&file.original_name))
        .unwrap_or_else(|_| header::HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}

/// Get metadata for a single file by its id.
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<FileResponse>, AppError> {
    let file = state.service.get(id).await?;
    Ok(Json(file.into()))
}

/// Delete a file and its metadata row.
pub async fn delete_file(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(id): Path<i64>,
) -> Result<(StatusCode, SignedCookieJar), (SignedCookieJar, AppError)> {
    let file = state
        .service
        .delete(id)
        .await
        .map_err(|e| flash_error(jar.clone(), e))?;
    let jar = jar.add(flash_cookie(format!("Deleted {}.", file.original_name)));

    // 204 No Content indicates successful deletion with no response body
    Ok((StatusCode::NO_CONTENT, jar))
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}
