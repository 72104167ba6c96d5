//! Resume upload, metadata, download, and deletion.
//!
//! At most one resume per user (get-or-create); re-upload overwrites the
//! stored bytes and the recorded original filename.

use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use bytes::Bytes;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::resume::{ResumeResponse, ResumeRow};
use crate::models::user::UserRow;
use crate::state::AppState;
use crate::storage::MediaStore;

/// POST /api/v1/resumes
/// Multipart form: file.
pub async fn handle_upload(
    State(state): State<AppState>,
    Extension(user): Extension<Arc<UserRow>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ResumeResponse>), AppError> {
    let mut upload: Option<(Bytes, String)> = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("resume").to_string();
                upload = Some((field.bytes().await?, filename));
            }
            other => {
                return Err(AppError::Validation(format!(
                    "unexpected form field '{other}'"
                )))
            }
        }
    }
    let (bytes, filename) = upload
        .ok_or_else(|| AppError::Validation("missing required field 'file'".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::Validation("resume file must not be empty".to_string()));
    }

    let file_path = MediaStore::resume_rel_path(user.id);
    state.media.store(&file_path, &bytes)?;

    let row: ResumeRow = sqlx::query_as(
        r#"
        INSERT INTO resumes (id, user_id, file_path, original_filename, uploaded_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (user_id) DO UPDATE
        SET file_path = $3, original_filename = $4, uploaded_at = now()
        RETURNING id, user_id, file_path, original_filename, uploaded_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(&file_path)
    .bind(&filename)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(row.into())))
}

async fn fetch_resume(state: &AppState, user_id: Uuid) -> Result<ResumeRow, AppError> {
    let row: Option<ResumeRow> = sqlx::query_as(
        "SELECT id, user_id, file_path, original_filename, uploaded_at FROM resumes WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?;
    row.ok_or_else(|| AppError::NotFound("no resume uploaded".to_string()))
}

/// GET /api/v1/resumes/me
pub async fn handle_get(
    State(state): State<AppState>,
    Extension(user): Extension<Arc<UserRow>>,
) -> Result<Json<ResumeResponse>, AppError> {
    Ok(Json(fetch_resume(&state, user.id).await?.into()))
}

/// GET /api/v1/resumes/me/download
/// Attachment-style download of the stored bytes under the original
/// filename. A database row whose backing file has gone missing is a
/// `RESUME_FILE_NOT_FOUND`, not a crash.
pub async fn handle_download(
    State(state): State<AppState>,
    Extension(user): Extension<Arc<UserRow>>,
) -> Result<(HeaderMap, Bytes), AppError> {
    let resume = fetch_resume(&state, user.id).await?;

    let bytes = state.media.read(&resume.file_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::ResumeFileNotFound
        } else {
            AppError::Storage(format!("reading {}: {e}", resume.file_path))
        }
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_filename(&resume.original_filename)
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|_| AppError::Storage("invalid resume filename".to_string()))?,
    );
    Ok((headers, Bytes::from(bytes)))
}

/// DELETE /api/v1/resumes/me
pub async fn handle_delete(
    State(state): State<AppState>,
    Extension(user): Extension<Arc<UserRow>>,
) -> Result<StatusCode, AppError> {
    let resume = fetch_resume(&state, user.id).await?;

    sqlx::query("DELETE FROM resumes WHERE id = $1")
        .bind(resume.id)
        .execute(&state.db)
        .await?;
    state.media.remove(&resume.file_path);

    Ok(StatusCode::NO_CONTENT)
}

/// Keeps the Content-Disposition header well-formed whatever the client
/// originally named the file.
fn sanitize_filename(name: &str) -> String {
    if name.trim().is_empty() {
        return "resume".to_string();
    }
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_ordinary_names() {
        assert_eq!(sanitize_filename("cv-2024.pdf"), "cv-2024.pdf");
        assert_eq!(sanitize_filename("my resume.docx"), "my resume.docx");
    }

    #[test]
    fn sanitize_replaces_quotes_and_control_chars() {
        assert_eq!(sanitize_filename("a\"b\\c\nd"), "a_b_c_d");
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize_filename(""), "resume");
        assert_eq!(sanitize_filename("\n\t"), "resume");
    }
}
