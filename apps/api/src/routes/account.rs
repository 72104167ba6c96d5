//! Dashboard, profile update, and account deletion.
//!
//! Profile-photo replacement re-runs the normalization/embedding pipeline
//! and refreshes the cached embedding. Face uniqueness is only enforced
//! at registration; a photo update is not re-checked against other
//! accounts.

use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::session;
use crate::errors::AppError;
use crate::faces::scanner::upsert_embedding;
use crate::faces::{decode_rgb, normalize_photo};
use crate::models::resume::{ResumeResponse, ResumeRow};
use crate::models::user::{UserResponse, UserRow};
use crate::state::AppState;
use crate::storage::MediaStore;

#[derive(Serialize)]
pub struct DashboardResponse {
    pub user: UserResponse,
    pub resume: Option<ResumeResponse>,
}

/// GET /api/v1/dashboard
pub async fn handle_dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<Arc<UserRow>>,
) -> Result<Json<DashboardResponse>, AppError> {
    let resume: Option<ResumeRow> = sqlx::query_as(
        "SELECT id, user_id, file_path, original_filename, uploaded_at FROM resumes WHERE user_id = $1",
    )
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?;

    Ok(Json(DashboardResponse {
        user: user.as_ref().clone().into(),
        resume: resume.map(Into::into),
    }))
}

/// PATCH /api/v1/profile
/// Multipart form; both fields optional: full_name, profile_photo.
pub async fn handle_update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<Arc<UserRow>>,
    mut multipart: Multipart,
) -> Result<Json<UserResponse>, AppError> {
    let mut full_name = None;
    let mut photo: Option<(bytes::Bytes, String)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "full_name" => full_name = Some(field.text().await?),
            "profile_photo" => {
                let filename = field.file_name().unwrap_or("photo.jpg").to_string();
                photo = Some((field.bytes().await?, filename));
            }
            other => {
                return Err(AppError::Validation(format!(
                    "unexpected form field '{other}'"
                )))
            }
        }
    }

    if let Some(name) = &full_name {
        if name.trim().is_empty() {
            return Err(AppError::Validation("full name must not be blank".to_string()));
        }
    }

    let mut new_photo: Option<(String, Vec<f64>)> = None;
    if let Some((bytes, filename)) = photo {
        // Same pipeline and single-face policy as registration.
        let normalized = normalize_photo(&bytes)?;
        let rgb = decode_rgb(&normalized)?;
        let faces = state.embedder.embed(rgb).await?;
        let embedding = crate::registration::select_candidate(faces)?;

        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "jpg".to_string());
        // Staged under a fresh name; the file the current row points at
        // stays intact until the update commits.
        let rel_path = MediaStore::photo_rel_path(user.id, Uuid::new_v4(), &ext);
        state.media.store(&rel_path, &bytes)?;
        new_photo = Some((rel_path, embedding));
    }

    let mut tx = state.db.begin().await?;
    let updated: Result<UserRow, AppError> = async {
        if let Some((_, embedding)) = &new_photo {
            upsert_embedding(&mut *tx, user.id, embedding).await?;
        }

        let row: UserRow = sqlx::query_as(
            r#"
            UPDATE users
            SET full_name = COALESCE($2, full_name),
                photo_path = COALESCE($3, photo_path)
            WHERE id = $1
            RETURNING id, email, password_hash, full_name, photo_path, created_at
            "#,
        )
        .bind(user.id)
        .bind(full_name.as_deref().map(str::trim))
        .bind(new_photo.as_ref().map(|(rel_path, _)| rel_path.as_str()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }
    .await;

    match updated {
        Ok(row) => {
            if new_photo.is_some() {
                // The row now points at the staged file; the superseded
                // one can go.
                if let Some(old) = &user.photo_path {
                    state.media.remove(old);
                }
            }
            Ok(Json(row.into()))
        }
        Err(err) => {
            if let Some((rel_path, _)) = &new_photo {
                // Nothing committed; drop the staged file.
                state.media.remove(rel_path);
            }
            Err(err)
        }
    }
}

/// DELETE /api/v1/account
/// Removes the user row (sessions, resume record, and cached embedding
/// cascade) and then the media files.
pub async fn handle_delete_account(
    State(state): State<AppState>,
    Extension(user): Extension<Arc<UserRow>>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError> {
    let resume: Option<(String,)> =
        sqlx::query_as("SELECT file_path FROM resumes WHERE user_id = $1")
            .bind(user.id)
            .fetch_optional(&state.db)
            .await?;

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    if let Some(photo_path) = &user.photo_path {
        state.media.remove(photo_path);
    }
    if let Some((file_path,)) = resume {
        state.media.remove(&file_path);
    }

    info!("deleted account {}", user.id);
    let jar = jar.remove(session::removal_cookie());
    Ok((jar, StatusCode::NO_CONTENT))
}
