//! Registration orchestrator: normalize the uploaded photo, extract the
//! candidate embedding, scan existing users for a duplicate face, and
//! persist the new account only if the face is unseen.
//!
//! The scan and the insert run inside one transaction holding a Postgres
//! advisory lock, so two concurrent registrations with the same face
//! serialize instead of both passing the scan.

use axum::extract::Multipart;
use bytes::Bytes;
use uuid::Uuid;

use crate::auth::password::hash_password;
use crate::errors::AppError;
use crate::faces::scanner::{find_duplicate, upsert_embedding};
use crate::faces::{decode_rgb, normalize_photo, Embedding};
use crate::models::user::UserRow;
use crate::state::AppState;
use crate::storage::MediaStore;

/// Advisory lock key serializing the duplicate-face scan against the
/// commit of competing registrations.
const REGISTRATION_LOCK_KEY: i64 = 0xFACE_0001;

#[derive(Debug)]
pub struct PhotoUpload {
    pub bytes: Bytes,
    pub filename: String,
}

#[derive(Debug)]
pub struct RegistrationForm {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub photo: PhotoUpload,
}

/// Drains the multipart body into a `RegistrationForm`, failing with
/// `Validation` on missing or unknown fields.
pub async fn collect_form(mut multipart: Multipart) -> Result<RegistrationForm, AppError> {
    let mut email = None;
    let mut password = None;
    let mut full_name = None;
    let mut photo = None;

    while let Some(field) = multipart.next_field().await? {
        // Owned copy: `text()`/`bytes()` consume the field.
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "email" => email = Some(field.text().await?),
            "password" => password = Some(field.text().await?),
            "full_name" => full_name = Some(field.text().await?),
            "profile_photo" => {
                let filename = field.file_name().unwrap_or("photo.jpg").to_string();
                photo = Some(PhotoUpload {
                    filename,
                    bytes: field.bytes().await?,
                });
            }
            other => {
                return Err(AppError::Validation(format!(
                    "unexpected form field '{other}'"
                )))
            }
        }
    }

    let form = RegistrationForm {
        email: email.ok_or_else(|| missing("email"))?,
        password: password.ok_or_else(|| missing("password"))?,
        full_name: full_name.ok_or_else(|| missing("full_name"))?,
        photo: photo.ok_or_else(|| missing("profile_photo"))?,
    };
    validate(&form)?;
    Ok(form)
}

fn missing(field: &str) -> AppError {
    AppError::Validation(format!("missing required field '{field}'"))
}

pub fn validate(form: &RegistrationForm) -> Result<(), AppError> {
    validate_email(&form.email)?;
    if form.password.chars().count() < 8 {
        return Err(AppError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }
    if form.full_name.trim().is_empty() {
        return Err(AppError::Validation("full name is required".to_string()));
    }
    if form.photo.bytes.is_empty() {
        return Err(AppError::Validation(
            "profile photo must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), AppError> {
    let trimmed = email.trim();
    let valid = trimmed
        .split_once('@')
        .map(|(local, domain)| {
            !local.is_empty()
                && domain.contains('.')
                && domain.split('.').all(|label| !label.is_empty())
        })
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "'{email}' is not a valid email address"
        )))
    }
}

/// Single-face policy for new uploads: exactly one detected face yields
/// the candidate embedding; zero or several are user-visible rejections.
pub fn select_candidate(mut faces: Vec<Embedding>) -> Result<Embedding, AppError> {
    match faces.len() {
        0 => Err(AppError::NoFaceDetected),
        1 => Ok(faces.swap_remove(0)),
        n => Err(AppError::AmbiguousFaces(n)),
    }
}

/// File extension for the stored photo, derived from the upload filename.
fn photo_extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "jpg".to_string())
}

/// Runs the full registration pipeline and returns the persisted user.
pub async fn register(state: &AppState, form: RegistrationForm) -> Result<UserRow, AppError> {
    // Matching pipeline sees the grayscale derivative only.
    let normalized = normalize_photo(&form.photo.bytes)?;
    let rgb = decode_rgb(&normalized)?;

    let faces = state.embedder.embed(rgb).await?;
    let candidate = select_candidate(faces)?;

    let mut tx = state.db.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(REGISTRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    let email = form.email.trim().to_ascii_lowercase();
    let taken: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await?;
    if taken.is_some() {
        return Err(AppError::Validation(
            "an account with this email already exists".to_string(),
        ));
    }

    if find_duplicate(&mut *tx, state.embedder.as_ref(), &state.media, &candidate).await? {
        return Err(AppError::DuplicateFace);
    }

    // The original upload is what gets stored, not the normalized JPEG.
    let user_id = Uuid::new_v4();
    let photo_path = MediaStore::photo_rel_path(
        user_id,
        Uuid::new_v4(),
        &photo_extension(&form.photo.filename),
    );
    state.media.store(&photo_path, &form.photo.bytes)?;

    let persisted: Result<UserRow, AppError> = async {
        let user: UserRow = sqlx::query_as(
            r#"
            INSERT INTO users (id, email, password_hash, full_name, photo_path)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, password_hash, full_name, photo_path, created_at
            "#,
        )
        .bind(user_id)
        .bind(&email)
        .bind(hash_password(&form.password))
        .bind(form.full_name.trim())
        .bind(&photo_path)
        .fetch_one(&mut *tx)
        .await?;

        upsert_embedding(&mut *tx, user_id, &candidate).await?;
        tx.commit().await?;
        Ok(user)
    }
    .await;

    match persisted {
        Ok(user) => Ok(user),
        Err(err) => {
            // The row never committed; drop the stored file too.
            state.media.remove(&photo_path);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(email: &str, password: &str, full_name: &str, photo: &[u8]) -> RegistrationForm {
        RegistrationForm {
            email: email.to_string(),
            password: password.to_string(),
            full_name: full_name.to_string(),
            photo: PhotoUpload {
                bytes: Bytes::copy_from_slice(photo),
                filename: "me.png".to_string(),
            },
        }
    }

    #[test]
    fn well_formed_registration_validates() {
        assert!(validate(&form("a@example.com", "longenough", "Ada", b"img")).is_ok());
    }

    #[test]
    fn invalid_emails_are_rejected() {
        for email in ["", "plain", "@example.com", "a@nodot"] {
            assert!(validate_email(email).is_err(), "accepted {email:?}");
        }
        assert!(validate_email("user@example.co.uk").is_ok());
    }

    #[test]
    fn emails_with_empty_domain_labels_are_rejected() {
        for email in ["a@.", "a@b.", "a@.com", "a@b..com"] {
            assert!(validate_email(email).is_err(), "accepted {email:?}");
        }
    }

    #[test]
    fn short_password_is_rejected() {
        let err = validate(&form("a@example.com", "short", "Ada", b"img")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = validate(&form("a@example.com", "longenough", "   ", b"img")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn empty_photo_is_rejected() {
        let err = validate(&form("a@example.com", "longenough", "Ada", b"")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn one_face_is_the_candidate() {
        let embedding = vec![0.25; 128];
        assert_eq!(select_candidate(vec![embedding.clone()]).unwrap(), embedding);
    }

    #[test]
    fn zero_faces_is_no_face_detected() {
        let err = select_candidate(vec![]).unwrap_err();
        assert!(matches!(err, AppError::NoFaceDetected));
    }

    #[test]
    fn several_faces_are_ambiguous() {
        let err = select_candidate(vec![vec![0.1; 128], vec![0.2; 128], vec![0.3; 128]]).unwrap_err();
        assert!(matches!(err, AppError::AmbiguousFaces(3)));
    }

    #[test]
    fn photo_extension_falls_back_to_jpg() {
        assert_eq!(photo_extension("me.PNG"), "png");
        assert_eq!(photo_extension("me.jpeg"), "jpeg");
        assert_eq!(photo_extension("noext"), "jpg");
        assert_eq!(photo_extension("weird.!!"), "jpg");
        assert_eq!(photo_extension("trailing."), "jpg");
    }
}
