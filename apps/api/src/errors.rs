use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// The registration pipeline surfaces every rejection through one of the
/// face-specific variants; handlers never leak which existing account a
/// duplicate face matched.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("could not decode the uploaded image: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("unable to detect a face in the photo; please upload a clear photo")]
    NoFaceDetected,

    #[error("the photo contains {0} faces; please upload a photo with exactly one face")]
    AmbiguousFaces(usize),

    #[error("this face is already registered with another account")]
    DuplicateFace,

    #[error("resume file not found")]
    ResumeFileNotFound,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::Validation(format!("malformed multipart body: {err}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::ImageDecode(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "IMAGE_DECODE_ERROR",
                format!("Error processing the image: {e}"),
            ),
            AppError::NoFaceDetected => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "NO_FACE_DETECTED",
                "Unable to detect a face in the photo. Please upload a clear photo.".to_string(),
            ),
            AppError::AmbiguousFaces(n) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "AMBIGUOUS_FACES",
                format!("Detected {n} faces in the photo. Please upload a photo with exactly one face."),
            ),
            AppError::DuplicateFace => (
                StatusCode::CONFLICT,
                "DUPLICATE_FACE",
                "This face is already registered with another account.".to_string(),
            ),
            AppError::ResumeFileNotFound => (
                StatusCode::NOT_FOUND,
                "RESUME_FILE_NOT_FOUND",
                "Resume file not found".to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_pipeline_errors_map_to_unprocessable_entity() {
        for err in [AppError::NoFaceDetected, AppError::AmbiguousFaces(3)] {
            assert_eq!(
                err.into_response().status(),
                StatusCode::UNPROCESSABLE_ENTITY
            );
        }
    }

    #[test]
    fn duplicate_face_maps_to_conflict() {
        let response = AppError::DuplicateFace.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn missing_resume_file_maps_to_not_found() {
        let response = AppError::ResumeFileNotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let response = AppError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
