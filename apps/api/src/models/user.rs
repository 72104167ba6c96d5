use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    /// Relative path under the media root; the original uploaded bytes,
    /// not the grayscale derivative used for matching.
    pub photo_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// User shape safe for client responses (no password hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub has_photo: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for UserResponse {
    fn from(row: UserRow) -> Self {
        UserResponse {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            has_photo: row.photo_path.is_some(),
            created_at: row.created_at,
        }
    }
}
