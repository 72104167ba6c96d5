use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::password::verify_password;
use crate::auth::session::{self, SessionToken};
use crate::errors::AppError;
use crate::models::user::{UserResponse, UserRow};
use crate::registration;
use crate::state::AppState;

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    /// Where the client should navigate after a successful auth action.
    pub redirect_to: &'static str,
}

/// POST /api/v1/auth/register
/// Multipart form: email, password, full_name, profile_photo.
/// Runs the face-uniqueness pipeline; on accept, persists the user and
/// establishes a session.
pub async fn handle_register(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), AppError> {
    let form = registration::collect_form(multipart).await?;
    let user = registration::register(&state, form).await?;
    info!("registered user {}", user.id);

    let token = session::issue(&state.db, user.id, state.config.session_ttl_hours).await?;
    let jar = jar.add(session::session_cookie(token));
    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthResponse {
            user: user.into(),
            redirect_to: "/dashboard",
        }),
    ))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /api/v1/auth/login
/// Credential check is deliberately generic on failure: the response
/// never says whether the email or the password was wrong.
pub async fn handle_login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AppError> {
    let user: Option<UserRow> = sqlx::query_as(
        "SELECT id, email, password_hash, full_name, photo_path, created_at FROM users WHERE email = $1",
    )
    .bind(req.email.trim().to_ascii_lowercase())
    .fetch_optional(&state.db)
    .await?;

    let user = match user {
        Some(user) if verify_password(&req.password, &user.password_hash) => user,
        _ => return Err(AppError::Unauthorized),
    };

    let token = session::issue(&state.db, user.id, state.config.session_ttl_hours).await?;
    let jar = jar.add(session::session_cookie(token));
    Ok((
        jar,
        Json(AuthResponse {
            user: user.into(),
            redirect_to: "/dashboard",
        }),
    ))
}

/// POST /api/v1/auth/logout
pub async fn handle_logout(
    State(state): State<AppState>,
    Extension(user): Extension<Arc<UserRow>>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError> {
    session::revoke(&state.db, token).await?;
    info!("user {} logged out", user.id);
    let jar = jar.remove(session::removal_cookie());
    Ok((jar, StatusCode::NO_CONTENT))
}
