//! Cookie-carried, database-backed sessions.
//!
//! The cookie holds an opaque UUID token; the `sessions` table is the
//! source of truth. `require_session` is layered over every authenticated
//! route and injects `Arc<UserRow>` into request extensions.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::UserRow;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "sid";

/// Inserts a session row and returns its token.
pub async fn issue(pool: &PgPool, user_id: Uuid, ttl_hours: i64) -> Result<Uuid, AppError> {
    let token = Uuid::new_v4();
    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(token)
        .bind(user_id)
        .bind(Utc::now() + Duration::hours(ttl_hours))
        .execute(pool)
        .await?;
    Ok(token)
}

/// Deletes the session row for `token`; unknown tokens are a no-op.
pub async fn revoke(pool: &PgPool, token: Uuid) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sessions WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

pub fn session_cookie(token: Uuid) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Middleware guarding authenticated routes. Looks up the cookie token,
/// rejects missing/expired sessions with 401, and stashes the user row
/// for handlers.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| cookie.value().parse::<Uuid>().ok())
        .ok_or(AppError::Unauthorized)?;

    let user: Option<UserRow> = sqlx::query_as(
        r#"
        SELECT u.id, u.email, u.password_hash, u.full_name, u.photo_path, u.created_at
        FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token = $1 AND s.expires_at > now()
        "#,
    )
    .bind(token)
    .fetch_optional(&state.db)
    .await?;

    let user = user.ok_or(AppError::Unauthorized)?;
    request.extensions_mut().insert(Arc::new(user));
    request.extensions_mut().insert(SessionToken(token));
    Ok(next.run(request).await)
}

/// The validated session token, available to handlers (logout needs it).
#[derive(Debug, Clone, Copy)]
pub struct SessionToken(pub Uuid);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_is_http_only_and_host_wide() {
        let cookie = session_cookie(Uuid::new_v4());
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }

    #[test]
    fn removal_cookie_clears_the_value() {
        let cookie = removal_cookie();
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "");
    }
}
