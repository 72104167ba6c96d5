pub mod account;
pub mod auth;
pub mod health;
pub mod resumes;

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};

use crate::auth::session::require_session;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/auth/logout", post(auth::handle_logout))
        .route("/api/v1/dashboard", get(account::handle_dashboard))
        .route("/api/v1/profile", patch(account::handle_update_profile))
        .route("/api/v1/account", delete(account::handle_delete_account))
        .route("/api/v1/resumes", post(resumes::handle_upload))
        .route(
            "/api/v1/resumes/me",
            get(resumes::handle_get).delete(resumes::handle_delete),
        )
        .route("/api/v1/resumes/me/download", get(resumes::handle_download))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/auth/register", post(auth::handle_register))
        .route("/api/v1/auth/login", post(auth::handle_login))
        .merge(protected)
        .with_state(state)
}
