mod auth;
mod config;
mod db;
mod errors;
mod faces;
mod models;
mod registration;
mod routes;
mod state;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::faces::{FaceEngine, FaceModelPaths};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::MediaStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_directive(&config.rust_log))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Facegate API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    // Initialize media storage
    let media = MediaStore::new(config.media_root.clone())?;
    info!("Media store at {}", config.media_root.display());

    // Load the dlib face models once, process-wide
    let embedder = Arc::new(FaceEngine::spawn(
        FaceModelPaths {
            landmark: config.landmark_model.clone(),
            encoder: config.encoder_model.clone(),
        },
        config.face_num_jitters,
    )?);
    info!("Face engine initialized");

    // Build app state
    let state = AppState {
        db,
        config: config.clone(),
        embedder,
        media,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Default filter directive when RUST_LOG is unset. Tracing targets use
/// module paths, so the crate name's hyphen must become an underscore or
/// the directive matches nothing.
fn default_log_directive(level: &str) -> String {
    format!("{}={level}", env!("CARGO_PKG_NAME").replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_directive_targets_the_crate_module_path() {
        let directive = default_log_directive("info");
        assert_eq!(directive, "facegate_api=info");
        assert!(!directive.contains('-'));
    }

    #[test]
    fn default_log_directive_parses_as_an_env_filter() {
        EnvFilter::try_new(default_log_directive("debug")).unwrap();
    }
}
