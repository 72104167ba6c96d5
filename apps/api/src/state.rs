use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::faces::FaceEmbedder;
use crate::storage::MediaStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Face embedding backend. Production: dlib models loaded once at
    /// startup behind a worker thread; tests swap in stubs.
    pub embedder: Arc<dyn FaceEmbedder>,
    pub media: MediaStore,
}
