use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Directory holding uploaded profile photos and resume files.
    pub media_root: PathBuf,
    /// dlib 68-point landmark predictor model file.
    pub landmark_model: PathBuf,
    /// dlib ResNet face encoder model file.
    pub encoder_model: PathBuf,
    /// Re-encoding jitter passes for the face encoder; 0 is the fast default.
    pub face_num_jitters: u32,
    pub session_ttl_hours: i64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            media_root: PathBuf::from(
                std::env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string()),
            ),
            landmark_model: PathBuf::from(require_env("DLIB_LANDMARK_MODEL")?),
            encoder_model: PathBuf::from(require_env("DLIB_ENCODER_MODEL")?),
            face_num_jitters: std::env::var("FACE_NUM_JITTERS")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<u32>()
                .context("FACE_NUM_JITTERS must be a non-negative integer")?,
            session_ttl_hours: std::env::var("SESSION_TTL_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse::<i64>()
                .context("SESSION_TTL_HOURS must be a positive integer")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}
