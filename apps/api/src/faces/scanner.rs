//! Duplicate-face scan over the existing user base.
//!
//! The comparison predicate matches the face_recognition library default:
//! Euclidean distance between 128-d descriptors strictly below 0.6. No
//! custom threshold is applied.
//!
//! Embeddings are cached in the `face_embeddings` table, written at
//! registration and on profile-photo change, so the common-case scan is
//! O(n) float comparisons. Users with a photo but no cache row (legacy
//! data) are re-extracted from the stored photo during the scan and the
//! cache backfilled. A stored photo that is unreadable, undecodable, or
//! contains no detectable face is skipped with a warning; it contributes
//! no candidate and never aborts the scan.

use sqlx::{FromRow, PgConnection};
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::faces::engine::{Embedding, FaceEmbedder};
use crate::faces::normalize::decode_rgb;
use crate::storage::MediaStore;

/// Default match tolerance of the face_recognition comparator.
pub const DEFAULT_MATCH_TOLERANCE: f64 = 0.6;

pub fn euclidean_distance(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter()
        .zip(rhs.iter())
        .map(|(l, r)| (l - r) * (l - r))
        .sum::<f64>()
        .sqrt()
}

/// Same-person predicate. Embeddings of mismatched dimensionality never
/// match.
pub fn embeddings_match(lhs: &[f64], rhs: &[f64]) -> bool {
    !lhs.is_empty()
        && lhs.len() == rhs.len()
        && euclidean_distance(lhs, rhs) < DEFAULT_MATCH_TOLERANCE
}

#[derive(Debug, FromRow)]
struct ScanRow {
    id: Uuid,
    photo_path: String,
    embedding: Option<Vec<f64>>,
}

/// Scans every photo-bearing user for a face matching `candidate`.
/// Short-circuits on the first match and reports only a boolean; the
/// matched account is never identified to the caller.
///
/// Runs on the registration transaction so the caller's advisory lock
/// covers the scan and the subsequent insert.
pub async fn find_duplicate(
    conn: &mut PgConnection,
    embedder: &dyn FaceEmbedder,
    media: &MediaStore,
    candidate: &[f64],
) -> Result<bool, AppError> {
    let rows: Vec<ScanRow> = sqlx::query_as(
        r#"
        SELECT u.id, u.photo_path, fe.embedding
        FROM users u
        LEFT JOIN face_embeddings fe ON fe.user_id = u.id
        WHERE u.photo_path IS NOT NULL
        ORDER BY u.created_at, u.id
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    for row in rows {
        let stored = match row.embedding {
            Some(embedding) => embedding,
            None => match derive_and_cache(conn, embedder, media, row.id, &row.photo_path).await? {
                Some(embedding) => embedding,
                None => continue,
            },
        };

        if embeddings_match(candidate, &stored) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Re-derives an embedding from a stored photo and backfills the cache.
async fn derive_and_cache(
    conn: &mut PgConnection,
    embedder: &dyn FaceEmbedder,
    media: &MediaStore,
    user_id: Uuid,
    photo_path: &str,
) -> Result<Option<Embedding>, AppError> {
    let embedding = match embedding_from_stored_photo(embedder, media, user_id, photo_path).await? {
        Some(embedding) => embedding,
        None => return Ok(None),
    };
    upsert_embedding(conn, user_id, &embedding).await?;
    Ok(Some(embedding))
}

/// Extracts the first-face embedding from a stored photo. Returns `None`
/// (skip) when the photo is unreadable, undecodable, or face-free; only
/// engine failures propagate.
async fn embedding_from_stored_photo(
    embedder: &dyn FaceEmbedder,
    media: &MediaStore,
    user_id: Uuid,
    photo_path: &str,
) -> Result<Option<Embedding>, AppError> {
    let bytes = match media.read(photo_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("skipping user {user_id}: stored photo {photo_path} unreadable: {e}");
            return Ok(None);
        }
    };

    let rgb = match decode_rgb(&bytes) {
        Ok(rgb) => rgb,
        Err(e) => {
            warn!("skipping user {user_id}: stored photo {photo_path} failed to decode: {e}");
            return Ok(None);
        }
    };

    let mut embeddings = embedder.embed(rgb).await?;
    if embeddings.is_empty() {
        warn!("skipping user {user_id}: no face detected in stored photo {photo_path}");
        return Ok(None);
    }
    // First detected face only, matching the registration-time policy.
    Ok(Some(embeddings.swap_remove(0)))
}

pub async fn upsert_embedding(
    conn: &mut PgConnection,
    user_id: Uuid,
    embedding: &[f64],
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO face_embeddings (user_id, embedding, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (user_id) DO UPDATE SET embedding = $2, updated_at = now()
        "#,
    )
    .bind(user_id)
    .bind(embedding)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    struct StubEmbedder {
        faces: Vec<Embedding>,
    }

    #[async_trait]
    impl FaceEmbedder for StubEmbedder {
        async fn embed(&self, _image: RgbImage) -> Result<Vec<Embedding>, AppError> {
            Ok(self.faces.clone())
        }
    }

    fn tiny_png() -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 4, image::Rgb([40, 80, 120]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn media_fixture() -> (TempDir, MediaStore) {
        let tmp = TempDir::new().unwrap();
        let store = MediaStore::new(tmp.path()).unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn missing_stored_photo_is_skipped() {
        let (_tmp, media) = media_fixture();
        let embedder = StubEmbedder {
            faces: vec![vec![0.1; 128]],
        };

        let result =
            embedding_from_stored_photo(&embedder, &media, Uuid::new_v4(), "photos/gone.jpg")
                .await
                .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn undecodable_stored_photo_is_skipped() {
        let (_tmp, media) = media_fixture();
        media.store("photos/bad.jpg", b"not an image at all").unwrap();
        let embedder = StubEmbedder {
            faces: vec![vec![0.1; 128]],
        };

        let result = embedding_from_stored_photo(&embedder, &media, Uuid::new_v4(), "photos/bad.jpg")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn face_free_stored_photo_is_skipped() {
        let (_tmp, media) = media_fixture();
        media.store("photos/blank.png", &tiny_png()).unwrap();
        let embedder = StubEmbedder { faces: vec![] };

        let result =
            embedding_from_stored_photo(&embedder, &media, Uuid::new_v4(), "photos/blank.png")
                .await
                .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn readable_stored_photo_yields_its_first_face() {
        let (_tmp, media) = media_fixture();
        media.store("photos/ok.png", &tiny_png()).unwrap();
        let embedder = StubEmbedder {
            faces: vec![vec![0.2; 128], vec![0.9; 128]],
        };

        let result = embedding_from_stored_photo(&embedder, &media, Uuid::new_v4(), "photos/ok.png")
            .await
            .unwrap();
        assert_eq!(result, Some(vec![0.2; 128]));
    }

    #[test]
    fn identical_embeddings_match() {
        let e = vec![0.5; 128];
        assert!(embeddings_match(&e, &e));
    }

    #[test]
    fn nearby_embeddings_match_under_default_tolerance() {
        let a = vec![0.0; 128];
        // 128 components of 0.04 -> distance ~0.452, inside 0.6
        let b = vec![0.04; 128];
        assert!(euclidean_distance(&a, &b) < DEFAULT_MATCH_TOLERANCE);
        assert!(embeddings_match(&a, &b));
    }

    #[test]
    fn distant_embeddings_do_not_match() {
        let a = vec![0.0; 128];
        // 128 components of 0.1 -> distance ~1.131, outside 0.6
        let b = vec![0.1; 128];
        assert!(euclidean_distance(&a, &b) > DEFAULT_MATCH_TOLERANCE);
        assert!(!embeddings_match(&a, &b));
    }

    #[test]
    fn dimension_mismatch_never_matches() {
        let a = vec![0.0; 128];
        let b = vec![0.0; 64];
        assert!(!embeddings_match(&a, &b));
    }

    #[test]
    fn empty_embeddings_never_match() {
        assert!(!embeddings_match(&[], &[]));
    }

    #[test]
    fn distance_is_symmetric() {
        let a = vec![0.1, 0.2, 0.3];
        let b = vec![0.4, 0.0, 0.9];
        assert!((euclidean_distance(&a, &b) - euclidean_distance(&b, &a)).abs() < 1e-12);
    }
}
