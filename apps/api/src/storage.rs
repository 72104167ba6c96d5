//! Media storage — profile photos and resume files on the local filesystem.
//!
//! Files are written atomically (temp file in the target directory, then
//! persist) so a crashed upload never leaves a half-written file behind a
//! live database row. Paths stored in the database are relative to the
//! media root.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create media root {}", root.display()))?;
        Ok(Self { root })
    }

    /// Relative path for a profile photo. Each upload gets a fresh name,
    /// so a replacement never clobbers the photo a live row points at;
    /// the superseded file is removed once the row is updated.
    pub fn photo_rel_path(user_id: Uuid, upload_id: Uuid, ext: &str) -> String {
        format!("photos/{user_id}-{upload_id}.{ext}")
    }

    /// Relative path for a user's resume. The original filename lives in
    /// the database, not on disk.
    pub fn resume_rel_path(user_id: Uuid) -> String {
        format!("resumes/{user_id}")
    }

    pub fn store(&self, rel_path: &str, bytes: &[u8]) -> Result<(), AppError> {
        let target = self.root.join(rel_path);
        let parent = target
            .parent()
            .ok_or_else(|| AppError::Storage(format!("{rel_path} has no parent directory")))?;
        fs::create_dir_all(parent)
            .map_err(|e| AppError::Storage(format!("creating {}: {e}", parent.display())))?;

        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|e| AppError::Storage(format!("creating temp file for {rel_path}: {e}")))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.flush())
            .map_err(|e| AppError::Storage(format!("writing {rel_path}: {e}")))?;
        tmp.persist(&target)
            .map_err(|e| AppError::Storage(format!("persisting {rel_path}: {}", e.error)))?;
        Ok(())
    }

    pub fn read(&self, rel_path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.root.join(rel_path))
    }

    /// Best-effort removal; a missing file is not an error. Failures are
    /// logged and swallowed so cleanup never fails a request.
    pub fn remove(&self, rel_path: &str) {
        let target = self.root.join(rel_path);
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("failed to remove media file {}: {e}", target.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn store_then_read_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = MediaStore::new(tmp.path()).unwrap();

        let rel = MediaStore::photo_rel_path(Uuid::new_v4(), Uuid::new_v4(), "jpg");
        store.store(&rel, b"jpeg bytes").unwrap();

        assert_eq!(store.read(&rel).unwrap(), b"jpeg bytes");
    }

    #[test]
    fn photo_uploads_get_distinct_paths_and_do_not_clobber() {
        let tmp = TempDir::new().unwrap();
        let store = MediaStore::new(tmp.path()).unwrap();
        let user_id = Uuid::new_v4();

        let first = MediaStore::photo_rel_path(user_id, Uuid::new_v4(), "jpg");
        let second = MediaStore::photo_rel_path(user_id, Uuid::new_v4(), "jpg");
        assert_ne!(first, second);

        store.store(&first, b"current photo").unwrap();
        store.store(&second, b"replacement").unwrap();

        // The file referenced by the live row survives until cleanup.
        assert_eq!(store.read(&first).unwrap(), b"current photo");
        assert_eq!(store.read(&second).unwrap(), b"replacement");
    }

    #[test]
    fn store_overwrites_existing_file() {
        let tmp = TempDir::new().unwrap();
        let store = MediaStore::new(tmp.path()).unwrap();
        let rel = MediaStore::resume_rel_path(Uuid::new_v4());

        store.store(&rel, b"first").unwrap();
        store.store(&rel, b"second").unwrap();

        assert_eq!(store.read(&rel).unwrap(), b"second");
    }

    #[test]
    fn read_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = MediaStore::new(tmp.path()).unwrap();

        let err = store.read("resumes/nope").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn remove_missing_file_is_silent() {
        let tmp = TempDir::new().unwrap();
        let store = MediaStore::new(tmp.path()).unwrap();
        store.remove("photos/missing.jpg");
    }
}
