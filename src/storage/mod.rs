//! Proof-of-claim upload validation and storage.
//!
//! A file is accepted only when its declared content type AND its filename
//! extension both match the allow-list; either check alone can be spoofed.
//! Accepted files are written under the data directory with a
//! collision-resistant name; the client's filename never reaches a path.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MAX_UPLOAD_SIZE_BYTES: u64 = 5 * 1024 * 1024;

const ALLOWED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "application/pdf"];
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "pdf"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("Only JPG, PNG, GIF, and PDF files are allowed.")]
    UnsupportedType,
    #[error("File size too large. Maximum size is {0} MB.")]
    TooLarge(u64),
}

pub struct UploadStore {
    dir: PathBuf,
    max_size_bytes: u64,
}

impl UploadStore {
    /// Create the store, ensuring the uploads directory exists under the
    /// data directory (never under anything web-servable).
    pub fn new(data_dir: &Path, max_size_bytes: u64) -> Result<Self> {
        let dir = data_dir.join("uploads");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create upload directory: {}", dir.display()))?;
        Ok(Self {
            dir,
            max_size_bytes,
        })
    }

    fn extension_of(filename: &str) -> Option<String> {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    /// Check a candidate against the allow-list and the size cap.
    pub fn validate(&self, filename: &str, content_type: &str, size: u64) -> Result<(), UploadError> {
        let ext = Self::extension_of(filename).ok_or(UploadError::UnsupportedType)?;

        let type_allowed = ALLOWED_CONTENT_TYPES.contains(&content_type);
        let ext_allowed = ALLOWED_EXTENSIONS.contains(&ext.as_str());
        if !type_allowed || !ext_allowed {
            return Err(UploadError::UnsupportedType);
        }

        if size > self.max_size_bytes {
            return Err(UploadError::TooLarge(self.max_size_bytes / (1024 * 1024)));
        }

        Ok(())
    }

    /// Validate and persist an upload. Returns the stored filename: a random
    /// identifier keeping only the (validated) extension.
    pub async fn store(
        &self,
        original_filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<String, StoreError> {
        self.validate(original_filename, content_type, data.len() as u64)?;

        // validate() established the extension exists
        let ext = Self::extension_of(original_filename).unwrap_or_default();
        let stored_name = format!("{}.{}", uuid::Uuid::new_v4(), ext);
        let path = self.dir.join(&stored_name);

        tokio::fs::write(&path, data).await.map_err(StoreError::Io)?;

        tracing::debug!(stored_name = %stored_name, size = data.len(), "Stored upload");
        Ok(stored_name)
    }

    /// Resolve a stored filename to its on-disk path.
    ///
    /// Only names this store could have produced resolve; anything with path
    /// separators or dot-dot segments is refused outright.
    pub fn path_for(&self, stored_name: &str) -> Option<PathBuf> {
        if stored_name.is_empty()
            || stored_name.contains('/')
            || stored_name.contains('\\')
            || stored_name.contains("..")
        {
            return None;
        }
        let path = self.dir.join(stored_name);
        path.is_file().then_some(path)
    }

    /// Response content type for a stored file, from its extension.
    pub fn content_type_for(stored_name: &str) -> &'static str {
        match Self::extension_of(stored_name).as_deref() {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("pdf") => "application/pdf",
            _ => "application/octet-stream",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Invalid(#[from] UploadError),
    #[error("Failed to write upload to disk")]
    Io(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> UploadStore {
        UploadStore::new(dir, DEFAULT_MAX_UPLOAD_SIZE_BYTES).unwrap()
    }

    #[test]
    fn accepts_allow_listed_type_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        assert!(store.validate("receipt.pdf", "application/pdf", 1024).is_ok());
        assert!(store.validate("photo.JPG", "image/jpeg", 1024).is_ok());
        assert!(store.validate("scan.jpeg", "image/jpeg", 1024).is_ok());
    }

    #[test]
    fn rejects_when_either_check_disagrees() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        // Extension fine, declared type not
        assert_eq!(
            store.validate("receipt.pdf", "application/zip", 10),
            Err(UploadError::UnsupportedType)
        );
        // Declared type fine, extension not
        assert_eq!(
            store.validate("receipt.exe", "image/png", 10),
            Err(UploadError::UnsupportedType)
        );
        // Both wrong
        assert_eq!(
            store.validate("shell.sh", "text/x-shellscript", 10),
            Err(UploadError::UnsupportedType)
        );
        // No extension at all
        assert_eq!(
            store.validate("receipt", "application/pdf", 10),
            Err(UploadError::UnsupportedType)
        );
    }

    #[test]
    fn rejects_oversize_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path(), 1024).unwrap();

        assert!(store.validate("a.png", "image/png", 1024).is_ok());
        assert_eq!(
            store.validate("a.png", "image/png", 1025),
            Err(UploadError::TooLarge(0))
        );
    }

    #[tokio::test]
    async fn stored_files_get_random_names_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let name = store
            .store("../../etc/passwd.png", "image/png", b"fake image")
            .await
            .unwrap();
        assert!(name.ends_with(".png"));
        assert!(!name.contains("passwd"));

        let path = store.path_for(&name).expect("stored file resolves");
        assert_eq!(std::fs::read(path).unwrap(), b"fake image");
    }

    #[test]
    fn path_for_refuses_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        assert!(store.path_for("../secrets.txt").is_none());
        assert!(store.path_for("a/b.png").is_none());
        assert!(store.path_for("").is_none());
        assert!(store.path_for("missing.png").is_none());
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(UploadStore::content_type_for("a.pdf"), "application/pdf");
        assert_eq!(UploadStore::content_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(UploadStore::content_type_for("a.bin"), "application/octet-stream");
    }
}
