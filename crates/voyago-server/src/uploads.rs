//! Local attachment storage.
//!
//! Message attachments are written under a single uploads directory and
//! served back at `/uploads/<name>` by the router's static file service.
//! This is the default stand-in for the third-party media-storage
//! collaborator: the store records whatever URL this layer returns, so a
//! hosted provider can replace it without touching the message flow.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

/// A stored attachment file, ready to be recorded on a message.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    /// Public URL path the client fetches the bytes from.
    pub url: String,
    /// Size in bytes.
    pub size: i64,
    /// Name of the file on disk (uuid plus sanitized extension).
    pub stored_name: String,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    base_path: PathBuf,
    max_size: usize,
}

impl UploadStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::UploadStorage(format!(
                "Failed to create uploads directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Upload store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Write one uploaded attachment to disk under a fresh name.  The
    /// original file name only contributes its (sanitized) extension; the
    /// stored name is a UUID, so client input never influences the path.
    pub async fn store_upload(
        &self,
        original_name: &str,
        data: &[u8],
    ) -> Result<StoredUpload, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty attachment".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::UploadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let stored_name = match safe_extension(original_name) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        let path = self.base_path.join(&stored_name);

        fs::write(&path, data).await.map_err(|e| {
            ServerError::UploadStorage(format!("Failed to write '{}': {}", stored_name, e))
        })?;

        debug!(name = %stored_name, size = data.len(), "Stored attachment");

        Ok(StoredUpload {
            url: format!("/uploads/{stored_name}"),
            size: data.len() as i64,
            stored_name,
        })
    }

    /// Delete a previously stored attachment file.  Used to clean up when
    /// message persistence fails after its uploads were already written.
    /// Removing a name that is already gone is not an error.
    pub async fn remove(&self, stored_name: &str) -> Result<(), ServerError> {
        if stored_name.contains('/') || stored_name.contains('\\') || stored_name.contains("..") {
            return Err(ServerError::BadRequest(
                "Invalid stored attachment name".to_string(),
            ));
        }

        let path = self.base_path.join(stored_name);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(name = %stored_name, "Removed attachment");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServerError::UploadStorage(format!(
                "Failed to remove '{}': {}",
                stored_name, e
            ))),
        }
    }
}

/// Extract a filesystem-safe extension from a client-supplied file name:
/// ASCII alphanumerics only, at most 10 characters.
fn safe_extension(name: &str) -> Option<String> {
    let ext = name.rsplit_once('.')?.1;
    if ext.is_empty()
        || ext.len() > 10
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (UploadStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().to_path_buf(), 1024 * 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_keeps_extension() {
        let (store, _dir) = test_store().await;

        let stored = store.store_upload("beach.PNG", b"png-bytes").await.unwrap();
        assert!(stored.url.starts_with("/uploads/"));
        assert!(stored.stored_name.ends_with(".png"));
        assert_eq!(stored.size, 9);

        let on_disk = tokio::fs::read(store.base_path().join(&stored.stored_name))
            .await
            .unwrap();
        assert_eq!(on_disk, b"png-bytes");
    }

    #[tokio::test]
    async fn test_hostile_names_lose_their_extension() {
        let (store, _dir) = test_store().await;

        let stored = store
            .store_upload("../../etc/passwd", b"data")
            .await
            .unwrap();
        assert!(!stored.stored_name.contains('/'));
        assert!(!stored.stored_name.contains(".."));
    }

    #[tokio::test]
    async fn test_remove_deletes_the_file() {
        let (store, _dir) = test_store().await;
        let stored = store.store_upload("beach.png", b"png-bytes").await.unwrap();
        let path = store.base_path().join(&stored.stored_name);
        assert!(path.exists());

        store.remove(&stored.stored_name).await.unwrap();
        assert!(!path.exists());

        // Removing again is a no-op, not an error.
        store.remove(&stored.stored_name).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_rejects_traversal_names() {
        let (store, _dir) = test_store().await;
        assert!(store.remove("../secret").await.is_err());
        assert!(store.remove("a/b").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let (store, _dir) = test_store().await;
        assert!(store.store_upload("a.png", b"").await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path().to_path_buf(), 4).await.unwrap();
        assert!(store.store_upload("a.png", b"too-big").await.is_err());
    }

    #[test]
    fn test_safe_extension() {
        assert_eq!(safe_extension("photo.jpeg"), Some("jpeg".to_string()));
        assert_eq!(safe_extension("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(safe_extension("no-extension"), None);
        assert_eq!(safe_extension("dots.."), None);
        assert_eq!(safe_extension("weird.p/ng"), None);
    }
}
