use super::{BlobStore, Container};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Blob store backed by the local filesystem.
///
/// Layout: `{root}/{container}/{blob name}`. Containers are created lazily.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root and every container directory.
    pub async fn ensure_layout(&self) -> Result<()> {
        for container in Container::ALL {
            tokio::fs::create_dir_all(self.root.join(container.name())).await?;
        }
        Ok(())
    }

    fn blob_path(&self, container: Container, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AppError::InvalidInput(format!(
                "Invalid blob name: '{}'",
                name
            )));
        }
        Ok(self.root.join(container.name()).join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn download(&self, container: Container, name: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(container, name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("{}/{}", container, name)))
            }
            Err(e) => Err(AppError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn upload(&self, container: Container, name: &str, data: Vec<u8>) -> Result<()> {
        let path = self.blob_path(container, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a sibling temp file first so readers never see a partial blob
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(container = %container, name, bytes = data.len(), "Uploaded blob");
        Ok(())
    }

    async fn list(&self, container: Container) -> Result<Vec<String>> {
        let dir = self.root.join(container.name());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.ends_with(".partial") {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, container: Container, name: &str) -> Result<bool> {
        let path = self.blob_path(container, name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, container: Container, name: &str) -> Result<bool> {
        let path = self.blob_path(container, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_download_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        store
            .upload(Container::ChunkedDicts, "doc.json", b"v1".to_vec())
            .await
            .unwrap();
        store
            .upload(Container::ChunkedDicts, "doc.json", b"v2".to_vec())
            .await
            .unwrap();

        let data = store
            .download(Container::ChunkedDicts, "doc.json")
            .await
            .unwrap();
        assert_eq!(data, b"v2");
        assert!(dir.path().join("chunked-dicts").join("doc.json").exists());
    }

    #[tokio::test]
    async fn test_list_missing_container_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(store.list(Container::RawPdfs).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let err = store
            .download(Container::RawPdfs, "../secrets.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        store.ensure_layout().await.unwrap();

        store
            .upload(Container::RawPdfs, "a.pdf", b"%PDF".to_vec())
            .await
            .unwrap();
        assert!(store.exists(Container::RawPdfs, "a.pdf").await.unwrap());
        assert!(store.delete(Container::RawPdfs, "a.pdf").await.unwrap());
        assert!(!store.exists(Container::RawPdfs, "a.pdf").await.unwrap());
        assert!(!store.delete(Container::RawPdfs, "a.pdf").await.unwrap());
    }
}
