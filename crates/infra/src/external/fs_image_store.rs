use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use atelier_ai::{AiError, ImageStore};

/// Image store on the local filesystem; URLs are `{public_base_url}/{key}`.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys are relative paths without `..`; anything else is refused.
    fn path_for(&self, key: &str) -> Result<PathBuf, AiError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AiError::InvalidInput(format!("invalid image key {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, AiError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AiError::Transport(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AiError::Transport(format!("write {}: {e}", path.display())))?;
        tracing::debug!(key, "image stored");
        Ok(format!("{}/{key}", self.public_base_url))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, AiError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => AiError::NotFound(format!("image {key}")),
            _ => AiError::Transport(format!("read {}: {e}", path.display())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_returns_bytes_and_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path(), "/images/");

        let url = store.put("designs/p/d/front.png", vec![1, 2, 3]).await.unwrap();
        assert_eq!(url, "/images/designs/p/d/front.png");
        assert_eq!(store.get("designs/p/d/front.png").await.unwrap(), vec![1, 2, 3]);
        assert!(dir.path().join("designs/p/d/front.png").exists());
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path(), "/images");
        assert!(matches!(store.get("nope.png").await, Err(AiError::NotFound(_))));
    }

    #[tokio::test]
    async fn escaping_keys_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path(), "/images");
        for key in ["../etc/passwd", "/abs.png", "", "a/../../b.png"] {
            assert!(matches!(store.put(key, vec![0]).await, Err(AiError::InvalidInput(_))), "{key}");
        }
    }
}
