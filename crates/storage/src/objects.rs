use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

use crate::error::StorageError;

/// SHA-256 of `data` as 64 lowercase hex characters.
pub fn content_hash(data: &[u8]) -> String {
    let digest: [u8; 32] = Sha256::digest(data).into();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Raw uploaded statement files, content-addressed under one directory.
///
/// Layout: `<root>/<owner>/<sha256>.<ext>`. The returned location is relative to
/// the root so it can be stored on the statement row.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative location, refusing anything that could escape the root.
    fn resolve(&self, location: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(location);
        let safe = !location.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidLocation(location.to_string()));
        }
        Ok(self.root.join(relative))
    }

    pub async fn put(&self, owner: &str, data: &[u8], ext: &str) -> Result<String, StorageError> {
        let ext = ext.trim_start_matches('.');
        let location = format!("{owner}/{}.{ext}", content_hash(data));
        let path = self.resolve(&location)?;
        // Owner must be a single path segment.
        if Path::new(owner).components().count() != 1 {
            return Err(StorageError::InvalidLocation(location));
        }

        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(%location, "object already stored");
            return Ok(location);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write beside the target and rename so a reader never sees a partial file.
        let tmp = path.with_extension(format!("{ext}.tmp"));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::info!(%location, bytes = data.len(), "stored object");
        Ok(location)
    }

    pub async fn fetch(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(location)?;
        Ok(tokio::fs::read(path).await?)
    }
}
