//! On-disk layout and JSON persistence.
//!
//! Each repository gets its own directory under the data dir, named by a
//! repository id derived from the root path:
//!
//! ```text
//! <data_dir>/<repo_id>/index.json       codebase index
//! <data_dir>/<repo_id>/embeddings.json  embedding store
//! <data_dir>/<repo_id>/ai-cache.json    response cache
//! ```
//!
//! Documents are pretty-printed JSON and written atomically (temp file then
//! rename). There is no file locking: two processes writing the same
//! repository id race, and the last rename wins.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Error;

/// Stable identifier for a repository root: the sanitized directory name
/// plus a short hash of the canonical path.
pub fn repository_id(root: &Path) -> String {
    let canonical = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let name: String = canonical
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "repo".to_string())
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", name, &digest[..8])
}

/// Paths of the persisted documents for one repository.
#[derive(Debug, Clone)]
pub struct RepoPaths {
    pub repo_id: String,
    pub dir: PathBuf,
}

impl RepoPaths {
    pub fn new(data_dir: &Path, repo_id: impl Into<String>) -> Self {
        let repo_id = repo_id.into();
        Self {
            dir: data_dir.join(&repo_id),
            repo_id,
        }
    }

    pub fn index(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    pub fn embeddings(&self) -> PathBuf {
        self.dir.join("embeddings.json")
    }

    pub fn cache(&self) -> PathBuf {
        self.dir.join("ai-cache.json")
    }
}

/// Serialize `value` to `path` via a sibling temp file and rename.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| Error::Storage {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|source| Error::Storage {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| Error::Storage {
            path: path.to_path_buf(),
            source,
        })?;

    debug!(path = %path.display(), bytes = json.len(), "wrote document");
    Ok(())
}

/// Read a JSON document. A missing file is `Ok(None)`. A malformed file is
/// logged and also treated as absent so the caller starts fresh.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "corrupt document, resetting to empty"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_repository_id_stable_and_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("my repo!");
        std::fs::create_dir(&root).unwrap();
        let a = repository_id(&root);
        let b = repository_id(&root);
        assert_eq!(a, b);
        assert!(a.starts_with("my_repo_-"));
        assert_eq!(a.len(), "my_repo_-".len() + 8);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/doc.json");
        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);
        write_json_atomic(&path, &value).await.unwrap();
        let back: Option<BTreeMap<String, u32>> = read_json(&path).await.unwrap();
        assert_eq!(back, Some(value));
        assert!(!dir.path().join("nested/doc.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing: Option<Vec<u8>> = read_json(&dir.path().join("none.json")).await.unwrap();
        assert!(missing.is_none());

        let corrupt = dir.path().join("bad.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        let parsed: Option<Vec<u8>> = read_json(&corrupt).await.unwrap();
        assert!(parsed.is_none());
    }
}
