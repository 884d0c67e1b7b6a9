use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::backends::BlobStore;

// -- 📂 DirectoryBlobStoreConfig: "it's just a folder", said no sysadmin ever before the disk filled up.
#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryBlobStoreConfig {
    /// 📂 Root directory. Created on startup if it doesn't exist.
    #[serde(default = "default_directory")]
    pub directory: String,
    /// 🏷️ Sub-folder every key lives under. `None` puts keys straight into `directory`.
    #[serde(default = "default_prefix")]
    pub prefix: Option<String>,
}

fn default_directory() -> String {
    "./tmp".to_string()
}

fn default_prefix() -> Option<String> {
    Some("doc-files".to_string())
}

impl Default for DirectoryBlobStoreConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            prefix: default_prefix(),
        }
    }
}

/// 🪣 A bucket made of a folder. One file per key.
///
/// Writes land in a hidden temp file first and are renamed into place, so a reader
/// sees either the old content, the new content, or nothing. Never half.
#[derive(Debug)]
pub struct DirectoryBlobStore {
    root: PathBuf,
}

impl DirectoryBlobStore {
    /// 🚀 Make sure the folder exists and hand back a store pointed at it.
    pub async fn new(config: DirectoryBlobStoreConfig) -> Result<Self> {
        let mut root = PathBuf::from(&config.directory);
        if let Some(prefix) = config.prefix.as_deref().filter(|p| !p.is_empty()) {
            root.push(prefix);
        }
        fs::create_dir_all(&root).await.with_context(|| {
            format!(
                "💀 Could not create blob directory '{}'. We stared at the path. The path stared back. \
                 One of us was wrong about the permissions.",
                root.display()
            )
        })?;
        debug!(root = %root.display(), "📂 directory blob store ready");
        Ok(Self { root })
    }

    // -- 🔒 keys are job ids in practice; anything that could walk out of the folder is refused
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key == "."
            || key == ".."
            || key.starts_with('.')
            || key.contains(['/', '\\'])
        {
            bail!("💀 blob key '{key}' is not a plain file name. No slashes, no dots up front, no escape attempts.");
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for DirectoryBlobStore {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<u64> {
        let target = self.path_for(key)?;
        let temp = self.root.join(format!(".{key}.{}.tmp", Uuid::new_v4()));

        fs::write(&temp, bytes)
            .await
            .with_context(|| format!("💀 failed to write blob '{key}' to '{}'", temp.display()))?;
        if let Err(err) = fs::rename(&temp, &target).await {
            // -- 🧹 don't leave the half-baked temp lying around
            let _ = fs::remove_file(&temp).await;
            return Err(err).with_context(|| {
                format!("💀 failed to move blob '{key}' into place at '{}'", target.display())
            });
        }
        trace!(key, bytes = bytes.len(), "📂 blob written");
        Ok(bytes.len() as u64)
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).await.with_context(|| {
            format!(
                "💀 The door to blob '{}' would not budge. It may not exist, or it may not like us.",
                path.display()
            )
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("💀 failed to delete blob at '{}'", path.display()))
            }
        }
    }

    async fn is_accessible(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}
