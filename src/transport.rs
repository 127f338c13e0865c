//! Downstream hand-off of optimized bytes.
//!
//! The pipeline itself never persists anything. Whatever stores the result
//! (object storage, a CDN upload, a local directory) implements [`AssetSink`]
//! and returns a URL the stored asset can be retrieved from. Bytes are handed
//! over unchanged.

use crate::types::EncodedAsset;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid asset name: {0}")]
    InvalidName(String),
}

/// Where a stored asset ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    /// Retrievable location of the asset.
    pub url: String,
    /// Name relative to the sink's root.
    pub name: String,
}

/// Destination for optimized assets.
pub trait AssetSink: Sync {
    /// Store `asset` under `name`, replacing anything already there.
    fn store(&self, name: &str, asset: &EncodedAsset) -> Result<StoredAsset, TransportError>;
}

/// Sink that writes into a local directory and returns `file://` URLs.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Reject names that would escape the root directory.
    fn resolve(&self, name: &str) -> Result<PathBuf, TransportError> {
        let relative = Path::new(name);
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)));
        if name.is_empty() || escapes {
            return Err(TransportError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl AssetSink for DirectorySink {
    fn store(&self, name: &str, asset: &EncodedAsset) -> Result<StoredAsset, TransportError> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &asset.bytes)?;

        let absolute = std::fs::canonicalize(&path)?;
        Ok(StoredAsset {
            url: format!("file://{}", absolute.display()),
            name: name.to_string(),
        })
    }
}
