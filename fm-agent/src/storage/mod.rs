//! Object-storage listing backends.

pub mod local;
pub mod s3;

pub use local::LocalDirProvider;
pub use s3::S3Provider;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One listed object, keyed by its full object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

impl ObjectEntry {
    /// Final path segment of the key; `None` for directory markers.
    pub fn file_name(&self) -> Option<&str> {
        let name = self.key.rsplit('/').next().unwrap_or(&self.key);
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Lists every object under `prefix` in `bucket`. An absent prefix is an empty listing.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>>;
}
