//! Directory-backed storage, laid out as `<root>/<bucket>/<key>`.
//!
//! Used for dry runs against a copy of the bucket layout and for tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

use super::{ObjectEntry, StorageProvider};

#[derive(Debug, Clone)]
pub struct LocalDirProvider {
    root: Arc<PathBuf>,
}

impl LocalDirProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }
}

#[async_trait]
impl StorageProvider for LocalDirProvider {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let bucket_root = self.root.join(bucket);
        let prefix = prefix.to_string();
        task::spawn_blocking(move || list_blocking(&bucket_root, &prefix))
            .await
            .context("local listing join error")?
    }
}

fn list_blocking(bucket_root: &Path, prefix: &str) -> Result<Vec<ObjectEntry>> {
    // Walk only the directory part of the prefix, then filter on the full prefix like S3 does.
    let dir_part = match prefix.rfind('/') {
        Some(idx) => &prefix[..=idx],
        None => "",
    };
    let start = bucket_root.join(dir_part);
    let mut entries = Vec::new();
    if !start.is_dir() {
        return Ok(entries);
    }
    collect_objects(&start, dir_part, &mut entries)?;
    entries.retain(|entry| entry.key.starts_with(prefix));
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

fn collect_objects(dir: &Path, key_prefix: &str, entries: &mut Vec<ObjectEntry>) -> Result<()> {
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to read metadata for {}", entry.path().display()))?;

        if metadata.is_dir() {
            collect_objects(&entry.path(), &format!("{key_prefix}{name}/"), entries)?;
        } else if metadata.is_file() {
            let last_modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default();
            entries.push(ObjectEntry {
                key: format!("{key_prefix}{name}"),
                last_modified,
            });
        }
    }
    Ok(())
}
