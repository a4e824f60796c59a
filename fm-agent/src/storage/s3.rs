use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{ObjectEntry, StorageProvider};
use crate::config::StorageConfig;

/// Lists objects through `ListObjectsV2`, following continuation tokens.
#[derive(Clone)]
pub struct S3Provider {
    client: Client,
}

impl S3Provider {
    pub async fn from_config(storage: &StorageConfig) -> Result<Self> {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(region) = storage.region.clone() {
            builder = builder.region(Region::new(region));
        }
        if let Some(url) = storage.endpoint_url.clone() {
            builder = builder.endpoint_url(url);
        }
        if storage.path_style() {
            builder = builder.force_path_style(true);
        }

        info!(
            region = storage.region.as_deref().unwrap_or("<default>"),
            endpoint = storage.endpoint_url.as_deref().unwrap_or("<aws>"),
            "configured S3 storage provider"
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }
}

#[async_trait]
impl StorageProvider for S3Provider {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let mut entries = Vec::new();
        let mut token: Option<String> = None;
        let mut pages: usize = 0;

        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(t) = token.as_deref() {
                req = req.continuation_token(t);
            }
            let resp = req
                .send()
                .await
                .with_context(|| format!("list_objects_v2 failed for s3://{bucket}/{prefix}"))?;
            pages += 1;

            for obj in resp.contents() {
                let Some(key) = obj.key() else { continue };
                let last_modified = obj
                    .last_modified()
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos()))
                    .unwrap_or_default();
                entries.push(ObjectEntry {
                    key: key.to_string(),
                    last_modified,
                });
            }

            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string());
                }
                _ => break,
            }
        }

        debug!(bucket, prefix, pages, objects = entries.len(), "listed S3 prefix");
        Ok(entries)
    }
}
