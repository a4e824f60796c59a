//! Application runner modules for the fm-agent.
//!
//! Builds the storage provider, event sink and monitoring agent from configuration.

pub mod poll_mode;

use crate::agent::MonitorAgent;
use crate::config::{Config, StorageBackend};
use crate::emitter::EventEmitter;
use crate::insights_client::InsightsClient;
use crate::manifest::{CsvManifest, ManifestResolver, ResolverSettings};
use crate::matcher::NameMatcher;
use crate::output_writer::{EventSink, FileWriter};
use crate::snapshot::SnapshotCollector;
use crate::storage::{LocalDirProvider, S3Provider, StorageProvider};
use crate::tracker::Reconciler;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Build the appropriate event sink based on configuration.
///
/// Returns either an InsightsClient (New Relic) or FileWriter (for local output).
pub fn build_event_sink(config: &Config) -> Result<Arc<dyn EventSink>> {
    if let Some(account_id) = config
        .sink
        .account_id
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        let api_key = config.sink.resolve_api_key()?;
        let client = InsightsClient::new(
            &config.sink.insights_base_url,
            &account_id,
            &api_key,
            config.sink.request_timeout(),
        )?;

        info!(
            account_id = %account_id,
            url = %client.events_url(),
            "configured New Relic event sink"
        );

        Ok(Arc::new(client))
    } else {
        let output_dir = config
            .sink
            .output_dir_path()
            .context("sink.output_dir is required when sink.account_id is unset")?;

        info!(
            output_dir = %output_dir.display(),
            "configured local file output sink"
        );

        Ok(Arc::new(FileWriter::new(output_dir)))
    }
}

pub async fn build_storage_provider(config: &Config) -> Result<Arc<dyn StorageProvider>> {
    match config.storage.backend {
        StorageBackend::S3 => {
            let provider = S3Provider::from_config(&config.storage)
                .await
                .context("failed to configure S3 storage provider")?;
            Ok(Arc::new(provider))
        }
        StorageBackend::Local => {
            let root = config
                .storage
                .local_root_path()
                .context("storage.local_root is required for the local backend")?;
            info!(root = %root.display(), "configured local storage provider");
            Ok(Arc::new(LocalDirProvider::new(root)))
        }
    }
}

/// Wire the full monitoring agent. The manifest is loaded once here; with
/// `manifest.reload_every_cycle` it is re-read before every cycle as well.
pub async fn build_agent(config: &Config, cancel_token: CancellationToken) -> Result<MonitorAgent> {
    let storage = build_storage_provider(config).await?;
    let sink = build_event_sink(config)?;

    let collector = SnapshotCollector::new(storage, config.buckets.clone(), config.list_timeout());

    let manifest = Arc::new(CsvManifest::new(config.manifest_path()));
    let mut resolver = ManifestResolver::new(ResolverSettings::from_config(&config.tracking)?);
    resolver.reload(manifest.as_ref());
    info!(
        manifest = %manifest.path().display(),
        expected_files = resolver.spec_count(),
        "manifest ready"
    );

    let reconciler = Reconciler::new(
        NameMatcher::new(config.tracking.families.clone()),
        config.window_policy(),
    );
    let emitter = EventEmitter::new(sink, config.sink.emit_delay(), cancel_token);

    let agent = MonitorAgent::new(collector, resolver, reconciler, emitter);
    if config.manifest.reload_every_cycle {
        Ok(agent.reload_each_cycle(manifest))
    } else {
        Ok(agent)
    }
}
