//! Per-cycle view of the three storage zones across every configured bucket.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::BucketConfig;
use crate::matcher::MatchKey;
use crate::metrics::STORAGE_FETCH_ERRORS_TOTAL;
use crate::storage::{ObjectEntry, StorageProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zone {
    Input,
    Archive,
    Error,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::Input, Zone::Archive, Zone::Error];

    pub fn label(&self) -> &'static str {
        match self {
            Zone::Input => "input",
            Zone::Archive => "archive",
            Zone::Error => "error",
        }
    }

    fn prefix<'a>(&self, bucket: &'a BucketConfig) -> &'a str {
        match self {
            Zone::Input => &bucket.input_prefix,
            Zone::Archive => &bucket.archive_prefix,
            Zone::Error => &bucket.error_prefix,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Object names present in each zone, unioned across buckets.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    input: BTreeMap<String, DateTime<Utc>>,
    archive: BTreeSet<String>,
    error: BTreeSet<String>,
    failed_fetches: usize,
}

impl Snapshot {
    pub fn insert(&mut self, zone: Zone, entry: &ObjectEntry) {
        let Some(name) = entry.file_name() else {
            return;
        };
        match zone {
            Zone::Input => {
                self.input.insert(name.to_string(), entry.last_modified);
            }
            Zone::Archive => {
                self.archive.insert(name.to_string());
            }
            Zone::Error => {
                self.error.insert(name.to_string());
            }
        }
    }

    pub fn record_failed_fetch(&mut self) {
        self.failed_fetches += 1;
    }

    /// False when any zone listing failed this cycle; absence of a name proves nothing then.
    pub fn is_complete(&self) -> bool {
        self.failed_fetches == 0
    }

    pub fn failed_fetches(&self) -> usize {
        self.failed_fetches
    }

    pub fn zone_len(&self, zone: Zone) -> usize {
        match zone {
            Zone::Input => self.input.len(),
            Zone::Archive => self.archive.len(),
            Zone::Error => self.error.len(),
        }
    }

    /// First input object accepted by `key`, with its last-modified time.
    pub fn input_match(&self, key: MatchKey<'_>) -> Option<(&str, DateTime<Utc>)> {
        match key {
            MatchKey::Exact(name) => self
                .input
                .get_key_value(name)
                .map(|(name, modified)| (name.as_str(), *modified)),
            MatchKey::Prefix(prefix) => self
                .input
                .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                .next()
                .filter(|(name, _)| key.accepts(name))
                .map(|(name, modified)| (name.as_str(), *modified)),
        }
    }

    pub fn has_match(&self, zone: Zone, key: MatchKey<'_>) -> bool {
        match zone {
            Zone::Input => self.input_match(key).is_some(),
            Zone::Archive => set_has_match(&self.archive, key),
            Zone::Error => set_has_match(&self.error, key),
        }
    }

    pub fn any_zone_has_match(&self, key: MatchKey<'_>) -> bool {
        Zone::ALL.iter().any(|zone| self.has_match(*zone, key))
    }
}

fn set_has_match(names: &BTreeSet<String>, key: MatchKey<'_>) -> bool {
    match key {
        MatchKey::Exact(name) => names.contains(name),
        MatchKey::Prefix(prefix) => names
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .next()
            .is_some_and(|name| key.accepts(name)),
    }
}

/// Lists every zone of every bucket concurrently and merges the results.
pub struct SnapshotCollector {
    storage: Arc<dyn StorageProvider>,
    buckets: Vec<BucketConfig>,
    list_timeout: Duration,
}

impl SnapshotCollector {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        buckets: Vec<BucketConfig>,
        list_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            buckets,
            list_timeout,
        }
    }

    /// Never fails: a zone that cannot be listed contributes nothing and marks the
    /// snapshot incomplete.
    pub async fn collect(&self) -> Snapshot {
        let fetches = self.buckets.iter().flat_map(|bucket| {
            Zone::ALL.into_iter().map(move |zone| async move {
                let prefix = zone.prefix(bucket);
                let listing =
                    timeout(self.list_timeout, self.storage.list(&bucket.name, prefix)).await;
                (bucket.name.as_str(), zone, listing)
            })
        });

        let mut snapshot = Snapshot::default();
        for (bucket, zone, listing) in join_all(fetches).await {
            match listing {
                Ok(Ok(entries)) => {
                    for entry in &entries {
                        snapshot.insert(zone, entry);
                    }
                }
                Ok(Err(err)) => {
                    STORAGE_FETCH_ERRORS_TOTAL
                        .with_label_values(&[zone.label()])
                        .inc();
                    let reason = format!("{err:#}");
                    warn!(
                        bucket,
                        %zone,
                        error = %reason,
                        "zone listing failed; treating as empty this cycle"
                    );
                    snapshot.record_failed_fetch();
                }
                Err(_) => {
                    STORAGE_FETCH_ERRORS_TOTAL
                        .with_label_values(&[zone.label()])
                        .inc();
                    warn!(
                        bucket,
                        %zone,
                        timeout_secs = self.list_timeout.as_secs(),
                        "zone listing timed out; treating as empty this cycle"
                    );
                    snapshot.record_failed_fetch();
                }
            }
        }

        debug!(
            input = snapshot.zone_len(Zone::Input),
            archive = snapshot.zone_len(Zone::Archive),
            error = snapshot.zone_len(Zone::Error),
            failed_fetches = snapshot.failed_fetches(),
            "collected storage snapshot"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn entry(key: &str) -> ObjectEntry {
        ObjectEntry {
            key: key.to_string(),
            last_modified: DateTime::<Utc>::from_timestamp(1_704_268_800, 0).unwrap(),
        }
    }

    fn bucket(name: &str) -> BucketConfig {
        BucketConfig {
            name: name.to_string(),
            input_prefix: "in/".to_string(),
            archive_prefix: "done/".to_string(),
            error_prefix: "failed/".to_string(),
        }
    }

    struct StaticStorage {
        listings: HashMap<(String, String), Vec<ObjectEntry>>,
    }

    #[async_trait]
    impl StorageProvider for StaticStorage {
        async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>> {
            if bucket == "broken" {
                anyhow::bail!("access denied");
            }
            Ok(self
                .listings
                .get(&(bucket.to_string(), prefix.to_string()))
                .cloned()
                .unwrap_or_default())
        }
    }

    #[test]
    fn prefix_lookup_uses_ordered_range() {
        let mut snapshot = Snapshot::default();
        snapshot.insert(Zone::Input, &entry("in/Dslwd_part2.csv"));
        snapshot.insert(Zone::Input, &entry("in/report.csv"));
        snapshot.insert(Zone::Archive, &entry("done/PdClm_x.csv"));

        assert_eq!(
            snapshot.input_match(MatchKey::Prefix("Dslwd")).map(|(n, _)| n),
            Some("Dslwd_part2.csv")
        );
        assert!(snapshot.input_match(MatchKey::Prefix("Dslwe")).is_none());
        assert!(snapshot.has_match(Zone::Archive, MatchKey::Prefix("PdClm")));
        assert!(!snapshot.has_match(Zone::Error, MatchKey::Prefix("PdClm")));
        assert!(snapshot.any_zone_has_match(MatchKey::Exact("report.csv")));
        assert!(!snapshot.any_zone_has_match(MatchKey::Exact("report")));
    }

    #[test]
    fn directory_markers_are_ignored() {
        let mut snapshot = Snapshot::default();
        snapshot.insert(Zone::Input, &entry("in/"));
        assert_eq!(snapshot.zone_len(Zone::Input), 0);
    }

    #[tokio::test]
    async fn collect_unions_buckets_and_flags_failures() {
        let mut listings = HashMap::new();
        listings.insert(
            ("ncr".to_string(), "in/".to_string()),
            vec![entry("in/a.csv")],
        );
        listings.insert(
            ("till".to_string(), "done/".to_string()),
            vec![entry("done/b.csv")],
        );
        let storage = Arc::new(StaticStorage { listings });

        let healthy = SnapshotCollector::new(
            storage.clone(),
            vec![bucket("ncr"), bucket("till")],
            Duration::from_secs(5),
        )
        .collect()
        .await;
        assert!(healthy.is_complete());
        assert!(healthy.has_match(Zone::Input, MatchKey::Exact("a.csv")));
        assert!(healthy.has_match(Zone::Archive, MatchKey::Exact("b.csv")));

        let degraded = SnapshotCollector::new(
            storage,
            vec![bucket("ncr"), bucket("broken")],
            Duration::from_secs(5),
        )
        .collect()
        .await;
        assert!(!degraded.is_complete());
        assert_eq!(degraded.failed_fetches(), 3);
        assert!(degraded.has_match(Zone::Input, MatchKey::Exact("a.csv")));
    }
}
