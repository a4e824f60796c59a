use anyhow::{Context, Result};
use chrono::Weekday;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::matcher::FamilyRule;
use crate::window::{ClientPolicy, WindowPolicy};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub buckets: Vec<BucketConfig>,
    #[serde(default)]
    pub tracking: TrackingConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ManifestConfig {
    pub path: String,
    /// Re-read the manifest at the start of every cycle instead of once at startup.
    #[serde(default)]
    pub reload_every_cycle: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom S3 endpoint (MinIO, LocalStack). Implies path-style addressing unless overridden.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: Option<bool>,
    /// Root directory for the `local` backend; each bucket is a sub-directory.
    #[serde(default)]
    pub local_root: Option<String>,
    #[serde(default = "default_list_timeout_secs")]
    pub list_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            region: None,
            endpoint_url: None,
            force_path_style: None,
            local_root: None,
            list_timeout_secs: DEFAULT_LIST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BucketConfig {
    pub name: String,
    pub input_prefix: String,
    pub archive_prefix: String,
    pub error_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    #[serde(default = "default_tolerance_mins")]
    pub lead_tolerance_mins: u64,
    #[serde(default = "default_tolerance_mins")]
    pub lag_tolerance_mins: u64,
    #[serde(default = "default_in_progress_check_interval_secs")]
    pub in_progress_check_interval_secs: u64,
    #[serde(default = "default_skip_weekdays")]
    pub skip_weekdays: Vec<String>,
    #[serde(default = "default_weekend_exceptions")]
    pub weekend_exceptions: Vec<String>,
    #[serde(default = "default_date_token")]
    pub date_token: String,
    #[serde(default = "default_month_token")]
    pub month_token: String,
    #[serde(default = "default_category")]
    pub default_category: String,
    #[serde(default = "default_families")]
    pub families: Vec<FamilyRule>,
    #[serde(default)]
    pub clients: Vec<ClientOverride>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            lead_tolerance_mins: DEFAULT_TOLERANCE_MINS,
            lag_tolerance_mins: DEFAULT_TOLERANCE_MINS,
            in_progress_check_interval_secs: DEFAULT_IN_PROGRESS_CHECK_INTERVAL_SECS,
            skip_weekdays: default_skip_weekdays(),
            weekend_exceptions: default_weekend_exceptions(),
            date_token: default_date_token(),
            month_token: default_month_token(),
            default_category: default_category(),
            families: default_families(),
            clients: Vec::new(),
        }
    }
}

/// Per-client override of the tracking defaults; unset fields inherit from `[tracking]`.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientOverride {
    pub name: String,
    #[serde(default)]
    pub lead_tolerance_mins: Option<u64>,
    #[serde(default)]
    pub lag_tolerance_mins: Option<u64>,
    #[serde(default)]
    pub in_progress_check_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    /// New Relic account that receives custom events.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Falls back to the `NEW_RELIC_API_KEY` environment variable when unset.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_insights_base_url")]
    pub insights_base_url: String,
    /// Write events as JSON files instead of posting them.
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default = "default_emit_delay_ms")]
    pub emit_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub listen_addr: Option<String>,
}

pub const API_KEY_ENV: &str = "NEW_RELIC_API_KEY";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_LIST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TOLERANCE_MINS: u64 = 15;
const DEFAULT_IN_PROGRESS_CHECK_INTERVAL_SECS: u64 = 150;
const DEFAULT_EMIT_DELAY_MS: u64 = 2_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_INSIGHTS_BASE_URL: &str = "https://insights-collector.newrelic.com";

const DEFAULT_FAMILY_PREFIXES: [&str; 6] = [
    "DslwdClms_TillPymts_Dly_",
    "PdClms_TillPymts_Dly_",
    "EntrdClms_TillPymts_Dly_",
    "ILF_TillPymts_Dly_",
    "Trans_TillPymts_Dly_",
    "Enrlmnts_TillPymts_Dly_",
];

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_list_timeout_secs() -> u64 {
    DEFAULT_LIST_TIMEOUT_SECS
}

fn default_tolerance_mins() -> u64 {
    DEFAULT_TOLERANCE_MINS
}

fn default_in_progress_check_interval_secs() -> u64 {
    DEFAULT_IN_PROGRESS_CHECK_INTERVAL_SECS
}

fn default_skip_weekdays() -> Vec<String> {
    vec!["Mon".to_string(), "Sun".to_string()]
}

fn default_weekend_exceptions() -> Vec<String> {
    vec!["moare-ach-".to_string(), "moare-merchant-".to_string()]
}

fn default_date_token() -> String {
    "<dateToken>".to_string()
}

fn default_month_token() -> String {
    "<monthToken>".to_string()
}

fn default_category() -> String {
    "General".to_string()
}

fn default_families() -> Vec<FamilyRule> {
    DEFAULT_FAMILY_PREFIXES
        .iter()
        .map(|prefix| FamilyRule::new(*prefix))
        .collect()
}

fn default_insights_base_url() -> String {
    DEFAULT_INSIGHTS_BASE_URL.to_string()
}

fn default_emit_delay_ms() -> u64 {
    DEFAULT_EMIT_DELAY_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.buckets.is_empty() {
            anyhow::bail!("at least one [[buckets]] entry is required");
        }
        if self.agent.poll_interval_secs == 0 {
            anyhow::bail!("agent.poll_interval_secs must be greater than zero");
        }
        if self.storage.backend == StorageBackend::Local && self.storage.local_root.is_none() {
            anyhow::bail!("storage.local_root is required for the local backend");
        }
        self.tracking.skip_weekdays()?;
        for (field, token) in [
            ("date_token", &self.tracking.date_token),
            ("month_token", &self.tracking.month_token),
        ] {
            if token.trim().is_empty() {
                anyhow::bail!("tracking.{field} must not be empty");
            }
        }

        let mut seen_clients = HashSet::new();
        for client in &self.tracking.clients {
            if !seen_clients.insert(client.name.as_str()) {
                anyhow::bail!("duplicate tracking client override for {}", client.name);
            }
        }
        if let Some(rule) = self.tracking.families.iter().find(|rule| rule.match_len == 0) {
            anyhow::bail!("family rule {} has match_len 0", rule.prefix);
        }

        let has_account = non_blank(self.sink.account_id.as_deref());
        let has_output_dir = non_blank(self.sink.output_dir.as_deref());

        match (has_account, has_output_dir) {
            (true, false) | (false, true) => {}
            (true, true) => {
                anyhow::bail!("sink configuration must set only one of account_id or output_dir")
            }
            (false, false) => {
                anyhow::bail!("sink configuration requires either account_id or output_dir")
            }
        }

        if let Some(addr) = self.metrics.listen_addr.as_deref() {
            addr.parse::<SocketAddr>()
                .with_context(|| format!("invalid metrics.listen_addr {addr}"))?;
        }
        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        expand_path(&self.manifest.path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.agent.poll_interval_secs)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.list_timeout_secs)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics
            .listen_addr
            .as_deref()
            .and_then(|addr| addr.parse().ok())
    }

    pub fn window_policy(&self) -> WindowPolicy {
        let tracking = &self.tracking;
        let defaults = ClientPolicy::from_settings(
            tracking.lead_tolerance_mins,
            tracking.lag_tolerance_mins,
            tracking.in_progress_check_interval_secs,
        );
        let mut policy = WindowPolicy::new(defaults);
        for client in &tracking.clients {
            policy.set_client(
                client.name.clone(),
                ClientPolicy::from_settings(
                    client.lead_tolerance_mins.unwrap_or(tracking.lead_tolerance_mins),
                    client.lag_tolerance_mins.unwrap_or(tracking.lag_tolerance_mins),
                    client
                        .in_progress_check_interval_secs
                        .unwrap_or(tracking.in_progress_check_interval_secs),
                ),
            );
        }
        policy
    }
}

impl StorageConfig {
    pub fn local_root_path(&self) -> Option<PathBuf> {
        self.local_root.as_deref().map(expand_path)
    }

    pub fn path_style(&self) -> bool {
        self.force_path_style
            .unwrap_or_else(|| self.endpoint_url.is_some())
    }
}

impl TrackingConfig {
    pub fn skip_weekdays(&self) -> Result<Vec<Weekday>> {
        self.skip_weekdays
            .iter()
            .map(|day| {
                day.trim()
                    .parse::<Weekday>()
                    .map_err(|_| anyhow::anyhow!("unknown weekday {day:?} in skip_weekdays"))
            })
            .collect()
    }
}

impl SinkConfig {
    pub fn output_dir_path(&self) -> Option<PathBuf> {
        self.output_dir
            .as_deref()
            .filter(|dir| !dir.trim().is_empty())
            .map(expand_path)
    }

    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.trim().to_string());
        }
        std::env::var(API_KEY_ENV)
            .map(|key| key.trim().to_string())
            .with_context(|| format!("sink.api_key is unset and {API_KEY_ENV} is not defined"))
    }

    pub fn emit_delay(&self) -> Duration {
        Duration::from_millis(self.emit_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn non_blank(value: Option<&str>) -> bool {
    value.map(|s| !s.trim().is_empty()).unwrap_or(false)
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}
