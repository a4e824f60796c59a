//! Expected-file manifest loading and per-day resolution.
//!
//! The manifest is a CSV checklist with a header row:
//!
//! ```text
//! fileName,expectedTime,client,category
//! report_<dateToken>.csv,09:00,NCR,Transactions
//! ```
//!
//! Rows are resolved once per calendar day into [`ResolvedExpectation`]s by substituting the
//! date and month tokens and anchoring the expected time-of-day on that date.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::TrackingConfig;

const EXPECTED_TIME_FORMAT: &str = "%H:%M";

/// One row of the checklist, as written by operators.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExpectedFileSpec {
    #[serde(rename = "fileName")]
    pub name_template: String,
    #[serde(rename = "expectedTime")]
    pub expected_time: String,
    pub client: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// An expectation anchored on a concrete day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExpectation {
    pub concrete_name: String,
    pub expected_at: NaiveDateTime,
    pub client: String,
    pub category: String,
}

pub trait ManifestSource: Send + Sync {
    fn load(&self) -> Result<Vec<ExpectedFileSpec>>;
}

/// Reads the checklist from a CSV file on disk.
#[derive(Debug, Clone)]
pub struct CsvManifest {
    path: PathBuf,
}

impl CsvManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ManifestSource for CsvManifest {
    fn load(&self) -> Result<Vec<ExpectedFileSpec>> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open manifest {}", self.path.display()))?;
        parse_manifest(file)
    }
}

/// Parses checklist rows, skipping (and logging) rows that fail to deserialize.
pub fn parse_manifest<R: Read>(reader: R) -> Result<Vec<ExpectedFileSpec>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    csv_reader
        .headers()
        .context("failed to read manifest header row")?;

    let mut specs = Vec::new();
    for (idx, row) in csv_reader.deserialize::<ExpectedFileSpec>().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        match row {
            Ok(spec) if spec.name_template.is_empty() => {
                warn!(line, "skipping manifest row with empty fileName");
            }
            Ok(spec) => specs.push(spec),
            Err(err) => {
                warn!(line, error = %err, "skipping malformed manifest row");
            }
        }
    }
    Ok(specs)
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub date_token: String,
    pub month_token: String,
    pub default_category: String,
    pub skip_weekdays: Vec<Weekday>,
    pub weekend_exceptions: HashSet<String>,
}

impl ResolverSettings {
    pub fn from_config(tracking: &TrackingConfig) -> Result<Self> {
        Ok(Self {
            date_token: tracking.date_token.clone(),
            month_token: tracking.month_token.clone(),
            default_category: tracking.default_category.clone(),
            skip_weekdays: tracking.skip_weekdays()?,
            weekend_exceptions: tracking.weekend_exceptions.iter().cloned().collect(),
        })
    }
}

/// Holds the loaded checklist and caches the current day's resolution.
pub struct ManifestResolver {
    specs: Vec<ExpectedFileSpec>,
    settings: ResolverSettings,
    cache: Option<(NaiveDate, Vec<ResolvedExpectation>)>,
}

impl ManifestResolver {
    pub fn new(settings: ResolverSettings) -> Self {
        Self {
            specs: Vec::new(),
            settings,
            cache: None,
        }
    }

    pub fn with_specs(settings: ResolverSettings, specs: Vec<ExpectedFileSpec>) -> Self {
        let mut resolver = Self::new(settings);
        resolver.specs = specs;
        resolver
    }

    /// Replaces the checklist from `source`. A failed load leaves the resolver empty.
    pub fn reload(&mut self, source: &dyn ManifestSource) {
        let specs = match source.load() {
            Ok(specs) => specs,
            Err(err) => {
                let reason = format!("{err:#}");
                error!(error = %reason, "failed to load manifest; no files will be tracked");
                Vec::new()
            }
        };
        if specs != self.specs {
            info!(expected_files = specs.len(), "manifest loaded");
            self.specs = specs;
            self.cache = None;
        }
    }

    pub fn spec_count(&self) -> usize {
        self.specs.len()
    }

    /// Returns the expectations for `date`, resolving and caching them on first use.
    pub fn resolve(&mut self, date: NaiveDate) -> &[ResolvedExpectation] {
        let stale = self.cache.as_ref().map(|(day, _)| *day != date).unwrap_or(true);
        if stale {
            let resolved = resolve_specs(&self.specs, date, &self.settings);
            debug!(%date, expectations = resolved.len(), "resolved manifest for day");
            self.cache = Some((date, resolved));
        }
        self.cache
            .as_ref()
            .map(|(_, resolved)| resolved.as_slice())
            .unwrap_or(&[])
    }
}

pub fn resolve_specs(
    specs: &[ExpectedFileSpec],
    date: NaiveDate,
    settings: &ResolverSettings,
) -> Vec<ResolvedExpectation> {
    let date_value = date.format("%Y%m%d").to_string();
    let month_value = date.format("%m%d").to_string();
    let skip_day = settings.skip_weekdays.contains(&date.weekday());

    specs
        .iter()
        .filter_map(|spec| {
            let concrete_name = spec
                .name_template
                .replace(&settings.date_token, &date_value)
                .replace(&settings.month_token, &month_value);

            if skip_day && settings.weekend_exceptions.contains(&concrete_name) {
                debug!(
                    file = %concrete_name,
                    weekday = %date.weekday(),
                    "skipping weekend exception"
                );
                return None;
            }

            let parsed = NaiveTime::parse_from_str(spec.expected_time.trim(), EXPECTED_TIME_FORMAT);
            let time = match parsed {
                Ok(time) => time,
                Err(err) => {
                    warn!(
                        file = %concrete_name,
                        expected_time = %spec.expected_time,
                        error = %err,
                        "skipping expectation with unparseable expectedTime"
                    );
                    return None;
                }
            };

            let category = spec
                .category
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or(&settings.default_category)
                .to_string();

            Some(ResolvedExpectation {
                concrete_name,
                expected_at: date.and_time(time),
                client: spec.client.clone(),
                category,
            })
        })
        .collect()
}
