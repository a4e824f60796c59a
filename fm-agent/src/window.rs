//! Tolerance windows around expected arrival times.

use chrono::{Duration, NaiveDateTime};
use std::collections::HashMap;

/// Tolerances and heartbeat cadence applied to one client's expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientPolicy {
    pub lead: Duration,
    pub lag: Duration,
    pub in_progress_interval: Duration,
}

impl ClientPolicy {
    pub fn from_settings(lead_mins: u64, lag_mins: u64, in_progress_secs: u64) -> Self {
        Self {
            lead: Duration::minutes(saturating_i64(lead_mins)),
            lag: Duration::minutes(saturating_i64(lag_mins)),
            in_progress_interval: Duration::seconds(saturating_i64(in_progress_secs)),
        }
    }

    pub fn window(&self, expected: NaiveDateTime) -> ArrivalWindow {
        ArrivalWindow {
            expected,
            start: expected - self.lead,
            end: expected + self.lag,
        }
    }
}

fn saturating_i64(value: u64) -> i64 {
    // Keeps Duration construction in range for absurd configuration values.
    i64::try_from(value).unwrap_or(i64::MAX).min(1_000_000_000)
}

/// Resolves the [`ClientPolicy`] for a client, falling back to the configured defaults.
#[derive(Debug, Clone)]
pub struct WindowPolicy {
    defaults: ClientPolicy,
    clients: HashMap<String, ClientPolicy>,
}

impl WindowPolicy {
    pub fn new(defaults: ClientPolicy) -> Self {
        Self {
            defaults,
            clients: HashMap::new(),
        }
    }

    pub fn set_client(&mut self, client: String, policy: ClientPolicy) {
        self.clients.insert(client, policy);
    }

    pub fn for_client(&self, client: &str) -> &ClientPolicy {
        self.clients.get(client).unwrap_or(&self.defaults)
    }
}

/// The inclusive `[start, end]` interval around an expected arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalWindow {
    pub expected: NaiveDateTime,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ArrivalWindow {
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        self.start <= now && now <= self.end
    }

    /// Missing may only be concluded once the window has fully elapsed.
    pub fn has_elapsed(&self, now: NaiveDateTime) -> bool {
        now > self.end
    }

    /// In-window arrivals are reported against plan, out-of-window arrivals against the clock.
    pub fn received_timestamp(&self, now: NaiveDateTime) -> NaiveDateTime {
        if self.contains(now) {
            self.expected
        } else {
            now
        }
    }
}
