use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStatus {
    Received,
    InProgress,
    CompletelyParsed,
    ErrorParsed,
    Missing,
}

impl LifecycleStatus {
    /// Value of the `status` attribute on the emitted event.
    pub fn status_label(&self) -> &'static str {
        match self {
            LifecycleStatus::Received => "Received",
            LifecycleStatus::InProgress => "In Progress",
            LifecycleStatus::CompletelyParsed => "Completely Parsed",
            LifecycleStatus::ErrorParsed => "Error while Parsing",
            LifecycleStatus::Missing => "Missing",
        }
    }

    /// Event type the monitoring dashboards aggregate on.
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleStatus::Received => "Total Received file",
            LifecycleStatus::InProgress => "Total In Progress Files",
            LifecycleStatus::CompletelyParsed => "Total Parsed Files",
            LifecycleStatus::ErrorParsed => "Total Files Error",
            LifecycleStatus::Missing => "Total Missing Files",
        }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            LifecycleStatus::Received => "received",
            LifecycleStatus::InProgress => "in_progress",
            LifecycleStatus::CompletelyParsed => "completely_parsed",
            LifecycleStatus::ErrorParsed => "error_parsed",
            LifecycleStatus::Missing => "missing",
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub status: LifecycleStatus,
    pub client: String,
    pub file_name: String,
    pub category: String,
    pub timestamp: NaiveDateTime,
}

impl LifecycleEvent {
    pub fn payload(&self) -> EventPayload {
        EventPayload {
            event_type: self.status.event_type().to_string(),
            client_name: self.client.clone(),
            status: self.status.status_label().to_string(),
            file_name: self.file_name.clone(),
            category: self.category.clone(),
            expected_time: self.timestamp.format(EVENT_TIME_FORMAT).to_string(),
        }
    }
}

/// Wire form of a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub event_type: String,
    pub client_name: String,
    pub status: String,
    pub file_name: String,
    pub category: String,
    pub expected_time: String,
}
