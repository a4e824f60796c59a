//! Per-day lifecycle tracking of expected files.
//!
//! The [`Reconciler`] is fed one storage [`Snapshot`] per cycle together with the day's
//! resolved expectations and returns the lifecycle events that newly occurred, in emission
//! order. All state is in memory and is reset when the calendar day changes.
//!
//! Per concrete name and day the lifecycle is
//! `Unseen -> Received -> InProgress* -> CompletelyParsed | ErrorParsed`, with a single-shot
//! `Missing` signal for names still unseen once their tolerance window has closed.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::event::{LifecycleEvent, LifecycleStatus};
use crate::manifest::ResolvedExpectation;
use crate::matcher::NameMatcher;
use crate::snapshot::{Snapshot, Zone};
use crate::window::{ArrivalWindow, WindowPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    Received,
    InProgress,
}

#[derive(Debug, Clone)]
pub struct TrackingEntry {
    pub concrete_name: String,
    pub client: String,
    pub category: String,
    pub status: TrackingStatus,
    pub received_at: NaiveDateTime,
    /// Last-modified time of the input object that satisfied the expectation.
    pub last_modified: DateTime<Utc>,
    pub last_progress_notified_at: Option<NaiveDateTime>,
    pub in_progress_interval: Duration,
}

impl TrackingEntry {
    fn progress_due(&self, now: NaiveDateTime) -> bool {
        match self.last_progress_notified_at {
            None => true,
            Some(last) => now - last >= self.in_progress_interval,
        }
    }

    fn event(&self, status: LifecycleStatus, timestamp: NaiveDateTime) -> LifecycleEvent {
        LifecycleEvent {
            status,
            client: self.client.clone(),
            file_name: self.concrete_name.clone(),
            category: self.category.clone(),
            timestamp,
        }
    }
}

pub struct Reconciler {
    matcher: NameMatcher,
    policy: WindowPolicy,
    day: Option<NaiveDate>,
    /// Active entries, keyed by concrete expected name.
    tracked: BTreeMap<String, TrackingEntry>,
    /// Names announced as Received today, including those already terminal.
    settled: HashSet<String>,
    missing_candidates: HashSet<String>,
}

impl Reconciler {
    pub fn new(matcher: NameMatcher, policy: WindowPolicy) -> Self {
        Self {
            matcher,
            policy,
            day: None,
            tracked: BTreeMap::new(),
            settled: HashSet::new(),
            missing_candidates: HashSet::new(),
        }
    }

    pub fn tracked(&self) -> impl Iterator<Item = &TrackingEntry> {
        self.tracked.values()
    }

    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    pub fn missing_candidate_len(&self) -> usize {
        self.missing_candidates.len()
    }

    /// Runs one reconciliation pass and returns the events to emit, in order.
    pub fn reconcile(
        &mut self,
        now: NaiveDateTime,
        expectations: &[ResolvedExpectation],
        snapshot: &Snapshot,
    ) -> Vec<LifecycleEvent> {
        self.roll_day(now.date());

        let mut events = Vec::new();
        for expectation in expectations {
            self.evaluate_arrival(now, expectation, snapshot, &mut events);
        }
        self.evaluate_progress(now, snapshot, &mut events);
        self.evaluate_outcomes(now, snapshot, &mut events);
        events
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.day == Some(today) {
            return;
        }
        if let Some(previous) = self.day {
            if !self.tracked.is_empty() {
                let unfinished: Vec<&str> = self.tracked.keys().map(String::as_str).collect();
                info!(
                    %previous,
                    %today,
                    unfinished = ?unfinished,
                    "day changed; dropping files still in flight"
                );
            } else {
                debug!(%previous, %today, "day changed; resetting tracking state");
            }
        }
        self.tracked.clear();
        self.settled.clear();
        self.missing_candidates.clear();
        self.day = Some(today);
    }

    fn evaluate_arrival(
        &mut self,
        now: NaiveDateTime,
        expectation: &ResolvedExpectation,
        snapshot: &Snapshot,
        events: &mut Vec<LifecycleEvent>,
    ) {
        let name = expectation.concrete_name.as_str();
        let client_policy = *self.policy.for_client(&expectation.client);
        let window = client_policy.window(expectation.expected_at);
        let key = self.matcher.key(name);

        match snapshot.input_match(key) {
            Some((object, last_modified)) => {
                if !self.settled.contains(name) {
                    let entry = TrackingEntry {
                        concrete_name: name.to_string(),
                        client: expectation.client.clone(),
                        category: expectation.category.clone(),
                        status: TrackingStatus::Received,
                        received_at: now,
                        last_modified,
                        last_progress_notified_at: None,
                        in_progress_interval: client_policy.in_progress_interval,
                    };
                    let timestamp = window.received_timestamp(now);
                    info!(
                        file = name,
                        object,
                        last_modified = %last_modified,
                        in_window = window.contains(now),
                        "expected file received"
                    );
                    events.push(entry.event(LifecycleStatus::Received, timestamp));
                    self.settled.insert(name.to_string());
                    self.tracked.insert(name.to_string(), entry);
                }
                self.missing_candidates.remove(name);
            }
            None => {
                if window.contains(now) && !self.settled.contains(name) {
                    self.missing_candidates.insert(name.to_string());
                }
            }
        }

        self.evaluate_missing(now, expectation, &window, snapshot, events);
    }

    fn evaluate_missing(
        &mut self,
        now: NaiveDateTime,
        expectation: &ResolvedExpectation,
        window: &ArrivalWindow,
        snapshot: &Snapshot,
        events: &mut Vec<LifecycleEvent>,
    ) {
        let name = expectation.concrete_name.as_str();
        if !window.has_elapsed(now) || !self.missing_candidates.contains(name) {
            return;
        }
        if !snapshot.is_complete() {
            debug!(
                file = name,
                failed_fetches = snapshot.failed_fetches(),
                "deferring missing check until a complete snapshot"
            );
            return;
        }

        let key = self.matcher.key(name);
        if !self.settled.contains(name) && !snapshot.any_zone_has_match(key) {
            info!(file = name, expected_at = %expectation.expected_at, "expected file missing");
            events.push(LifecycleEvent {
                status: LifecycleStatus::Missing,
                client: expectation.client.clone(),
                file_name: name.to_string(),
                category: expectation.category.clone(),
                timestamp: window.expected,
            });
        }
        self.missing_candidates.remove(name);
    }

    fn evaluate_progress(
        &mut self,
        now: NaiveDateTime,
        snapshot: &Snapshot,
        events: &mut Vec<LifecycleEvent>,
    ) {
        for entry in self.tracked.values_mut() {
            let key = self.matcher.key(&entry.concrete_name);
            if !snapshot.has_match(Zone::Input, key) || !entry.progress_due(now) {
                continue;
            }
            debug!(file = %entry.concrete_name, "file still pending in input zone");
            events.push(entry.event(LifecycleStatus::InProgress, now));
            entry.status = TrackingStatus::InProgress;
            entry.last_progress_notified_at = Some(now);
        }
    }

    fn evaluate_outcomes(
        &mut self,
        now: NaiveDateTime,
        snapshot: &Snapshot,
        events: &mut Vec<LifecycleEvent>,
    ) {
        let matcher = &self.matcher;
        self.tracked.retain(|name, entry| {
            let key = matcher.key(name);
            let outcome = if snapshot.has_match(Zone::Archive, key) {
                LifecycleStatus::CompletelyParsed
            } else if snapshot.has_match(Zone::Error, key) {
                LifecycleStatus::ErrorParsed
            } else {
                return true;
            };
            info!(
                file = %name,
                status = %outcome,
                received_at = %entry.received_at,
                elapsed_secs = (now - entry.received_at).num_seconds(),
                "file reached terminal state"
            );
            events.push(entry.event(outcome, now));
            false
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::FamilyRule;
    use crate::storage::ObjectEntry;
    use crate::window::ClientPolicy;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
    }

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        day().and_hms_opt(hour, minute, second).unwrap()
    }

    fn reconciler() -> Reconciler {
        let mut policy = WindowPolicy::new(ClientPolicy::from_settings(15, 15, 150));
        policy.set_client("NCR".to_string(), ClientPolicy::from_settings(3, 3, 90));
        Reconciler::new(
            NameMatcher::new(vec![FamilyRule::new("DslwdClms_TillPymts_Dly_")]),
            policy,
        )
    }

    fn expect(name: &str, hour: u32, minute: u32) -> ResolvedExpectation {
        ResolvedExpectation {
            concrete_name: name.to_string(),
            expected_at: at(hour, minute, 0),
            client: "TILL US".to_string(),
            category: "General".to_string(),
        }
    }

    #[derive(Default)]
    struct Zones<'a> {
        input: &'a [&'a str],
        archive: &'a [&'a str],
        error: &'a [&'a str],
    }

    fn snapshot(zones: Zones<'_>) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for (zone, names) in [
            (Zone::Input, zones.input),
            (Zone::Archive, zones.archive),
            (Zone::Error, zones.error),
        ] {
            for name in names {
                snapshot.insert(
                    zone,
                    &ObjectEntry {
                        key: format!("{}/{name}", zone.label()),
                        last_modified: Utc::now(),
                    },
                );
            }
        }
        snapshot
    }

    fn statuses(events: &[LifecycleEvent]) -> Vec<LifecycleStatus> {
        events.iter().map(|e| e.status).collect()
    }

    #[test]
    fn end_to_end_received_progress_parsed() {
        let mut rec = reconciler();
        let exp = vec![expect("report_20240103.csv", 9, 0)];

        let first = rec.reconcile(
            at(8, 50, 0),
            &exp,
            &snapshot(Zones {
                input: &["report_20240103.csv"],
                ..Default::default()
            }),
        );
        assert_eq!(
            statuses(&first),
            vec![LifecycleStatus::Received, LifecycleStatus::InProgress]
        );
        assert_eq!(first[0].timestamp, at(9, 0, 0));
        assert_eq!(first[1].timestamp, at(8, 50, 0));

        let second = rec.reconcile(
            at(9, 5, 0),
            &exp,
            &snapshot(Zones {
                input: &["report_20240103.csv"],
                ..Default::default()
            }),
        );
        assert_eq!(statuses(&second), vec![LifecycleStatus::InProgress]);

        let third = rec.reconcile(
            at(9, 10, 0),
            &exp,
            &snapshot(Zones {
                archive: &["report_20240103.csv"],
                ..Default::default()
            }),
        );
        assert_eq!(statuses(&third), vec![LifecycleStatus::CompletelyParsed]);
        assert_eq!(rec.tracked_len(), 0);

        let after = rec.reconcile(
            at(9, 30, 0),
            &exp,
            &snapshot(Zones {
                archive: &["report_20240103.csv"],
                ..Default::default()
            }),
        );
        assert!(after.is_empty());
    }

    #[test]
    fn out_of_window_arrival_is_stamped_with_clock() {
        let mut rec = reconciler();
        let exp = vec![expect("late.csv", 9, 0)];
        let events = rec.reconcile(
            at(11, 0, 0),
            &exp,
            &snapshot(Zones {
                input: &["late.csv"],
                ..Default::default()
            }),
        );
        assert_eq!(events[0].status, LifecycleStatus::Received);
        assert_eq!(events[0].timestamp, at(11, 0, 0));
    }

    #[test]
    fn received_fires_once_per_day_even_after_terminal() {
        let mut rec = reconciler();
        let exp = vec![expect("a.csv", 9, 0)];
        let in_input = || {
            snapshot(Zones {
                input: &["a.csv"],
                ..Default::default()
            })
        };

        let mut received = 0;
        for minute in 0..10 {
            received += rec
                .reconcile(at(9, minute, 0), &exp, &in_input())
                .iter()
                .filter(|e| e.status == LifecycleStatus::Received)
                .count();
        }
        rec.reconcile(
            at(9, 11, 0),
            &exp,
            &snapshot(Zones {
                archive: &["a.csv"],
                ..Default::default()
            }),
        );
        received += rec
            .reconcile(at(9, 12, 0), &exp, &in_input())
            .iter()
            .filter(|e| e.status == LifecycleStatus::Received)
            .count();
        assert_eq!(received, 1);
    }

    #[test]
    fn heartbeat_respects_interval() {
        let mut rec = reconciler();
        let exp = vec![expect("slow.csv", 9, 0)];
        let in_input = snapshot(Zones {
            input: &["slow.csv"],
            ..Default::default()
        });

        let count_progress = |events: Vec<LifecycleEvent>| {
            events
                .iter()
                .filter(|e| e.status == LifecycleStatus::InProgress)
                .count()
        };

        assert_eq!(count_progress(rec.reconcile(at(9, 0, 0), &exp, &in_input)), 1);
        assert_eq!(count_progress(rec.reconcile(at(9, 0, 10), &exp, &in_input)), 0);
        assert_eq!(count_progress(rec.reconcile(at(9, 2, 29), &exp, &in_input)), 0);
        assert_eq!(count_progress(rec.reconcile(at(9, 2, 30), &exp, &in_input)), 1);
        assert_eq!(count_progress(rec.reconcile(at(9, 2, 40), &exp, &in_input)), 0);
        assert_eq!(
            rec.tracked().next().map(|e| e.status),
            Some(TrackingStatus::InProgress)
        );
    }

    #[test]
    fn missing_fires_once_after_window_closes() {
        let mut rec = reconciler();
        let exp = vec![expect("absent.csv", 9, 0)];
        let empty = Snapshot::default();

        assert!(rec.reconcile(at(8, 50, 0), &exp, &empty).is_empty());
        assert!(rec.reconcile(at(9, 15, 0), &exp, &empty).is_empty());
        assert_eq!(rec.missing_candidate_len(), 1);

        let events = rec.reconcile(at(9, 15, 10), &exp, &empty);
        assert_eq!(statuses(&events), vec![LifecycleStatus::Missing]);
        assert_eq!(events[0].timestamp, at(9, 0, 0));

        assert!(rec.reconcile(at(9, 20, 0), &exp, &empty).is_empty());
        assert_eq!(rec.missing_candidate_len(), 0);
    }

    #[test]
    fn missing_suppressed_when_file_seen_in_any_zone() {
        for zones in [
            Zones {
                archive: &["absent.csv"],
                ..Default::default()
            },
            Zones {
                error: &["absent.csv"],
                ..Default::default()
            },
        ] {
            let mut rec = reconciler();
            let exp = vec![expect("absent.csv", 9, 0)];
            rec.reconcile(at(9, 0, 0), &exp, &Snapshot::default());
            let events = rec.reconcile(at(9, 30, 0), &exp, &snapshot(zones));
            assert!(events.is_empty());
            assert_eq!(rec.missing_candidate_len(), 0);
        }
    }

    #[test]
    fn late_arrival_in_input_clears_missing_candidacy() {
        let mut rec = reconciler();
        let exp = vec![expect("late.csv", 9, 0)];
        rec.reconcile(at(9, 0, 0), &exp, &Snapshot::default());
        assert_eq!(rec.missing_candidate_len(), 1);

        let events = rec.reconcile(
            at(9, 30, 0),
            &exp,
            &snapshot(Zones {
                input: &["late.csv"],
                ..Default::default()
            }),
        );
        assert_eq!(
            statuses(&events),
            vec![LifecycleStatus::Received, LifecycleStatus::InProgress]
        );
        assert_eq!(events[0].timestamp, at(9, 30, 0));
        assert_eq!(rec.missing_candidate_len(), 0);
        assert_eq!(rec.tracked().next().map(|e| e.received_at), Some(at(9, 30, 0)));
    }

    #[test]
    fn missing_not_declared_for_file_received_then_cleared() {
        let mut rec = reconciler();
        let exp = vec![expect("gone.csv", 9, 0)];
        rec.reconcile(
            at(9, 0, 0),
            &exp,
            &snapshot(Zones {
                input: &["gone.csv"],
                ..Default::default()
            }),
        );
        rec.reconcile(
            at(9, 1, 0),
            &exp,
            &snapshot(Zones {
                archive: &["gone.csv"],
                ..Default::default()
            }),
        );
        // Still inside the window and no longer anywhere in storage.
        rec.reconcile(at(9, 2, 0), &exp, &Snapshot::default());
        assert!(rec.reconcile(at(9, 30, 0), &exp, &Snapshot::default()).is_empty());
    }

    #[test]
    fn missing_deferred_while_snapshot_incomplete() {
        let mut rec = reconciler();
        let exp = vec![expect("absent.csv", 9, 0)];
        rec.reconcile(at(9, 0, 0), &exp, &Snapshot::default());

        let mut degraded = Snapshot::default();
        degraded.record_failed_fetch();
        assert!(rec.reconcile(at(9, 20, 0), &exp, &degraded).is_empty());
        assert_eq!(rec.missing_candidate_len(), 1);

        let events = rec.reconcile(at(9, 20, 10), &exp, &Snapshot::default());
        assert_eq!(statuses(&events), vec![LifecycleStatus::Missing]);
    }

    #[test]
    fn missing_never_before_window_end() {
        let mut rec = reconciler();
        let exp = vec![expect("absent.csv", 9, 0)];
        for minute in 45..60 {
            assert!(rec.reconcile(at(8, minute, 0), &exp, &Snapshot::default()).is_empty());
        }
        for minute in 0..=15 {
            assert!(rec.reconcile(at(9, minute, 0), &exp, &Snapshot::default()).is_empty());
        }
    }

    #[test]
    fn archive_takes_precedence_over_error() {
        let mut rec = reconciler();
        let exp = vec![expect("dup.csv", 9, 0)];
        rec.reconcile(
            at(9, 0, 0),
            &exp,
            &snapshot(Zones {
                input: &["dup.csv"],
                ..Default::default()
            }),
        );
        let events = rec.reconcile(
            at(9, 5, 0),
            &exp,
            &snapshot(Zones {
                archive: &["dup.csv"],
                error: &["dup.csv"],
                ..Default::default()
            }),
        );
        assert_eq!(statuses(&events), vec![LifecycleStatus::CompletelyParsed]);

        let later = rec.reconcile(
            at(9, 6, 0),
            &exp,
            &snapshot(Zones {
                error: &["dup.csv"],
                ..Default::default()
            }),
        );
        assert!(later.is_empty());
    }

    #[test]
    fn error_zone_ends_tracking() {
        let mut rec = reconciler();
        let exp = vec![expect("bad.csv", 9, 0)];
        rec.reconcile(
            at(9, 0, 0),
            &exp,
            &snapshot(Zones {
                input: &["bad.csv"],
                ..Default::default()
            }),
        );
        let events = rec.reconcile(
            at(9, 1, 0),
            &exp,
            &snapshot(Zones {
                error: &["bad.csv"],
                ..Default::default()
            }),
        );
        assert_eq!(statuses(&events), vec![LifecycleStatus::ErrorParsed]);
        assert_eq!(rec.tracked_len(), 0);
    }

    #[test]
    fn family_expectation_tracks_numbered_parts() {
        let mut rec = reconciler();
        let exp = vec![expect("DslwdClms_TillPymts_Dly_20240103", 6, 0)];
        let events = rec.reconcile(
            at(6, 0, 0),
            &exp,
            &snapshot(Zones {
                input: &["DslwdClms_TillPymts_Dly_20240103_part2.csv"],
                ..Default::default()
            }),
        );
        assert_eq!(events[0].status, LifecycleStatus::Received);
        assert_eq!(events[0].file_name, "DslwdClms_TillPymts_Dly_20240103");

        let done = rec.reconcile(
            at(6, 5, 0),
            &exp,
            &snapshot(Zones {
                archive: &["DslwdClms_TillPymts_Dly_20240103_part1.csv"],
                ..Default::default()
            }),
        );
        assert_eq!(statuses(&done), vec![LifecycleStatus::CompletelyParsed]);
    }

    #[test]
    fn client_policy_controls_window() {
        let mut rec = reconciler();
        let mut exp = expect("ncr.csv", 9, 0);
        exp.client = "NCR".to_string();
        let exp = vec![exp];

        // 8:50 is outside NCR's three-minute lead window.
        let events = rec.reconcile(
            at(8, 50, 0),
            &exp,
            &snapshot(Zones {
                input: &["ncr.csv"],
                ..Default::default()
            }),
        );
        assert_eq!(events[0].timestamp, at(8, 50, 0));
        assert_eq!(
            rec.tracked().next().map(|e| e.in_progress_interval),
            Some(Duration::seconds(90))
        );
    }

    #[test]
    fn day_change_resets_tracking() {
        let mut rec = reconciler();
        let today = vec![expect("a.csv", 23, 50)];
        rec.reconcile(
            at(23, 55, 0),
            &today,
            &snapshot(Zones {
                input: &["a.csv"],
                ..Default::default()
            }),
        );
        assert_eq!(rec.tracked_len(), 1);

        let tomorrow = day().succ_opt().unwrap().and_hms_opt(0, 1, 0).unwrap();
        let events = rec.reconcile(tomorrow, &[], &Snapshot::default());
        assert!(events.is_empty());
        assert_eq!(rec.tracked_len(), 0);
    }

    #[test]
    fn arrivals_are_evaluated_before_progress_and_outcomes() {
        let mut rec = reconciler();
        let exp = vec![expect("b.csv", 9, 0), expect("a.csv", 9, 0)];
        let events = rec.reconcile(
            at(9, 0, 0),
            &exp,
            &snapshot(Zones {
                input: &["a.csv", "b.csv"],
                ..Default::default()
            }),
        );
        let order: Vec<_> = events
            .iter()
            .map(|e| (e.status, e.file_name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (LifecycleStatus::Received, "b.csv"),
                (LifecycleStatus::Received, "a.csv"),
                (LifecycleStatus::InProgress, "a.csv"),
                (LifecycleStatus::InProgress, "b.csv"),
            ]
        );
    }
}
