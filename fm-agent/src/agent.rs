//! One monitoring cycle: list the zones, resolve today's checklist, reconcile, emit.

use chrono::NaiveDateTime;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::emitter::{EmitSummary, EventEmitter};
use crate::manifest::{ManifestResolver, ManifestSource};
use crate::metrics::{
    CYCLE_DURATION, CYCLE_ERRORS_TOTAL, EXPECTED_FILES, MISSING_CANDIDATES, TRACKED_FILES,
};
use crate::snapshot::{SnapshotCollector, Zone};
use crate::tracker::Reconciler;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub expected: usize,
    pub events: usize,
    pub emitted: EmitSummary,
    pub tracked: usize,
    pub snapshot_complete: bool,
}

pub struct MonitorAgent {
    collector: SnapshotCollector,
    resolver: ManifestResolver,
    manifest: Option<Arc<dyn ManifestSource>>,
    reconciler: Reconciler,
    emitter: EventEmitter,
}

impl MonitorAgent {
    pub fn new(
        collector: SnapshotCollector,
        resolver: ManifestResolver,
        reconciler: Reconciler,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            collector,
            resolver,
            manifest: None,
            reconciler,
            emitter,
        }
    }

    /// Re-read `source` at the start of every cycle.
    pub fn reload_each_cycle(mut self, source: Arc<dyn ManifestSource>) -> Self {
        self.manifest = Some(source);
        self
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Runs one cycle, containing any panic raised inside it so the caller can move on to
    /// the next one. Returns `None` when the cycle was aborted.
    pub async fn run_cycle_isolated(&mut self, now: NaiveDateTime) -> Option<CycleSummary> {
        match AssertUnwindSafe(self.run_cycle(now)).catch_unwind().await {
            Ok(summary) => Some(summary),
            Err(panic) => {
                CYCLE_ERRORS_TOTAL.inc();
                let reason = panic_message(panic.as_ref());
                error!(%now, error = %reason, "monitoring cycle aborted");
                None
            }
        }
    }

    /// Failed listings, unreadable manifests and sink errors are absorbed inside the cycle.
    pub async fn run_cycle(&mut self, now: NaiveDateTime) -> CycleSummary {
        let started = Instant::now();
        debug!(%now, "cycle started");

        if let Some(source) = self.manifest.as_ref() {
            self.resolver.reload(source.as_ref());
        }

        let snapshot = self.collector.collect().await;
        let expectations = self.resolver.resolve(now.date());
        let events = self.reconciler.reconcile(now, expectations, &snapshot);
        let expected = expectations.len();

        debug!(
            expected,
            input = snapshot.zone_len(Zone::Input),
            archive = snapshot.zone_len(Zone::Archive),
            error = snapshot.zone_len(Zone::Error),
            events = events.len(),
            "reconciled snapshot"
        );

        let emitted = self.emitter.emit_all(&events).await;

        let tracked = self.reconciler.tracked_len();
        EXPECTED_FILES.set(expected as i64);
        TRACKED_FILES.set(tracked as i64);
        MISSING_CANDIDATES.set(self.reconciler.missing_candidate_len() as i64);
        CYCLE_DURATION.observe(started.elapsed().as_secs_f64());

        if !events.is_empty() {
            info!(
                events = events.len(),
                delivered = emitted.delivered,
                failed = emitted.failed,
                tracked,
                "cycle complete"
            );
        }

        CycleSummary {
            expected,
            events: events.len(),
            emitted,
            tracked,
            snapshot_complete: snapshot.is_complete(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
