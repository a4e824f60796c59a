use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::event::LifecycleEvent;
use crate::metrics::{EVENTS_EMITTED_TOTAL, SINK_FAILURES_TOTAL, SINK_SEND_DURATION};
use crate::output_writer::EventSink;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmitSummary {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers lifecycle events one at a time, pausing between calls to stay under the
/// sink's rate limit. Delivery failures are logged and dropped.
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
    throttle: Duration,
    cancel_token: CancellationToken,
}

impl EventEmitter {
    pub fn new(
        sink: Arc<dyn EventSink>,
        throttle: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            sink,
            throttle,
            cancel_token,
        }
    }

    /// Returns whether the sink accepted the event.
    pub async fn emit(&self, event: &LifecycleEvent) -> bool {
        let payload = event.payload();
        let started = Instant::now();
        let result = self.sink.send_event(&payload).await;
        let elapsed = started.elapsed().as_secs_f64();
        let status = event.status.metric_label();

        let delivered = match result {
            Ok(()) => {
                SINK_SEND_DURATION.with_label_values(&["ok"]).observe(elapsed);
                EVENTS_EMITTED_TOTAL.with_label_values(&[status]).inc();
                info!(
                    status = %event.status,
                    file = %event.file_name,
                    client = %event.client,
                    category = %event.category,
                    expected_time = %payload.expected_time,
                    "event sent"
                );
                true
            }
            Err(err) => {
                SINK_SEND_DURATION.with_label_values(&["error"]).observe(elapsed);
                SINK_FAILURES_TOTAL.with_label_values(&[status]).inc();
                let reason = format!("{err:#}");
                error!(
                    status = %event.status,
                    file = %event.file_name,
                    error = %reason,
                    "failed to send event"
                );
                false
            }
        };

        self.pause().await;
        delivered
    }

    /// Emits `events` in order. Stops early, without error, once shutdown is requested.
    pub async fn emit_all(&self, events: &[LifecycleEvent]) -> EmitSummary {
        let mut summary = EmitSummary::default();
        for event in events {
            if self.cancel_token.is_cancelled() {
                break;
            }
            if self.emit(event).await {
                summary.delivered += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }

    async fn pause(&self) {
        if self.throttle.is_zero() {
            return;
        }
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => {}
            _ = sleep(self.throttle) => {}
        }
    }
}
