//! Typed channel for egress records
//!
//! Provides a non-blocking way to hand records to the egress writer.
//! Uses a bounded mpsc channel to prevent unbounded memory growth; when the
//! writer falls behind, records are dropped and counted instead of stalling
//! frame processing. The end-of-run summary is the exception and waits.

use crate::domain::transit::{AggregateSnapshot, CompletedTransit, ExpiredTransit};
use crate::domain::types::VehicleClass;
use crate::infra::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Records written to the egress file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum EgressRecord {
    /// Vehicle registered at the counting line
    Count { seq: u64, class: VehicleClass, frame: u64, video_s: f64 },
    /// Transit completed at the speed line
    Transit { seq: u64, class: VehicleClass, speed_kmh: f64, frames: u32, video_s: f64 },
    /// Transit evicted without reaching the speed line
    Expired { seq: u64, class: VehicleClass, frames: u32, video_s: f64 },
    /// Final aggregates at end of run
    Summary {
        #[serde(flatten)]
        snapshot: AggregateSnapshot,
    },
}

impl EgressRecord {
    pub fn transit(done: &CompletedTransit) -> Self {
        EgressRecord::Transit {
            seq: done.seq,
            class: done.class,
            speed_kmh: done.speed_kmh,
            frames: done.elapsed_frames,
            video_s: done.video_time_s,
        }
    }

    pub fn expired(expired: &ExpiredTransit, video_s: f64) -> Self {
        EgressRecord::Expired {
            seq: expired.seq,
            class: expired.class,
            frames: expired.elapsed_frames,
            video_s,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EgressRecord::Count { .. } => "count",
            EgressRecord::Transit { .. } => "transit",
            EgressRecord::Expired { .. } => "expired",
            EgressRecord::Summary { .. } => "summary",
        }
    }
}

/// Sender half handed to the counter
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressRecord>,
    metrics: Option<Arc<Metrics>>,
}

impl EgressSender {
    /// Attach metrics so dropped records are counted
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Queue a record without blocking; returns false if it was dropped
    pub fn send(&self, record: EgressRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                if let Some(ref m) = self.metrics {
                    m.record_egress_dropped();
                }
                warn!(kind = %record.kind(), "egress_dropped");
                false
            }
            Err(TrySendError::Closed(record)) => {
                debug!(kind = %record.kind(), "egress_closed");
                false
            }
        }
    }

    /// Queue a record, waiting for capacity; returns false if the writer is gone
    pub async fn send_wait(&self, record: EgressRecord) -> bool {
        match self.tx.send(record).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(record)) => {
                warn!(kind = %record.kind(), "egress_closed");
                false
            }
        }
    }
}

/// Create a bounded egress channel
pub fn create_egress_channel(capacity: usize) -> (EgressSender, mpsc::Receiver<EgressRecord>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EgressSender { tx, metrics: None }, rx)
}
