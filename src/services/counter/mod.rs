//! Vehicle counter - per-stream frame orchestration
//!
//! The VehicleCounter owns the analysis state of one video stream and
//! applies each frame as a single unit:
//! - Area filtering and line crossing (FrameAnalyzer)
//! - Transit arrival, completion and expiry (TransitEstimator)
//! - Egress records for counts, transits and expiries
//! - Snapshot publication for observers

#[cfg(test)]
mod tests;

use crate::domain::transit::{AggregateSnapshot, CompletedTransit, ExpiredTransit};
use crate::domain::types::{FrameRegions, VehicleClass};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::{EgressRecord, EgressSender};
use crate::services::frame_analyzer::FrameAnalyzer;
use crate::services::transit_estimator::{RunParams, TransitEstimator};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// What a single frame changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Sequence id and class of a vehicle registered on this frame
    pub counted: Option<(u64, VehicleClass)>,
    pub completed: Option<CompletedTransit>,
    pub expired: SmallVec<[ExpiredTransit; 2]>,
    pub speed_trigger_unmatched: bool,
}

/// Counts vehicles and estimates their speed over a stream of frames
pub struct VehicleCounter {
    pub(crate) analyzer: FrameAnalyzer,
    pub(crate) estimator: TransitEstimator,
    /// Frames processed since start or last reset
    frame_index: u64,
    metrics: Arc<Metrics>,
    egress_sender: Option<EgressSender>,
    snapshot_tx: watch::Sender<AggregateSnapshot>,
}

impl VehicleCounter {
    pub fn new(
        config: &Config,
        params: RunParams,
        metrics: Arc<Metrics>,
        egress_sender: Option<EgressSender>,
    ) -> Self {
        let analyzer = FrameAnalyzer::new(
            config.detection_params(),
            *config.counting_line(),
            *config.speed_line(),
        );
        let (snapshot_tx, _) = watch::channel(AggregateSnapshot::default());
        Self {
            analyzer,
            estimator: TransitEstimator::new(params),
            frame_index: 0,
            metrics,
            egress_sender,
            snapshot_tx,
        }
    }

    /// Receiver that always holds the latest snapshot
    pub fn subscribe(&self) -> watch::Receiver<AggregateSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    pub fn run_params(&self) -> &RunParams {
        self.estimator.params()
    }

    /// Video time of the next frame to be processed
    fn video_time_s(&self) -> f64 {
        self.frame_index as f64 / self.estimator.params().frames_per_second()
    }

    /// Current aggregates
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.estimator.snapshot(self.frame_index, self.video_time_s())
    }

    /// Apply one frame: analysis, transit step, egress and snapshot publish
    pub fn process_frame(&mut self, frame: &FrameRegions) -> FrameReport {
        let process_start = Instant::now();
        let video_time_s = self.video_time_s();

        let analysis = self.analyzer.analyze(&frame.regions);
        let step = self.estimator.step(analysis.counted, analysis.speed_trigger, video_time_s);

        let counted = match (step.arrival, analysis.counted) {
            (Some(seq), Some(class)) => Some((seq, class)),
            _ => None,
        };

        if let Some((seq, class)) = counted {
            self.metrics.record_vehicle_counted();
            info!(
                seq = %seq,
                class = %class,
                label = %class.label(),
                frame = %self.frame_index,
                video_time_s = format!("{:.2}", video_time_s),
                "vehicle_counted"
            );
            self.egress(EgressRecord::Count { seq, class, frame: self.frame_index, video_s: video_time_s });
        }
        if let Some(ref done) = step.completed {
            self.metrics.record_transit_completed();
            self.egress(EgressRecord::transit(done));
        }
        if !step.expired.is_empty() {
            self.metrics.record_transits_expired(step.expired.len());
            for expired in &step.expired {
                self.egress(EgressRecord::expired(expired, video_time_s));
            }
        }
        if step.unmatched_trigger {
            self.metrics.record_speed_trigger_unmatched();
        }

        self.frame_index += 1;
        self.snapshot_tx.send_replace(self.snapshot());

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_frame_processed(latency_us, frame.regions.len(), analysis.kept_regions);

        FrameReport {
            counted,
            completed: step.completed,
            expired: step.expired,
            speed_trigger_unmatched: step.unmatched_trigger,
        }
    }

    fn egress(&self, record: EgressRecord) {
        if let Some(ref sender) = self.egress_sender {
            sender.send(record);
        }
    }

    /// Clear all run state; configuration is kept
    pub fn reset(&mut self) {
        let discarded = self.estimator.pending_count();
        self.analyzer.reset();
        self.estimator.reset();
        self.frame_index = 0;
        self.snapshot_tx.send_replace(self.snapshot());
        info!(discarded_pending = %discarded, "counter_reset");
    }

    /// Consume frames until the channel closes or shutdown is signalled,
    /// then return the final snapshot
    pub async fn run(
        &mut self,
        mut frame_rx: mpsc::Receiver<FrameRegions>,
        mut shutdown: watch::Receiver<bool>,
    ) -> AggregateSnapshot {
        info!(
            fps = %self.run_params().frames_per_second(),
            line_distance_m = %self.run_params().line_distance_m(),
            max_wait_frames = %self.run_params().max_wait_frames(),
            "run_started"
        );

        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    match frame {
                        Some(f) => {
                            self.process_frame(&f);
                        }
                        None => {
                            debug!("frame_channel_closed");
                            break;
                        }
                    }
                }
                Ok(()) = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(frames = %self.frame_index, "counter_shutdown");
                        break;
                    }
                }
            }
        }

        self.finish().await
    }

    /// Discard unmatched transits and emit the summary record. The summary
    /// waits for egress capacity rather than being dropped.
    pub async fn finish(&mut self) -> AggregateSnapshot {
        let discarded = self.estimator.discard_pending();
        if discarded > 0 {
            warn!(count = %discarded, "pending_discarded");
        }

        let snapshot = self.snapshot();
        self.snapshot_tx.send_replace(snapshot);
        if let Some(ref sender) = self.egress_sender {
            sender.send_wait(EgressRecord::Summary { snapshot }).await;
        }

        info!(
            frames = %snapshot.frame,
            video_time_s = format!("{:.2}", snapshot.video_time_s),
            total_counted = %snapshot.total_counted,
            small = %snapshot.small.count,
            medium = %snapshot.medium.count,
            large = %snapshot.large.count,
            small_avg_kmh = format!("{:.2}", snapshot.small.average_kmh),
            medium_avg_kmh = format!("{:.2}", snapshot.medium.average_kmh),
            large_avg_kmh = format!("{:.2}", snapshot.large.average_kmh),
            "run_finished"
        );
        snapshot
    }
}
