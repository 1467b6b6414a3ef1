//! Transit timing between the counting line and the speed line
//!
//! Vehicles counted at the counting line queue up in arrival order. A
//! speed-line crossing completes the oldest pending vehicle (FIFO). Entries
//! that wait longer than `max_wait_frames` are evicted and their optimistic
//! class count is reverted.

use crate::domain::transit::{
    AggregateSnapshot, ClassAggregate, CompletedTransit, ExpiredTransit, PendingTransit,
};
use crate::domain::types::VehicleClass;
use anyhow::bail;
use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Slowest speed a vehicle is assumed to cross the gap at (m/s)
const MIN_TRANSIT_SPEED_MPS: f64 = 3.0;

/// Frame rate and line spacing for one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunParams {
    frames_per_second: f64,
    line_distance_m: f64,
    max_wait_frames: u32,
}

impl RunParams {
    /// Validate run parameters; both values must be finite and positive
    pub fn new(frames_per_second: f64, line_distance_m: f64) -> anyhow::Result<Self> {
        if !frames_per_second.is_finite() || frames_per_second <= 0.0 {
            bail!("frame rate must be positive, got {frames_per_second}");
        }
        if !line_distance_m.is_finite() || line_distance_m <= 0.0 {
            bail!("line distance must be positive, got {line_distance_m}");
        }
        let max_wait_frames =
            (frames_per_second * (line_distance_m / MIN_TRANSIT_SPEED_MPS)).floor() as u32;
        Ok(Self { frames_per_second, line_distance_m, max_wait_frames })
    }

    pub fn frames_per_second(&self) -> f64 {
        self.frames_per_second
    }

    pub fn line_distance_m(&self) -> f64 {
        self.line_distance_m
    }

    /// Frames a pending transit may wait before it is evicted
    pub fn max_wait_frames(&self) -> u32 {
        self.max_wait_frames
    }

    /// Speed in km/h for a transit that took `elapsed_frames` frames
    #[inline]
    pub fn speed_kmh(&self, elapsed_frames: u32) -> f64 {
        let seconds = f64::from(elapsed_frames) / self.frames_per_second;
        (self.line_distance_m / seconds) * 3.6
    }
}

/// Everything that happened to the queue during one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitStep {
    /// Sequence id assigned to a vehicle counted on this frame
    pub arrival: Option<u64>,
    pub completed: Option<CompletedTransit>,
    pub expired: SmallVec<[ExpiredTransit; 2]>,
    /// Speed trigger observed with nothing pending
    pub unmatched_trigger: bool,
}

/// Pending-queue state machine and per-class aggregates
#[derive(Debug, Clone)]
pub struct TransitEstimator {
    params: RunParams,
    pending: VecDeque<PendingTransit>,
    aggregates: [ClassAggregate; 3],
    next_seq: u64,
}

impl TransitEstimator {
    pub fn new(params: RunParams) -> Self {
        Self {
            params,
            pending: VecDeque::new(),
            aggregates: [ClassAggregate::default(); 3],
            next_seq: 1,
        }
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    /// Advance one frame: arrival, tick, completion, timeout sweep
    pub fn step(
        &mut self,
        counted: Option<VehicleClass>,
        speed_trigger: bool,
        video_time_s: f64,
    ) -> TransitStep {
        let mut step = TransitStep::default();

        if let Some(class) = counted {
            step.arrival = Some(self.arrive(class));
        }

        for transit in self.pending.iter_mut() {
            transit.elapsed_frames += 1;
        }

        if speed_trigger {
            match self.pending.pop_front() {
                Some(transit) => step.completed = Some(self.complete(transit, video_time_s)),
                None => {
                    debug!(video_time_s = %video_time_s, "speed_trigger_unmatched");
                    step.unmatched_trigger = true;
                }
            }
        }

        self.sweep_expired(&mut step.expired);
        step
    }

    fn arrive(&mut self, class: VehicleClass) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push_back(PendingTransit::new(seq, class));
        self.aggregates[class.index()].record_arrival();
        seq
    }

    fn complete(&mut self, transit: PendingTransit, video_time_s: f64) -> CompletedTransit {
        let speed_kmh = self.params.speed_kmh(transit.elapsed_frames);
        let aggregate = &mut self.aggregates[transit.class.index()];
        aggregate.record_speed(speed_kmh);

        info!(
            seq = %transit.seq,
            class = %transit.class,
            frames = %transit.elapsed_frames,
            speed_kmh = format!("{:.2}", speed_kmh),
            average_kmh = format!("{:.2}", aggregate.average_kmh),
            "transit_completed"
        );

        CompletedTransit {
            seq: transit.seq,
            class: transit.class,
            speed_kmh,
            elapsed_frames: transit.elapsed_frames,
            video_time_s,
        }
    }

    fn sweep_expired(&mut self, expired: &mut SmallVec<[ExpiredTransit; 2]>) {
        let max_wait = self.params.max_wait_frames;
        let aggregates = &mut self.aggregates;

        self.pending.retain(|t| {
            if t.elapsed_frames <= max_wait {
                return true;
            }
            aggregates[t.class.index()].record_expiry();
            info!(
                seq = %t.seq,
                class = %t.class,
                frames = %t.elapsed_frames,
                max_wait_frames = %max_wait,
                "transit_expired"
            );
            expired.push(ExpiredTransit {
                seq: t.seq,
                class: t.class,
                elapsed_frames: t.elapsed_frames,
            });
            false
        });
    }

    /// Pending transits, oldest first
    pub fn pending(&self) -> impl Iterator<Item = &PendingTransit> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn aggregate(&self, class: VehicleClass) -> &ClassAggregate {
        &self.aggregates[class.index()]
    }

    /// Number of sequence ids issued so far
    pub fn total_counted(&self) -> u64 {
        self.next_seq - 1
    }

    /// Fill the aggregate fields of a snapshot
    pub fn snapshot(&self, frame: u64, video_time_s: f64) -> AggregateSnapshot {
        AggregateSnapshot {
            frame,
            video_time_s,
            total_counted: self.total_counted(),
            pending: self.pending.len(),
            small: self.aggregates[VehicleClass::Small.index()],
            medium: self.aggregates[VehicleClass::Medium.index()],
            large: self.aggregates[VehicleClass::Large.index()],
        }
    }

    /// Drop pending transits without completing them; returns how many were dropped
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Clear the queue, aggregates and sequence ids
    pub fn reset(&mut self) {
        self.pending.clear();
        self.aggregates = [ClassAggregate::default(); 3];
        self.next_seq = 1;
    }
}
