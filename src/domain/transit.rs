//! Transit data model: pending vehicles, completions, per-class aggregates

use crate::domain::types::VehicleClass;
use serde::Serialize;

/// A vehicle counted at the counting line, waiting for the speed line
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransit {
    pub seq: u64,
    pub class: VehicleClass,
    pub elapsed_frames: u32,
}

impl PendingTransit {
    #[inline]
    pub fn new(seq: u64, class: VehicleClass) -> Self {
        Self { seq, class, elapsed_frames: 0 }
    }
}

/// A transit matched against a speed-line crossing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedTransit {
    pub seq: u64,
    pub class: VehicleClass,
    pub speed_kmh: f64,
    pub elapsed_frames: u32,
    pub video_time_s: f64,
}

/// A transit evicted after waiting longer than the configured maximum
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpiredTransit {
    pub seq: u64,
    pub class: VehicleClass,
    pub elapsed_frames: u32,
}

/// Running count and average speed for one vehicle class
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClassAggregate {
    pub count: u64,
    pub speed_sum_kmh: f64,
    pub samples: u32,
    pub average_kmh: f64,
}

impl ClassAggregate {
    pub(crate) fn record_arrival(&mut self) {
        self.count += 1;
    }

    /// Revert an optimistic arrival
    pub(crate) fn record_expiry(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    pub(crate) fn record_speed(&mut self, speed_kmh: f64) {
        self.speed_sum_kmh += speed_kmh;
        self.samples += 1;
        self.average_kmh = self.speed_sum_kmh / f64::from(self.samples);
    }
}

/// Per-frame view of counts and averages for display layers
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateSnapshot {
    pub frame: u64,
    pub video_time_s: f64,
    pub total_counted: u64,
    pub pending: usize,
    pub small: ClassAggregate,
    pub medium: ClassAggregate,
    pub large: ClassAggregate,
}

impl AggregateSnapshot {
    pub fn class(&self, class: VehicleClass) -> &ClassAggregate {
        match class {
            VehicleClass::Small => &self.small,
            VehicleClass::Medium => &self.medium,
            VehicleClass::Large => &self.large,
        }
    }

    /// Sum of per-class counts (vehicles not expired)
    pub fn confirmed_count(&self) -> u64 {
        self.small.count + self.medium.count + self.large.count
    }
}
