//! Per-frame analysis: area filtering, classification and both crossing gates

use crate::domain::types::{ReferenceLine, Region, VehicleClass};
use crate::services::crossing_gate::{CrossingGate, GateEvaluation};
use smallvec::SmallVec;
use tracing::trace;

/// Area thresholds applied to every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionParams {
    /// Regions with `area <= area_threshold` are ignored
    pub area_threshold: u32,
    /// Small/medium/large boundary (see `VehicleClass::from_area`)
    pub vehicle_size_threshold: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self { area_threshold: 1700, vehicle_size_threshold: 20000 }
    }
}

/// Outcome of analyzing one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAnalysis {
    /// Class of the vehicle that newly crossed the counting line
    pub counted: Option<VehicleClass>,
    /// A new crossing started on the speed line
    pub speed_trigger: bool,
    /// Regions above the area threshold
    pub kept_regions: usize,
}

/// Drives the counting and speed gates over filtered regions
#[derive(Debug, Clone)]
pub struct FrameAnalyzer {
    params: DetectionParams,
    counting: CrossingGate,
    speed: CrossingGate,
}

impl FrameAnalyzer {
    pub fn new(params: DetectionParams, counting_line: ReferenceLine, speed_line: ReferenceLine) -> Self {
        Self {
            params,
            counting: CrossingGate::new(counting_line),
            speed: CrossingGate::new(speed_line),
        }
    }

    pub fn params(&self) -> DetectionParams {
        self.params
    }

    pub fn counting_gate(&self) -> &CrossingGate {
        &self.counting
    }

    pub fn speed_gate(&self) -> &CrossingGate {
        &self.speed
    }

    /// Analyze one frame's regions (order preserved)
    pub fn analyze(&mut self, regions: &[Region]) -> FrameAnalysis {
        let threshold = f64::from(self.params.area_threshold);
        let good: SmallVec<[Region; 8]> =
            regions.iter().filter(|r| r.area > threshold).copied().collect();

        // Both gates see every frame so each latch tracks its own line
        let count_eval = self.counting.evaluate(&good);
        let speed_eval = self.speed.evaluate(&good);

        let counted = self.classify(&count_eval);
        if counted.is_some() || speed_eval.triggered {
            trace!(
                kept = %good.len(),
                counted = ?counted,
                speed_trigger = %speed_eval.triggered,
                "frame_crossings"
            );
        }

        FrameAnalysis { counted, speed_trigger: speed_eval.triggered, kept_regions: good.len() }
    }

    fn classify(&self, eval: &GateEvaluation) -> Option<VehicleClass> {
        if !eval.triggered {
            return None;
        }
        eval.matched.map(|r| VehicleClass::from_area(r.area, self.params.vehicle_size_threshold))
    }

    /// Disengage both gates
    pub fn reset(&mut self) {
        self.counting.reset();
        self.speed.reset();
    }
}
