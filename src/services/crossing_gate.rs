//! Edge-triggered crossing latch for one reference line
//!
//! A gate fires once when some region starts overlapping its line and stays
//! silent while the overlap continues. A frame with no overlapping region
//! re-arms it.

use crate::domain::types::{ReferenceLine, Region};
use crate::services::line_cross::intersects;

/// Result of evaluating one frame's regions against a gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateEvaluation {
    /// A new crossing started on this frame
    pub triggered: bool,
    /// First region (in input order) overlapping the line, if any
    pub matched: Option<Region>,
}

impl GateEvaluation {
    #[inline]
    pub fn is_overlapping(&self) -> bool {
        self.matched.is_some()
    }
}

/// One reference line plus its engaged latch
#[derive(Debug, Clone)]
pub struct CrossingGate {
    line: ReferenceLine,
    engaged: bool,
}

impl CrossingGate {
    pub fn new(line: ReferenceLine) -> Self {
        Self { line, engaged: false }
    }

    pub fn line(&self) -> &ReferenceLine {
        &self.line
    }

    /// Whether a region overlapped the line on the most recent frame
    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// Evaluate a frame's regions; first match wins
    pub fn evaluate(&mut self, regions: &[Region]) -> GateEvaluation {
        let matched = regions.iter().find(|r| intersects(&self.line, &r.bbox)).copied();

        let triggered = match matched {
            Some(_) if !self.engaged => {
                self.engaged = true;
                true
            }
            Some(_) => false,
            None => {
                self.engaged = false;
                false
            }
        };

        GateEvaluation { triggered, matched }
    }

    /// Disengage without evaluating a frame
    pub fn reset(&mut self) {
        self.engaged = false;
    }
}
