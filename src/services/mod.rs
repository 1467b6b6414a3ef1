//! Services - business logic and state management
//!
//! This module contains the core counting services:
//! - `line_cross` - Line/bounding-box crossing test
//! - `crossing_gate` - Edge-triggered latch over one reference line
//! - `frame_analyzer` - Area filtering, classification and both gates
//! - `transit_estimator` - Pending transit queue, speeds and class aggregates
//! - `counter` - Per-stream orchestrator running the frame loop

pub mod counter;
pub mod crossing_gate;
pub mod frame_analyzer;
pub mod line_cross;
pub mod transit_estimator;

// Re-export commonly used types
pub use counter::{FrameReport, VehicleCounter};
pub use crossing_gate::{CrossingGate, GateEvaluation};
pub use frame_analyzer::{DetectionParams, FrameAnalysis, FrameAnalyzer};
pub use transit_estimator::{RunParams, TransitEstimator, TransitStep};
