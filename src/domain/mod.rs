//! Domain models - geometry, detections and transit bookkeeping
//!
//! - `types` - points, bounding boxes, regions, reference lines, vehicle classes
//! - `transit` - pending transits, completions, per-class aggregates

pub mod transit;
pub mod types;

pub use transit::{AggregateSnapshot, ClassAggregate, CompletedTransit, ExpiredTransit, PendingTransit};
pub use types::{BoundingBox, FeedHeader, FrameRegions, Point, ReferenceLine, Region, VehicleClass};
