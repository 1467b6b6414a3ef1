//! Geometry and per-frame input types

use serde::{Deserialize, Serialize};

/// A point in image coordinates (pixels, y grows downwards)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point {
    fn from(p: [f64; 2]) -> Self {
        Self { x: p[0], y: p[1] }
    }
}

/// Axis-aligned pixel rectangle of a detected region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl BoundingBox {
    #[inline]
    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Center point, halved with integer truncation
    #[inline]
    pub fn center(&self) -> (i32, i32) {
        ((self.min_x + self.max_x) / 2, (self.min_y + self.max_y) / 2)
    }
}

/// A candidate moving object detected in one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(flatten)]
    pub bbox: BoundingBox,
    pub area: f64,
}

impl Region {
    #[inline]
    pub const fn new(bbox: BoundingBox, area: f64) -> Self {
        Self { bbox, area }
    }
}

/// Operator-drawn reference segment (counting line or speed line)
///
/// The bounding interval of the endpoints is truncated to whole pixels,
/// and a line whose truncated extent is zero on either axis is degenerate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceLine {
    start: Point,
    end: Point,
    min_x: i32,
    min_y: i32,
    max_x: i32,
    max_y: i32,
}

impl ReferenceLine {
    pub fn new(start: Point, end: Point) -> Self {
        Self {
            start,
            end,
            min_x: start.x.min(end.x) as i32,
            min_y: start.y.min(end.y) as i32,
            max_x: start.x.max(end.x) as i32,
            max_y: start.y.max(end.y) as i32,
        }
    }

    pub fn start(&self) -> Point {
        self.start
    }

    pub fn end(&self) -> Point {
        self.end
    }

    /// True if the line can never report a crossing (a point, or axis-aligned)
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.min_x == self.max_x || self.min_y == self.max_y
    }

    /// Slope and intercept of `y = a*x + b`, or None for a degenerate line
    pub fn slope_intercept(&self) -> Option<(f64, f64)> {
        if self.is_degenerate() {
            return None;
        }
        let a = (self.end.y - self.start.y) / (self.end.x - self.start.x);
        let b = self.start.y - a * self.start.x;
        Some((a, b))
    }

    /// Whether `(x, y)` lies inside the truncated bounding interval
    #[inline]
    pub fn interval_contains(&self, x: f64, y: f64) -> bool {
        f64::from(self.min_x) <= x
            && f64::from(self.max_x) >= x
            && f64::from(self.min_y) <= y
            && f64::from(self.max_y) >= y
    }

    /// Midpoint of the two endpoints
    pub fn midpoint(&self) -> Point {
        Point::new((self.start.x + self.end.x) / 2.0, (self.start.y + self.end.y) / 2.0)
    }
}

/// Size class assigned from a region's area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Small,
    Medium,
    Large,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 3] = [VehicleClass::Small, VehicleClass::Medium, VehicleClass::Large];

    /// Classify an area against the vehicle size threshold
    ///
    /// `area <= t` is Small, `area <= 1.9 * t` is Medium, anything larger is Large.
    pub fn from_area(area: f64, size_threshold: u32) -> Self {
        let threshold = f64::from(size_threshold);
        if area <= threshold {
            VehicleClass::Small
        } else if area <= 1.9 * threshold {
            VehicleClass::Medium
        } else {
            VehicleClass::Large
        }
    }

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Small => "small",
            VehicleClass::Medium => "medium",
            VehicleClass::Large => "large",
        }
    }

    /// Human-readable label for displays
    pub fn label(&self) -> &'static str {
        match self {
            VehicleClass::Small => "car",
            VehicleClass::Medium => "van",
            VehicleClass::Large => "lorry",
        }
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        match self {
            VehicleClass::Small => 0,
            VehicleClass::Medium => 1,
            VehicleClass::Large => 2,
        }
    }
}

impl std::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First line of a region feed, describing the source video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedHeader {
    pub fps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Regions extracted from one frame, in extractor order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameRegions {
    #[serde(default)]
    pub frame: u64,
    #[serde(default)]
    pub regions: Vec<Region>,
}

impl FrameRegions {
    pub fn new(frame: u64, regions: Vec<Region>) -> Self {
        Self { frame, regions }
    }

    pub fn empty(frame: u64) -> Self {
        Self { frame, regions: Vec::new() }
    }
}
