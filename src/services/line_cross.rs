//! Line/box crossing test
//!
//! Samples the line at the box center's projections rather than clipping the
//! segment against the rectangle. Boxes that overlap the segment away from
//! those projections are not reported, and degenerate (point or axis-aligned)
//! lines never intersect anything.

use crate::domain::types::{BoundingBox, ReferenceLine};

/// Whether `line` passes through `bbox`
pub fn intersects(line: &ReferenceLine, bbox: &BoundingBox) -> bool {
    let Some((a, b)) = line.slope_intercept() else {
        return false;
    };

    let (cx, cy) = bbox.center();
    let cx_f = f64::from(cx);
    let cy_f = f64::from(cy);

    // Line evaluated at the center column
    let y1 = a * cx_f + b;
    if line.interval_contains(cx_f, y1)
        && f64::from(bbox.min_y) <= y1
        && f64::from(bbox.max_y) >= y1
    {
        return true;
    }

    // Line solved at the center row
    let x2 = (cy_f - b) / a;
    line.interval_contains(x2, cy_f) && f64::from(bbox.min_x) <= x2 && f64::from(bbox.max_x) >= x2
}
