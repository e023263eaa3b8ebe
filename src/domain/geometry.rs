//! Box validation and trigger-line classification
//!
//! Pure functions over normalized coordinates:
//! - `validate_box` rejects edge-truncated small boxes and implausibly large ones
//! - `classify_line_position` bands a box bottom against the trigger line

use crate::domain::types::{Band, TriggerLine, Xyxy};

/// Distance from the right/bottom frame border under which a box counts as touching it
pub const EDGE_MARGIN: f64 = 0.02;

/// Threshold curves scale the line's y1 intercept, not the whole line
const NEAR_90_FACTOR: f64 = 0.9;
const NEAR_80_FACTOR: f64 = 0.8;

/// Run-configured box size limits, as fractions of frame width/height
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxLimits {
    pub min_size: f64,
    pub max_size: f64,
}

impl Default for BoxLimits {
    fn default() -> Self {
        Self { min_size: 0.08, max_size: 0.9 }
    }
}

/// Returns false for partial detections at the frame edge and for oversized boxes
pub fn validate_box(xyxyn: &Xyxy, limits: BoxLimits) -> bool {
    let width = xyxyn.width();
    let height = xyxyn.height();

    if width < limits.min_size || height < limits.min_size {
        let edge = 1.0 - EDGE_MARGIN;
        if xyxyn.x2 > edge || xyxyn.y2 > edge {
            return false;
        }
    }

    !(width > limits.max_size || height > limits.max_size)
}

/// Classify a box against the trigger line
///
/// Only boxes whose horizontal center lies within the line's x-span face the
/// line; everything else is `Far` regardless of its vertical position.
pub fn classify_line_position(xyxyn: &Xyxy, line: &TriggerLine) -> Band {
    let cx = xyxyn.center_x();
    let y_bottom = xyxyn.bottom();

    if cx < line.x1 || cx > line.x2 {
        return Band::Far;
    }

    let rise = line.slope() * (cx - line.x1);
    let y_line = rise + line.y1;
    let y_90 = rise + line.y1 * NEAR_90_FACTOR;
    let y_80 = rise + line.y1 * NEAR_80_FACTOR;

    if y_bottom > y_line {
        Band::Crossed
    } else if y_bottom > y_90 {
        Band::Near90
    } else if y_bottom > y_80 {
        Band::Near80
    } else {
        Band::Far
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(x1: f64, y1: f64, x2: f64, y2: f64) -> TriggerLine {
        TriggerLine::new(x1, y1, x2, y2).unwrap()
    }

    /// Box of given size whose right/bottom corner sits at (x2, y2)
    fn box_at(x2: f64, y2: f64, w: f64, h: f64) -> Xyxy {
        Xyxy::new(x2 - w, y2 - h, x2, y2)
    }

    #[test]
    fn test_small_box_at_right_edge_rejected() {
        let limits = BoxLimits { min_size: 0.08, max_size: 0.9 };
        assert!(!validate_box(&box_at(0.99, 0.5, 0.05, 0.05), limits));
    }

    #[test]
    fn test_small_box_inside_frame_accepted() {
        let limits = BoxLimits { min_size: 0.08, max_size: 0.9 };
        assert!(validate_box(&box_at(0.5, 0.5, 0.05, 0.05), limits));
    }

    #[test]
    fn test_small_box_at_bottom_edge_rejected() {
        let limits = BoxLimits::default();
        assert!(!validate_box(&box_at(0.5, 0.985, 0.2, 0.05), limits));
    }

    #[test]
    fn test_large_box_at_edge_accepted() {
        // Edge rule only applies to undersized boxes
        let limits = BoxLimits::default();
        assert!(validate_box(&box_at(0.995, 0.995, 0.3, 0.5), limits));
    }

    #[test]
    fn test_oversized_box_rejected() {
        let limits = BoxLimits::default();
        assert!(!validate_box(&Xyxy::new(0.02, 0.1, 0.97, 0.5), limits));
        assert!(!validate_box(&Xyxy::new(0.4, 0.03, 0.6, 0.96), limits));
    }

    #[test]
    fn test_center_outside_span_is_far() {
        let l = line(0.2, 0.9, 0.8, 0.9);
        // center x = 0.1, bottom far below the line
        assert_eq!(classify_line_position(&Xyxy::new(0.05, 0.5, 0.15, 0.99), &l), Band::Far);
        // center x = 0.9
        assert_eq!(classify_line_position(&Xyxy::new(0.85, 0.5, 0.95, 0.99), &l), Band::Far);
    }

    #[test]
    fn test_horizontal_line_bands() {
        let l = line(0.3, 0.95, 0.7, 0.95);
        let at = |bottom: f64| Xyxy::new(0.45, bottom - 0.3, 0.55, bottom);

        assert_eq!(classify_line_position(&at(0.70), &l), Band::Far);
        assert_eq!(classify_line_position(&at(0.80), &l), Band::Near80);
        assert_eq!(classify_line_position(&at(0.90), &l), Band::Near90);
        assert_eq!(classify_line_position(&at(0.97), &l), Band::Crossed);
    }

    #[test]
    fn test_bottom_on_line_is_not_crossed() {
        let l = line(0.3, 0.95, 0.7, 0.95);
        let b = Xyxy::new(0.45, 0.6, 0.55, 0.95);
        assert_eq!(classify_line_position(&b, &l), Band::Near90);
    }

    #[test]
    fn test_sloped_line_interpolates() {
        // y rises from 0.5 at x=0.0 to 0.9 at x=1.0; at cx=0.5 the line is at 0.7
        let l = line(0.0, 0.5, 1.0, 0.9);
        let at = |bottom: f64| Xyxy::new(0.4, 0.1, 0.6, bottom);

        assert_eq!(classify_line_position(&at(0.71), &l), Band::Crossed);
        // y_90 = 0.2 + 0.45 = 0.65
        assert_eq!(classify_line_position(&at(0.66), &l), Band::Near90);
        // y_80 = 0.2 + 0.40 = 0.60
        assert_eq!(classify_line_position(&at(0.61), &l), Band::Near80);
        assert_eq!(classify_line_position(&at(0.59), &l), Band::Far);
    }

    #[test]
    fn test_center_on_span_boundary_faces_line() {
        let l = line(0.2, 0.9, 0.8, 0.9);
        let b = Xyxy::new(0.15, 0.5, 0.25, 0.95);
        assert_eq!(classify_line_position(&b, &l), Band::Crossed);
    }
}
