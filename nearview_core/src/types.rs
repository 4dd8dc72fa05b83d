//! Detection and platform-pose types, plus the reference-frame transform.
//!
//! Detections arrive in the world frame once per sensing tick. Before
//! association the tracker re-expresses them in the frame anchored at the
//! current platform pose, so every distance in the pipeline is a distance
//! from the platform.

use nalgebra::{Isometry2, Point2, Vector2};
use serde::{Deserialize, Serialize};

// ============================================================================
// DETECTED OBJECT (Input / Output)
// ============================================================================

/// One detected object report for the current frame.
///
/// Produced by the external detector each tick, consumed and annotated in
/// place by the tracker: position is smoothed, heading and speed are
/// estimated, and `track_id` records which track the report was folded into.
/// The class id and contour are an opaque payload; the core only reads the
/// contour when the extent-aware cost metric is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    /// Detector-local report id; not stable across frames
    pub id: u32,

    /// Position in meters; world frame on input, platform frame after transform
    pub position: Point2<f64>,

    /// Heading in radians
    pub heading: f64,

    /// Estimated ground speed in m/s, filled in by the tracker
    pub speed: f64,

    /// Object class, opaque to the core
    pub class_id: u8,

    /// Shape outline points; read only by the extent-aware cost metric
    pub contour: Vec<Point2<f64>>,

    /// Stable track id assigned after association
    pub track_id: Option<u64>,
}

impl DetectedObject {
    /// Creates a bare detection report with no contour.
    pub fn new(id: u32, x: f64, y: f64, heading: f64) -> Self {
        Self {
            id,
            position: Point2::new(x, y),
            heading,
            speed: 0.0,
            class_id: 0,
            contour: Vec::new(),
            track_id: None,
        }
    }

    /// Attaches a shape outline to the report.
    pub fn with_contour(mut self, contour: Vec<Point2<f64>>) -> Self {
        self.contour = contour;
        self
    }

    /// Distance from the frame origin (the platform, once transformed).
    #[inline]
    pub fn range(&self) -> f64 {
        self.position.coords.norm()
    }
}

// ============================================================================
// PLATFORM POSE
// ============================================================================

/// The platform's position and heading at the current tick.
///
/// Supplied externally once per frame and used only as the reference frame
/// for the coordinate transform; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlatformPose {
    pub x: f64,
    pub y: f64,
    /// Heading in radians
    pub heading: f64,
}

impl PlatformPose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    /// The rigid transform carrying platform-frame points into the world frame.
    pub fn to_isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x, self.y), self.heading)
    }

    /// A pose with any non-finite field cannot anchor a frame.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.heading.is_finite()
    }
}

// ============================================================================
// FRAME TRANSFORM
// ============================================================================

/// Re-expresses a detection in the frame anchored at `pose`.
///
/// Applies the inverse of the pose isometry to the position and every
/// contour point, and subtracts the pose heading from the detection heading,
/// wrapped to (-pi, pi].
pub fn transform_to_frame(pose: &PlatformPose, obj: &mut DetectedObject) {
    let iso = pose.to_isometry();
    obj.position = iso.inverse_transform_point(&obj.position);
    for point in &mut obj.contour {
        *point = iso.inverse_transform_point(point);
    }
    obj.heading = normalize_angle(obj.heading - pose.heading);
}

/// Wraps an angle to (-pi, pi].
pub fn normalize_angle(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};

    let mut wrapped = angle % TAU;
    if wrapped <= -PI {
        wrapped += TAU;
    } else if wrapped > PI {
        wrapped -= TAU;
    }
    wrapped
}

// ============================================================================
// TESTS
// ============================================================================
