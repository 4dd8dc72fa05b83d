//! Nearview Core - per-frame multi-object tracking for a moving platform
//!
//! Given the platform pose and a batch of raw detections each sensing tick,
//! this library maintains temporally-consistent object identities, smooths
//! positions, estimates velocity and heading, and discards stale tracks.
//! Three pieces do the work:
//! 1. **Estimation**: a constant-velocity Kalman state per track
//! 2. **Regions**: concentric interest rings that bound association cost and
//!    carry distance-dependent staleness policy
//! 3. **Association**: greedy nearest-cost matching scoped by ring
//!
//! `ObjectTracker::step` orchestrates all of it, once per frame.

pub mod association;
pub mod estimator;
pub mod regions;
pub mod tracker;
pub mod types;

// Re-export key types for convenience
pub use association::{associate, detection_cost, AssociationCost, Associations};
pub use estimator::{Smoothed, VelocityEstimator};
pub use regions::{
    BeyondHorizon, ForgetDeadline, InterestRegion, Placement, RegionId, RegionIndex, RegionStats,
};
pub use tracker::{ObjectTracker, Track, TrackError, TrackerConfig};
pub use types::{normalize_angle, transform_to_frame, DetectedObject, PlatformPose};
