//! The per-frame tracking orchestrator.
//!
//! `ObjectTracker::step` is the single entry point, called once per sensing
//! tick: transform detections into the platform frame, associate them
//! against the track population, update matched tracks, spawn tracks for
//! unmatched detections, retire stale tracks, and expose the annotated
//! object list. The whole step is pure in-memory computation; the track
//! population is mutated by nothing else.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::association;
use crate::estimator::VelocityEstimator;
use crate::regions::{
    BeyondHorizon, ForgetDeadline, RegionId, RegionIndex, RegionStats,
};
use crate::types::{transform_to_frame, DetectedObject, PlatformPose};

// ============================================================================
// ERRORS
// ============================================================================

/// Errors surfaced by the tracker.
///
/// There are no fatal conditions in normal operation; the tracker degrades
/// (loses a track, fails to associate) rather than halts. An error from
/// `step` means the tick was skipped with no state mutation.
#[derive(Debug, Clone, Error)]
pub enum TrackError {
    #[error("platform pose is not finite: ({x}, {y}, {heading})")]
    InvalidPose { x: f64, y: f64, heading: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the tracker, fixed at construction.
///
/// Every numeric threshold is a named field here; nothing is a compile-time
/// global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Maximum tracked distance from the platform, meters
    pub horizon: f64,

    /// Width of the innermost interest ring, meters (outer rings widen)
    pub region_radius_step: f64,

    /// Forget window of the innermost interest ring, seconds (outer rings
    /// tolerate longer gaps)
    pub region_time_step: f64,

    /// Frame period, seconds
    pub dt: f64,

    /// Maximum cost for a detection-track match, meters
    pub max_association_distance: f64,

    /// Unmatched tracks retained after a frame, at most
    pub max_tracks_after_losing: usize,

    /// Match on centroid distance only; otherwise contour points participate
    pub use_center_only: bool,

    /// How long an unmatched track survives before retirement, seconds
    pub max_keep_time: f64,

    /// Policy for detections and tracks past the horizon
    pub beyond_horizon: BeyondHorizon,

    /// Give fresh tracks no forget deadline instead of `max_keep_time`.
    /// Legacy behavior of the predecessor tracker; off by default because a
    /// track that never matches again would otherwise live forever.
    pub new_track_never_forgets: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            horizon: 100.0,
            region_radius_step: 10.0,
            region_time_step: 1.0,
            dt: 0.1,
            max_association_distance: 4.0,
            max_tracks_after_losing: 50,
            use_center_only: true,
            max_keep_time: 2.0,
            beyond_horizon: BeyondHorizon::ClampToOutermost,
            new_track_never_forgets: false,
        }
    }
}

impl TrackerConfig {
    /// Rejects geometry and timing fields that cannot build a ring sequence
    /// or drive the estimator.
    pub fn validate(&self) -> Result<(), TrackError> {
        let positives = [
            ("horizon", self.horizon),
            ("region_radius_step", self.region_radius_step),
            ("region_time_step", self.region_time_step),
            ("dt", self.dt),
            ("max_association_distance", self.max_association_distance),
            ("max_keep_time", self.max_keep_time),
        ];
        for (name, value) in positives {
            if !value.is_finite() || value <= 0.0 {
                return Err(TrackError::InvalidConfig(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// TRACK
// ============================================================================

/// One continuously-tracked object.
///
/// Tracks live in the orchestrator's arena keyed by id; ring membership
/// references them by id and owns nothing. Identifiers are monotonically
/// assigned and never reused for the process lifetime.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,

    /// Owned state estimator; its life counter gates velocity validity
    pub estimator: VelocityEstimator,

    /// Ring this track was last classified into; `None` before the first
    /// classification
    pub region: Option<RegionId>,

    /// When this track becomes eligible for removal if unmatched
    pub forget_deadline: ForgetDeadline,

    /// Frame-clock instant of creation or the last successful update
    pub last_update: f64,

    /// Last annotated detection snapshot
    pub object: DetectedObject,
}

impl Track {
    pub(crate) fn new(
        id: u64,
        object: DetectedObject,
        dt: f64,
        now: f64,
        forget_deadline: ForgetDeadline,
    ) -> Self {
        let estimator =
            VelocityEstimator::new(object.position.x, object.position.y, object.heading, dt);
        Self {
            id,
            estimator,
            region: None,
            forget_deadline,
            last_update: now,
            object,
        }
    }

    /// Successful updates applied so far.
    #[inline]
    pub fn life(&self) -> u32 {
        self.estimator.life()
    }

    /// Last smoothed position, platform frame.
    #[inline]
    pub fn position(&self) -> Point2<f64> {
        self.estimator.position()
    }
}

// ============================================================================
// OBJECT TRACKER
// ============================================================================

/// The per-frame multi-object tracker.
pub struct ObjectTracker {
    config: TrackerConfig,

    /// Ordered ring sequence; membership only, radii fixed at construction
    regions: RegionIndex,

    /// Authoritative track arena; ordered so iteration is deterministic
    tracks: BTreeMap<u64, Track>,

    /// Next track identifier; monotonic, never reused
    next_track_id: u64,

    /// Frame clock; advances by `dt` per accepted step, no wall clock
    now: f64,

    /// Annotated output of the last accepted step
    objects: Vec<DetectedObject>,

    /// Previous frame's pose and raw detections
    prev_pose: Option<PlatformPose>,
    prev_detections: Vec<DetectedObject>,
}

impl ObjectTracker {
    /// Creates a tracker, building the ring sequence from the configuration.
    pub fn new(config: TrackerConfig) -> Result<Self, TrackError> {
        config.validate()?;
        let regions = RegionIndex::new(
            config.horizon,
            config.region_radius_step,
            config.region_time_step,
        );
        Ok(Self {
            config,
            regions,
            tracks: BTreeMap::new(),
            next_track_id: 1,
            now: 0.0,
            objects: Vec::new(),
            prev_pose: None,
            prev_detections: Vec::new(),
        })
    }

    /// Runs one tracking step for the current sensing tick.
    ///
    /// A malformed pose aborts before any mutation: the previous frame's
    /// track population, clock, and output remain untouched. An empty
    /// detection slice is a valid frame in which every track ages one step.
    /// Returns the detection sequence annotated with smoothed position,
    /// estimated heading and speed, and the owning track id.
    pub fn step(
        &mut self,
        pose: &PlatformPose,
        detections: &[DetectedObject],
    ) -> Result<&[DetectedObject], TrackError> {
        if !pose.is_finite() {
            return Err(TrackError::InvalidPose {
                x: pose.x,
                y: pose.y,
                heading: pose.heading,
            });
        }

        self.now += self.config.dt;

        // Stage 1: into the platform frame.
        let mut frame_objects: Vec<DetectedObject> = detections.to_vec();
        for obj in &mut frame_objects {
            transform_to_frame(pose, obj);
        }

        // Stage 2: association, scoped by ring membership.
        let assoc = association::associate(
            &frame_objects,
            &self.tracks,
            &self.regions,
            self.config.max_association_distance,
            self.config.use_center_only,
        );

        // Stage 3: matched tracks absorb their detections.
        for &(index, track_id) in &assoc.matched {
            self.update_track(track_id, &mut frame_objects[index]);
        }

        // Stage 4: unmatched detections spawn tracks.
        for &index in &assoc.unmatched_detections {
            self.create_track(&mut frame_objects[index]);
        }

        // Stage 5: unmatched tracks age and may retire.
        self.retire_stale(&assoc.unmatched_tracks);

        // Stage 6: expose results and snapshot the frame.
        self.objects = frame_objects;
        self.prev_pose = Some(*pose);
        self.prev_detections = detections.to_vec();

        Ok(&self.objects)
    }

    /// Folds a matched detection into its track and annotates it in place.
    fn update_track(&mut self, track_id: u64, obj: &mut DetectedObject) {
        let track = match self.tracks.get_mut(&track_id) {
            Some(track) => track,
            None => return,
        };

        let smoothed = track
            .estimator
            .update(obj.position.x, obj.position.y, obj.heading);
        obj.position = Point2::new(smoothed.x, smoothed.y);
        obj.heading = smoothed.heading;
        obj.speed = smoothed.speed;
        obj.track_id = Some(track_id);

        let placement = self.regions.assign(track_id, track.region, obj.range());
        track.region = Some(placement.region);
        track.last_update = self.now;
        track.forget_deadline =
            if placement.beyond_horizon && self.config.beyond_horizon == BeyondHorizon::Forget {
                ForgetDeadline::At(self.now)
            } else {
                ForgetDeadline::At(self.now + self.config.max_keep_time)
            };
        track.object = obj.clone();
    }

    /// Spawns a track for a detection nothing claimed.
    fn create_track(&mut self, obj: &mut DetectedObject) {
        let id = self.next_track_id;
        self.next_track_id += 1;

        let forget_deadline = if self.config.new_track_never_forgets {
            ForgetDeadline::Never
        } else {
            ForgetDeadline::At(self.now + self.config.max_keep_time)
        };
        let mut track = Track::new(id, obj.clone(), self.config.dt, self.now, forget_deadline);

        // The spawning detection is the track's first observation; it runs
        // through the estimator so the report leaves annotated like any
        // other (speed zero, heading echoed, under the validity gate).
        let smoothed = track
            .estimator
            .update(obj.position.x, obj.position.y, obj.heading);
        obj.position = Point2::new(smoothed.x, smoothed.y);
        obj.heading = smoothed.heading;
        obj.speed = smoothed.speed;
        obj.track_id = Some(id);

        let placement = self.regions.assign(id, None, obj.range());
        track.region = Some(placement.region);
        if placement.beyond_horizon && self.config.beyond_horizon == BeyondHorizon::Forget {
            track.forget_deadline = ForgetDeadline::At(self.now);
        }
        track.object = obj.clone();

        self.tracks.insert(id, track);
    }

    /// Retires unmatched tracks whose deadline elapsed and enforces the
    /// retained-count bound.
    fn retire_stale(&mut self, unmatched: &[u64]) {
        let mut survivors: Vec<(f64, u64)> = Vec::new();
        let mut expired: Vec<u64> = Vec::new();

        for &id in unmatched {
            let track = match self.tracks.get(&id) {
                Some(track) => track,
                None => continue,
            };

            // A track expires on its own deadline or on its ring's window,
            // whichever elapses first; `Never` is exempt from both.
            let time_expired = match track.forget_deadline {
                ForgetDeadline::Never => false,
                ForgetDeadline::At(instant) => {
                    let region_due = match track.region {
                        Some(region) => {
                            self.now - track.last_update > self.regions.forget_window(region)
                        }
                        None => false,
                    };
                    self.now > instant || region_due
                }
            };

            if time_expired {
                expired.push(id);
            } else {
                survivors.push((track.last_update, id));
            }
        }

        for id in expired {
            self.remove_track(id);
        }

        // Count bound: keep the most recently updated survivors, lower id on
        // equal recency.
        if survivors.len() > self.config.max_tracks_after_losing {
            survivors.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
            let overflow: Vec<u64> = survivors[self.config.max_tracks_after_losing..]
                .iter()
                .map(|&(_, id)| id)
                .collect();
            for id in overflow {
                self.remove_track(id);
            }
        }
    }

    fn remove_track(&mut self, id: u64) {
        if let Some(track) = self.tracks.remove(&id) {
            self.regions.remove(id, track.region);
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Looks up a track by id; unknown ids are `None`, never an error.
    pub fn find_track(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// The annotated object list from the last accepted step.
    pub fn objects(&self) -> &[DetectedObject] {
        &self.objects
    }

    /// All live tracks, in id order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn regions(&self) -> &RegionIndex {
        &self.regions
    }

    /// Ring occupancy statistics.
    pub fn region_stats(&self) -> RegionStats {
        self.regions.stats()
    }

    /// Frame-clock time of the last accepted step, seconds.
    pub fn frame_time(&self) -> f64 {
        self.now
    }

    /// Pose of the previous accepted frame.
    pub fn previous_pose(&self) -> Option<&PlatformPose> {
        self.prev_pose.as_ref()
    }

    /// Raw (untransformed) detections of the previous accepted frame.
    pub fn previous_detections(&self) -> &[DetectedObject] {
        &self.prev_detections
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_config() -> TrackerConfig {
        TrackerConfig {
            horizon: 100.0,
            region_radius_step: 10.0,
            region_time_step: 10.0,
            dt: 1.0,
            max_association_distance: 2.0,
            max_tracks_after_losing: 10,
            use_center_only: true,
            max_keep_time: 2.0,
            beyond_horizon: BeyondHorizon::ClampToOutermost,
            new_track_never_forgets: false,
        }
    }

    fn origin() -> PlatformPose {
        PlatformPose::new(0.0, 0.0, 0.0)
    }

    #[test]
    fn test_first_detection_spawns_track_with_zero_speed() {
        let mut tracker = ObjectTracker::new(test_config()).unwrap();

        let objects = tracker
            .step(&origin(), &[DetectedObject::new(0, 10.0, 0.0, 0.0)])
            .unwrap();

        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].track_id, Some(1));
        assert_eq!(objects[0].speed, 0.0);
        assert_eq!(tracker.track_count(), 1);
        assert_eq!(tracker.find_track(1).map(|t| t.life()), Some(1));
    }

    #[test]
    fn test_four_frame_lifecycle() {
        // The canonical walkthrough: spawn, two gated updates, one moving
        // update past the validity gate, then starvation to retirement.
        let mut tracker = ObjectTracker::new(test_config()).unwrap();
        let pose = origin();

        tracker
            .step(&pose, &[DetectedObject::new(0, 10.0, 0.0, 0.0)])
            .unwrap();
        assert_eq!(tracker.find_track(1).map(|t| t.life()), Some(1));

        let frame2 = tracker
            .step(&pose, &[DetectedObject::new(0, 10.0, 0.0, 0.0)])
            .unwrap();
        assert_eq!(frame2[0].track_id, Some(1));
        assert_eq!(frame2[0].speed, 0.0);

        let frame3 = tracker
            .step(&pose, &[DetectedObject::new(0, 10.5, 0.0, 0.0)])
            .unwrap();
        assert_eq!(frame3[0].track_id, Some(1));
        assert!(frame3[0].speed > 0.0 && frame3[0].speed < 1.0);
        assert_relative_eq!(frame3[0].heading, 0.0, epsilon = 1e-9);
        assert_eq!(tracker.find_track(1).map(|t| t.life()), Some(3));

        // Starve: deadline is frame-3 time + max_keep_time = 5.0. The track
        // survives while now <= 5 and is gone on the first step past it.
        tracker.step(&pose, &[]).unwrap(); // now = 4
        tracker.step(&pose, &[]).unwrap(); // now = 5
        assert!(tracker.find_track(1).is_some());
        tracker.step(&pose, &[]).unwrap(); // now = 6
        assert!(tracker.find_track(1).is_none());
        assert_eq!(tracker.track_count(), 0);
    }

    #[test]
    fn test_detection_past_threshold_spawns_new_track() {
        let mut tracker = ObjectTracker::new(test_config()).unwrap();
        let pose = origin();

        tracker
            .step(&pose, &[DetectedObject::new(0, 10.0, 0.0, 0.0)])
            .unwrap();
        let objects = tracker
            .step(&pose, &[DetectedObject::new(0, 13.0, 0.0, 0.0)])
            .unwrap();

        // Cost 3.0 exceeds the 2.0 threshold: no match, fresh identity.
        assert_eq!(objects[0].track_id, Some(2));
        assert_eq!(tracker.track_count(), 2);
    }

    #[test]
    fn test_track_ids_are_never_reused() {
        let mut tracker = ObjectTracker::new(test_config()).unwrap();
        let pose = origin();

        tracker
            .step(&pose, &[DetectedObject::new(0, 10.0, 0.0, 0.0)])
            .unwrap();
        // Starve track 1 out entirely.
        for _ in 0..4 {
            tracker.step(&pose, &[]).unwrap();
        }
        assert_eq!(tracker.track_count(), 0);

        let objects = tracker
            .step(&pose, &[DetectedObject::new(0, 10.0, 0.0, 0.0)])
            .unwrap();
        assert_eq!(objects[0].track_id, Some(2));
    }

    #[test]
    fn test_unmatched_count_bound_keeps_lower_ids_on_tie() {
        let mut config = test_config();
        config.max_tracks_after_losing = 2;
        let mut tracker = ObjectTracker::new(config).unwrap();
        let pose = origin();

        let detections: Vec<DetectedObject> = (0..5)
            .map(|i| DetectedObject::new(i, 10.0 + 10.0 * i as f64, 0.0, 0.0))
            .collect();
        tracker.step(&pose, &detections).unwrap();
        assert_eq!(tracker.track_count(), 5);

        // Everything unmatched with equal recency: the two lowest ids stay.
        tracker.step(&pose, &[]).unwrap();
        assert_eq!(tracker.track_count(), 2);
        assert!(tracker.find_track(1).is_some());
        assert!(tracker.find_track(2).is_some());
        assert!(tracker.find_track(3).is_none());
    }

    #[test]
    fn test_invalid_pose_skips_mutation() {
        let mut tracker = ObjectTracker::new(test_config()).unwrap();
        tracker
            .step(&origin(), &[DetectedObject::new(0, 10.0, 0.0, 0.0)])
            .unwrap();
        let time_before = tracker.frame_time();

        let bad = PlatformPose::new(f64::NAN, 0.0, 0.0);
        let result = tracker.step(&bad, &[DetectedObject::new(0, 50.0, 0.0, 0.0)]);
        assert!(matches!(result, Err(TrackError::InvalidPose { .. })));

        // The rejected tick left everything untouched.
        assert_eq!(tracker.track_count(), 1);
        assert_eq!(tracker.frame_time(), time_before);
        assert_eq!(tracker.objects().len(), 1);
    }

    #[test]
    fn test_region_follows_track_outward() {
        let mut config = test_config();
        config.max_association_distance = 20.0;
        let mut tracker = ObjectTracker::new(config).unwrap();
        let pose = origin();

        tracker
            .step(&pose, &[DetectedObject::new(0, 8.0, 0.0, 0.0)])
            .unwrap();
        assert_eq!(tracker.find_track(1).and_then(|t| t.region), Some(0));

        tracker
            .step(&pose, &[DetectedObject::new(0, 25.0, 0.0, 0.0)])
            .unwrap();
        let track = tracker.find_track(1).unwrap();
        assert_eq!(track.region, Some(1));

        // Membership is consistent with the ring that owns the distance.
        let located = tracker.regions().locate(track.position().coords.norm());
        assert_eq!(track.region, located);
        assert!(tracker.regions().regions()[1].track_ids.contains(&1));
        assert!(!tracker.regions().regions()[0].track_ids.contains(&1));
    }

    #[test]
    fn test_beyond_horizon_forget_policy() {
        let mut config = test_config();
        config.beyond_horizon = BeyondHorizon::Forget;
        let mut tracker = ObjectTracker::new(config).unwrap();
        let pose = origin();

        tracker
            .step(&pose, &[DetectedObject::new(0, 150.0, 0.0, 0.0)])
            .unwrap();
        assert_eq!(tracker.track_count(), 1);

        // Immediately eligible: gone on the next unmatched step.
        tracker.step(&pose, &[]).unwrap();
        assert_eq!(tracker.track_count(), 0);
    }

    #[test]
    fn test_never_forget_track_survives_starvation() {
        let mut config = test_config();
        config.new_track_never_forgets = true;
        let mut tracker = ObjectTracker::new(config).unwrap();
        let pose = origin();

        tracker
            .step(&pose, &[DetectedObject::new(0, 10.0, 0.0, 0.0)])
            .unwrap();
        for _ in 0..20 {
            tracker.step(&pose, &[]).unwrap();
        }
        assert!(tracker.find_track(1).is_some());
    }

    #[test]
    fn test_region_window_expires_before_own_deadline() {
        // Inner ring window (1s) is tighter than max_keep_time (10s); the
        // ring policy wins.
        let mut config = test_config();
        config.region_time_step = 1.0;
        config.max_keep_time = 10.0;
        let mut tracker = ObjectTracker::new(config).unwrap();
        let pose = origin();

        tracker
            .step(&pose, &[DetectedObject::new(0, 5.0, 0.0, 0.0)])
            .unwrap();
        tracker.step(&pose, &[]).unwrap(); // 1s unmatched, window not exceeded
        assert!(tracker.find_track(1).is_some());
        tracker.step(&pose, &[]).unwrap(); // 2s unmatched, window exceeded
        assert!(tracker.find_track(1).is_none());
    }

    #[test]
    fn test_determinism_bit_for_bit() {
        let frames: Vec<(PlatformPose, Vec<DetectedObject>)> = (0..20)
            .map(|i| {
                let pose = PlatformPose::new(0.1 * i as f64, 0.0, 0.01 * i as f64);
                let detections = vec![
                    DetectedObject::new(0, 10.0 + 0.5 * i as f64, 3.0, 0.2),
                    DetectedObject::new(1, -20.0, 0.3 * i as f64, 1.0),
                ];
                (pose, detections)
            })
            .collect();

        let mut first = ObjectTracker::new(test_config()).unwrap();
        let mut second = ObjectTracker::new(test_config()).unwrap();

        for (pose, detections) in &frames {
            let a = first.step(pose, detections).unwrap().to_vec();
            let b = second.step(pose, detections).unwrap().to_vec();
            assert_eq!(a, b);
        }

        let first_ids: Vec<u64> = first.tracks().map(|t| t.id).collect();
        let second_ids: Vec<u64> = second.tracks().map(|t| t.id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn test_previous_frame_snapshot() {
        let mut tracker = ObjectTracker::new(test_config()).unwrap();
        let pose = PlatformPose::new(3.0, 4.0, 0.5);
        let detections = vec![DetectedObject::new(7, 30.0, 0.0, 0.0)];

        tracker.step(&pose, &detections).unwrap();

        assert_eq!(tracker.previous_pose(), Some(&pose));
        // The snapshot keeps the raw world-frame input, not the transform.
        assert_eq!(tracker.previous_detections(), detections.as_slice());
    }

    #[test]
    fn test_find_track_miss_is_none() {
        let tracker = ObjectTracker::new(test_config()).unwrap();
        assert!(tracker.find_track(42).is_none());
    }

    #[test]
    fn test_config_validation_rejects_degenerate_fields() {
        let config = TrackerConfig {
            horizon: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            ObjectTracker::new(config),
            Err(TrackError::InvalidConfig(_))
        ));

        let config = TrackerConfig {
            dt: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            ObjectTracker::new(config),
            Err(TrackError::InvalidConfig(_))
        ));
    }
}
