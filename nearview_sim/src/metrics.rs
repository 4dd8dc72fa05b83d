//! Ground-truth comparison for simulator runs.
//!
//! Collects tracker output against the oracle's true positions frame by
//! frame and reduces it to the numbers a run is judged on: position RMSE,
//! coverage, and identity switches.

use nalgebra::Point2;
use nearview_core::{DetectedObject, PlatformPose};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Accumulates per-frame comparisons between tracker output and ground truth.
pub struct MetricsSession {
    /// Ground-truth entity -> track id currently bound to it
    identity: BTreeMap<u64, u64>,

    /// Outputs farther than this from every entity are ghosts and ignored
    association_threshold: f64,

    error_sum_squared: f64,
    samples: usize,
    max_error: f64,
    identity_switches: usize,
    entities_seen: BTreeSet<u64>,
    entities_tracked: BTreeSet<u64>,
    frames: usize,
}

impl MetricsSession {
    pub fn new(association_threshold: f64) -> Self {
        Self {
            identity: BTreeMap::new(),
            association_threshold,
            error_sum_squared: 0.0,
            samples: 0,
            max_error: 0.0,
            identity_switches: 0,
            entities_seen: BTreeSet::new(),
            entities_tracked: BTreeSet::new(),
            frames: 0,
        }
    }

    /// Records one frame of tracker output.
    ///
    /// Ground truth arrives in the world frame and is re-expressed in the
    /// platform frame the tracker reports in. Each output is charged against
    /// its nearest entity; a switch of the track id bound to an entity counts
    /// as one identity switch.
    pub fn record_frame(
        &mut self,
        pose: &PlatformPose,
        ground_truth: &[(u64, Point2<f64>)],
        outputs: &[DetectedObject],
    ) {
        self.frames += 1;

        let iso = pose.to_isometry();
        let local: Vec<(u64, Point2<f64>)> = ground_truth
            .iter()
            .map(|(id, position)| (*id, iso.inverse_transform_point(position)))
            .collect();
        for (id, _) in &local {
            self.entities_seen.insert(*id);
        }

        for output in outputs {
            let track_id = match output.track_id {
                Some(id) => id,
                None => continue,
            };

            let mut best: Option<(u64, f64)> = None;
            for (entity, position) in &local {
                let error = nalgebra::distance(&output.position, position);
                if best.map_or(true, |(_, current)| error < current) {
                    best = Some((*entity, error));
                }
            }
            let (entity, error) = match best {
                Some(pair) => pair,
                None => continue,
            };
            if error > self.association_threshold {
                continue; // ghost
            }

            self.entities_tracked.insert(entity);
            self.samples += 1;
            self.error_sum_squared += error * error;
            if error > self.max_error {
                self.max_error = error;
            }

            match self.identity.get(&entity) {
                Some(&bound) if bound != track_id => {
                    self.identity_switches += 1;
                    self.identity.insert(entity, track_id);
                }
                None => {
                    self.identity.insert(entity, track_id);
                }
                _ => {}
            }
        }
    }

    /// Root mean square position error over all recorded samples.
    pub fn rmse(&self) -> f64 {
        if self.samples > 0 {
            (self.error_sum_squared / self.samples as f64).sqrt()
        } else {
            0.0
        }
    }

    /// Percentage of seen entities that were tracked at least once.
    pub fn coverage(&self) -> f64 {
        if self.entities_seen.is_empty() {
            0.0
        } else {
            self.entities_tracked.len() as f64 / self.entities_seen.len() as f64 * 100.0
        }
    }

    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            frames: self.frames,
            samples: self.samples,
            rmse: self.rmse(),
            max_error: self.max_error,
            coverage_percent: self.coverage(),
            identity_switches: self.identity_switches,
        }
    }
}

/// Final reduced metrics for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub frames: usize,
    pub samples: usize,
    pub rmse: f64,
    pub max_error: f64,
    pub coverage_percent: f64,
    pub identity_switches: usize,
}
