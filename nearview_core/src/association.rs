//! Detection-to-track association.
//!
//! Greedy nearest-cost matching, scoped by interest region so a frame costs
//! detections x tracks-in-nearby-rings rather than the full cross product.
//! Costs are ephemeral edge records, produced and discarded within one frame.

use nalgebra::Point2;
use std::collections::{BTreeMap, BTreeSet};

use crate::regions::RegionIndex;
use crate::tracker::Track;
use crate::types::DetectedObject;

/// An ephemeral cost edge between one detection and one candidate track.
/// Lower cost is a better match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssociationCost {
    /// Index into the frame's detection sequence
    pub detection: usize,
    pub track: u64,
    pub cost: f64,
}

/// Result of one frame's matching step.
#[derive(Debug, Clone, Default)]
pub struct Associations {
    /// (detection index, track id) pairs
    pub matched: Vec<(usize, u64)>,
    pub unmatched_detections: Vec<usize>,
    pub unmatched_tracks: Vec<u64>,
}

/// Match cost between a detection and a track's last smoothed position.
///
/// Center-only mode is the plain Euclidean centroid distance. Extent mode
/// additionally measures every contour point of the detection and keeps the
/// closest approach, so large objects whose centroid jumps with partial
/// visibility still associate.
pub fn detection_cost(
    detection: &DetectedObject,
    track_position: Point2<f64>,
    center_only: bool,
) -> f64 {
    let mut cost = nalgebra::distance(&detection.position, &track_position);
    if !center_only {
        for point in &detection.contour {
            let approach = nalgebra::distance(point, &track_position);
            if approach < cost {
                cost = approach;
            }
        }
    }
    cost
}

/// Matches the frame's detections against the existing track population.
///
/// Greedy nearest-cost in detection input order: each detection claims the
/// cheapest unclaimed candidate track within `max_distance`; a claimed track
/// leaves candidacy for the rest of the frame. Candidates are the tracks in
/// the ring band containing the detection's range plus the immediately
/// neighboring rings, together with tracks not yet classified into a ring.
/// Exact cost ties break toward the lower track id, keeping runs
/// reproducible.
pub fn associate(
    detections: &[DetectedObject],
    tracks: &BTreeMap<u64, Track>,
    regions: &RegionIndex,
    max_distance: f64,
    center_only: bool,
) -> Associations {
    let mut result = Associations::default();
    let mut claimed: BTreeSet<u64> = BTreeSet::new();

    // Tracks awaiting their first classification are candidates everywhere.
    let unclassified: Vec<u64> = tracks
        .values()
        .filter(|track| track.region.is_none())
        .map(|track| track.id)
        .collect();

    for (index, detection) in detections.iter().enumerate() {
        let mut candidates = regions.candidates_near(detection.range());
        candidates.extend(unclassified.iter().copied());

        let mut best: Option<AssociationCost> = None;
        for track_id in candidates {
            if claimed.contains(&track_id) {
                continue;
            }
            let track = match tracks.get(&track_id) {
                Some(track) => track,
                None => continue,
            };

            let cost = detection_cost(detection, track.position(), center_only);
            if cost > max_distance {
                continue;
            }

            let better = match best {
                None => true,
                Some(current) => {
                    cost < current.cost || (cost == current.cost && track_id < current.track)
                }
            };
            if better {
                best = Some(AssociationCost {
                    detection: index,
                    track: track_id,
                    cost,
                });
            }
        }

        match best {
            Some(edge) => {
                claimed.insert(edge.track);
                result.matched.push((edge.detection, edge.track));
            }
            None => result.unmatched_detections.push(index),
        }
    }

    result.unmatched_tracks = tracks
        .keys()
        .filter(|id| !claimed.contains(id))
        .copied()
        .collect();

    result
}

// ============================================================================
// TESTS
// ============================================================================
