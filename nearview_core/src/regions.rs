//! Concentric interest regions around the platform.
//!
//! Regions partition [0, horizon] into rings with strictly increasing outer
//! radii, built once at startup and never restructured; only membership
//! changes. Each ring owns the ids of the tracks last classified into it and
//! carries a forget window that scales with distance: far objects are
//! detected intermittently, so outer rings tolerate longer unmatched gaps.
//! The ring sequence replaces the linked prev/next structure of older
//! trackers with a contiguous radius-sorted vector addressed by index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Index of a region within the ordered ring sequence.
pub type RegionId = usize;

// ============================================================================
// FORGET DEADLINE
// ============================================================================

/// Expiry point for an unmatched track.
///
/// Replaces the reserved numeric "never forget" constant with a tagged
/// variant that cannot be confused with a real timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ForgetDeadline {
    /// Explicitly exempt from time-based expiry
    Never,
    /// Eligible for removal once the frame clock passes this instant
    At(f64),
}

impl ForgetDeadline {
    /// Whether the deadline has elapsed at frame-clock instant `now`.
    pub fn is_due(&self, now: f64) -> bool {
        match self {
            ForgetDeadline::Never => false,
            ForgetDeadline::At(instant) => now > *instant,
        }
    }
}

// ============================================================================
// BEYOND-HORIZON POLICY
// ============================================================================

/// What to do with a track or detection farther than the outer horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeyondHorizon {
    /// Keep it, assigned to the outermost ring
    ClampToOutermost,
    /// Keep it in the outermost ring but mark it immediately eligible for
    /// forgetting
    Forget,
}

// ============================================================================
// INTEREST REGION
// ============================================================================

/// One ring-shaped spatial bucket.
#[derive(Debug, Clone)]
pub struct InterestRegion {
    pub id: RegionId,

    /// Outer boundary in meters; the inner boundary is the previous ring's radius
    pub radius: f64,

    /// How long a track in this ring may stay unmatched, in seconds
    pub forget_window: f64,

    /// Non-owning membership; tracks live in the tracker's arena
    pub track_ids: BTreeSet<u64>,
}

/// Where a distance landed when a track was (re)classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub region: RegionId,
    /// The distance exceeded the horizon and was clamped to the outermost ring
    pub beyond_horizon: bool,
}

/// Occupancy snapshot across all rings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionStats {
    pub total_regions: usize,
    pub total_tracked: usize,
    /// Member count per ring, innermost first
    pub per_region: Vec<usize>,
}

// ============================================================================
// REGION INDEX
// ============================================================================

/// The ordered collection of interest regions.
#[derive(Debug, Clone)]
pub struct RegionIndex {
    regions: Vec<InterestRegion>,
}

impl RegionIndex {
    /// Builds the ring sequence covering [0, `horizon`].
    ///
    /// Ring width and forget window both grow linearly with the ring index:
    /// ring i spans `initial_radius_step * (i + 1)` meters beyond its
    /// predecessor and tolerates `initial_time_step * (i + 1)` seconds
    /// unmatched. The outermost radius is clamped to exactly `horizon`.
    /// Callers validate the parameters; positive steps guarantee at least
    /// one ring and strictly increasing radii.
    pub fn new(horizon: f64, initial_radius_step: f64, initial_time_step: f64) -> Self {
        let mut regions = Vec::new();
        let mut radius = 0.0;
        let mut level = 0usize;

        while radius < horizon {
            radius += initial_radius_step * (level + 1) as f64;
            if radius > horizon {
                radius = horizon;
            }
            regions.push(InterestRegion {
                id: level,
                radius,
                forget_window: initial_time_step * (level + 1) as f64,
                track_ids: BTreeSet::new(),
            });
            level += 1;
        }

        Self { regions }
    }

    /// The ring whose band contains `distance`, or `None` past the horizon.
    ///
    /// Ring i owns the half-open band (radius(i-1), radius(i)]; distance 0
    /// belongs to the innermost ring.
    pub fn locate(&self, distance: f64) -> Option<RegionId> {
        let index = self.regions.partition_point(|r| r.radius < distance);
        if index < self.regions.len() {
            Some(index)
        } else {
            None
        }
    }

    /// Moves `track_id` into the ring owning `distance`.
    ///
    /// Membership leaves the previous ring's set and enters the new one.
    /// Beyond-horizon distances clamp to the outermost ring; the returned
    /// placement tells the caller so it can apply its beyond-horizon policy.
    pub fn assign(
        &mut self,
        track_id: u64,
        previous: Option<RegionId>,
        distance: f64,
    ) -> Placement {
        let (region, beyond_horizon) = match self.locate(distance) {
            Some(id) => (id, false),
            None => (self.regions.len().saturating_sub(1), true),
        };

        if previous != Some(region) {
            if let Some(prev) = previous {
                if let Some(ring) = self.regions.get_mut(prev) {
                    ring.track_ids.remove(&track_id);
                }
            }
            if let Some(ring) = self.regions.get_mut(region) {
                ring.track_ids.insert(track_id);
            }
        }

        Placement {
            region,
            beyond_horizon,
        }
    }

    /// Drops `track_id` from its ring on retirement.
    pub fn remove(&mut self, track_id: u64, region: Option<RegionId>) {
        if let Some(id) = region {
            if let Some(ring) = self.regions.get_mut(id) {
                ring.track_ids.remove(&track_id);
            }
        }
    }

    /// Track ids in the band containing `distance` plus the immediate
    /// neighboring rings, the association candidate scope.
    pub fn candidates_near(&self, distance: f64) -> Vec<u64> {
        if self.regions.is_empty() {
            return Vec::new();
        }

        let center = self
            .locate(distance)
            .unwrap_or(self.regions.len() - 1);
        let low = center.saturating_sub(1);
        let high = (center + 1).min(self.regions.len() - 1);

        let mut candidates = Vec::new();
        for ring in &self.regions[low..=high] {
            candidates.extend(ring.track_ids.iter().copied());
        }
        candidates
    }

    /// Forget window of a ring; rings unknown to this index never expire
    /// anything, so out-of-range ids report an infinite window.
    pub fn forget_window(&self, region: RegionId) -> f64 {
        self.regions
            .get(region)
            .map(|r| r.forget_window)
            .unwrap_or(f64::INFINITY)
    }

    pub fn regions(&self) -> &[InterestRegion] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Occupancy statistics across all rings.
    pub fn stats(&self) -> RegionStats {
        let per_region: Vec<usize> = self.regions.iter().map(|r| r.track_ids.len()).collect();
        RegionStats {
            total_regions: self.regions.len(),
            total_tracked: per_region.iter().sum(),
            per_region,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_radii_strictly_increase_and_cover_horizon() {
        let index = RegionIndex::new(100.0, 10.0, 2.0);

        // Widths 10, 20, 30, 40 accumulate to exactly the horizon.
        let radii: Vec<f64> = index.regions().iter().map(|r| r.radius).collect();
        assert_eq!(radii.len(), 4);
        for pair in radii.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_relative_eq!(radii[3], 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_outermost_radius_clamps_to_horizon() {
        let index = RegionIndex::new(25.0, 10.0, 1.0);

        // Widths 10, 20 would overshoot to 30; the last ring clamps.
        let radii: Vec<f64> = index.regions().iter().map(|r| r.radius).collect();
        assert_eq!(radii, vec![10.0, 25.0]);
    }

    #[test]
    fn test_forget_windows_grow_with_distance() {
        let index = RegionIndex::new(100.0, 10.0, 2.0);

        let windows: Vec<f64> = index.regions().iter().map(|r| r.forget_window).collect();
        assert_eq!(windows, vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_locate_band_boundaries() {
        let index = RegionIndex::new(100.0, 10.0, 2.0);

        assert_eq!(index.locate(0.0), Some(0));
        assert_eq!(index.locate(10.0), Some(0)); // band is (prev, radius]
        assert_eq!(index.locate(10.1), Some(1));
        assert_eq!(index.locate(100.0), Some(3));
        assert_eq!(index.locate(100.1), None);
    }

    #[test]
    fn test_assign_moves_membership_between_rings() {
        let mut index = RegionIndex::new(100.0, 10.0, 2.0);

        let placement = index.assign(7, None, 5.0);
        assert_eq!(placement.region, 0);
        assert!(!placement.beyond_horizon);
        assert!(index.regions()[0].track_ids.contains(&7));

        let placement = index.assign(7, Some(0), 45.0);
        assert_eq!(placement.region, 2);
        assert!(!index.regions()[0].track_ids.contains(&7));
        assert!(index.regions()[2].track_ids.contains(&7));
    }

    #[test]
    fn test_beyond_horizon_clamps_and_flags() {
        let mut index = RegionIndex::new(100.0, 10.0, 2.0);

        let placement = index.assign(3, None, 250.0);
        assert_eq!(placement.region, 3);
        assert!(placement.beyond_horizon);
        assert!(index.regions()[3].track_ids.contains(&3));
    }

    #[test]
    fn test_candidates_include_neighboring_rings_only() {
        let mut index = RegionIndex::new(100.0, 10.0, 2.0);
        index.assign(1, None, 5.0); // ring 0
        index.assign(2, None, 20.0); // ring 1
        index.assign(3, None, 50.0); // ring 2
        index.assign(4, None, 90.0); // ring 3

        // A distance in ring 1 sees rings 0..=2 but not ring 3.
        let candidates = index.candidates_near(25.0);
        assert!(candidates.contains(&1));
        assert!(candidates.contains(&2));
        assert!(candidates.contains(&3));
        assert!(!candidates.contains(&4));

        // Innermost distance sees rings 0..=1.
        let candidates = index.candidates_near(1.0);
        assert!(candidates.contains(&1));
        assert!(candidates.contains(&2));
        assert!(!candidates.contains(&3));
    }

    #[test]
    fn test_remove_clears_membership() {
        let mut index = RegionIndex::new(100.0, 10.0, 2.0);
        index.assign(9, None, 15.0);
        assert_eq!(index.stats().total_tracked, 1);

        index.remove(9, Some(1));
        assert_eq!(index.stats().total_tracked, 0);
    }

    #[test]
    fn test_forget_deadline_variants() {
        assert!(!ForgetDeadline::Never.is_due(1e12));
        assert!(!ForgetDeadline::At(5.0).is_due(5.0));
        assert!(ForgetDeadline::At(5.0).is_due(5.1));
    }
}
