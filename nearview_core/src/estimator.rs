//! Constant-velocity state estimator, one instance per tracked object.
//!
//! A self-contained 4-state Kalman filter over [x, y, vx, vy] with a fixed
//! frame period. The correction runs against the position measurement only;
//! velocity is inferred through the transition model. The reported speed is
//! gated on a minimum observation count so a single noisy fix never shows up
//! as motion, and heading is derived from the smoothed displacement rather
//! than the raw per-frame orientation.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Point2, Vector2, Vector4};

/// Speeds below this are indistinguishable from position jitter and clamp to zero.
const MIN_SPEED: f64 = 0.1;

/// Updates the estimator must complete before its velocity is trusted.
const SPEED_VALID_LIFE: u32 = 2;

/// Diagonal magnitude of the measurement noise R.
const MEASUREMENT_NOISE: f64 = 1e-4;

/// Diagonal magnitude of the process noise Q.
const PROCESS_NOISE: f64 = 1e-4;

/// Diagonal magnitude of the initial estimate covariance.
const INITIAL_COVARIANCE: f64 = 0.075;

// ============================================================================
// SMOOTHED OUTPUT
// ============================================================================

/// Output of one estimation cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothed {
    pub x: f64,
    pub y: f64,
    /// Displacement-derived heading once speed is valid; echoed input before
    pub heading: f64,
    /// Euclidean norm of the estimated velocity; zero until valid
    pub speed: f64,
}

// ============================================================================
// VELOCITY ESTIMATOR
// ============================================================================

/// Recursive constant-velocity estimator for a single object.
#[derive(Debug, Clone)]
pub struct VelocityEstimator {
    /// Current state [x, y, vx, vy]; a prediction between updates
    state: Vector4<f64>,

    /// Current estimate covariance
    covariance: Matrix4<f64>,

    /// State transition F; position advances by velocity * dt each step
    transition: Matrix4<f64>,

    /// Observation H; only position is measured
    observation: Matrix2x4<f64>,

    /// Process noise Q
    process_noise: Matrix4<f64>,

    /// Measurement noise R
    measurement_noise: Matrix2<f64>,

    /// Last smoothed position, anchoring the displacement heading
    prev_x: f64,
    prev_y: f64,

    /// Last reported heading, held across degenerate displacements
    prev_heading: f64,

    /// Successful update count; gates velocity validity
    life: u32,
}

impl VelocityEstimator {
    /// Creates an estimator at the given position with zero velocity.
    ///
    /// Ends with a prediction so the first [`update`](Self::update) corrects
    /// against a predicted state. Always succeeds for finite inputs.
    pub fn new(x: f64, y: f64, heading: f64, dt: f64) -> Self {
        let mut transition = Matrix4::identity();
        transition[(0, 2)] = dt;
        transition[(1, 3)] = dt;

        let mut estimator = Self {
            state: Vector4::new(x, y, 0.0, 0.0),
            covariance: Matrix4::identity() * INITIAL_COVARIANCE,
            transition,
            observation: Matrix2x4::identity(),
            process_noise: Matrix4::identity() * PROCESS_NOISE,
            measurement_noise: Matrix2::identity() * MEASUREMENT_NOISE,
            prev_x: x,
            prev_y: y,
            prev_heading: heading,
            life: 0,
        };
        estimator.predict();
        estimator
    }

    /// Runs one correct-then-predict cycle against an observed position.
    ///
    /// Speed reports as zero and the input heading is echoed until more than
    /// two updates have completed; valid speed below 0.1 m/s clamps to
    /// exactly zero. Heading never degrades to NaN: a coincident
    /// displacement holds the previous heading.
    pub fn update(&mut self, x: f64, y: f64, heading: f64) -> Smoothed {
        let measurement = Vector2::new(x, y);

        // Correct: K = P H^T (H P H^T + R)^-1
        let innovation = measurement - self.observation * self.state;
        let innovation_cov =
            self.observation * self.covariance * self.observation.transpose()
                + self.measurement_noise;
        if let Some(s_inv) = innovation_cov.try_inverse() {
            let gain = self.covariance * self.observation.transpose() * s_inv;
            self.state += gain * innovation;
            self.covariance =
                (Matrix4::identity() - gain * self.observation) * self.covariance;
        }
        // A singular innovation covariance leaves the prediction standing;
        // R > 0 keeps this branch unreachable in practice.

        self.life += 1;

        let x_new = self.state[0];
        let y_new = self.state[1];

        let mut smoothed = Smoothed {
            x: x_new,
            y: y_new,
            heading,
            speed: 0.0,
        };

        if self.life > SPEED_VALID_LIFE {
            let speed = self.state[2].hypot(self.state[3]);
            smoothed.speed = if speed < MIN_SPEED { 0.0 } else { speed };

            let dx = x_new - self.prev_x;
            let dy = y_new - self.prev_y;
            smoothed.heading = if dx == 0.0 && dy == 0.0 {
                self.prev_heading
            } else {
                dy.atan2(dx)
            };
        }

        self.prev_x = x_new;
        self.prev_y = y_new;
        self.prev_heading = smoothed.heading;

        // Roll forward so the next correction runs against a prediction.
        self.predict();

        smoothed
    }

    /// Advances the state one frame under the constant-velocity model.
    fn predict(&mut self) {
        self.state = self.transition * self.state;
        self.covariance =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;
    }

    /// Number of updates applied so far.
    #[inline]
    pub fn life(&self) -> u32 {
        self.life
    }

    /// The last smoothed position (not the rolling prediction).
    #[inline]
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.prev_x, self.prev_y)
    }

    /// Current velocity estimate.
    #[inline]
    pub fn velocity(&self) -> Vector2<f64> {
        Vector2::new(self.state[2], self.state[3])
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
    fn test_stationary_target_converges_to_zero_speed() {
        let mut estimator = VelocityEstimator::new(10.0, 0.0, 0.0, 1.0);

        // Noise-free identical detections: innovation is zero from the first
        // correction on, so position and speed are exact.
        for _ in 0..5 {
            let smoothed = estimator.update(10.0, 0.0, 0.0);
            assert_eq!(smoothed.speed, 0.0);
            assert_relative_eq!(smoothed.x, 10.0, epsilon = 1e-9);
            assert_relative_eq!(smoothed.y, 0.0, epsilon = 1e-9);
        }
        assert_eq!(estimator.life(), 5);
    }

    #[test]
    fn test_speed_invalid_before_three_updates() {
        let mut estimator = VelocityEstimator::new(0.0, 0.0, 0.0, 1.0);

        // Large jumps, but the validity gate holds speed at zero and echoes
        // the input heading for the first two updates.
        let first = estimator.update(5.0, 0.0, 1.5);
        assert_eq!(first.speed, 0.0);
        assert_relative_eq!(first.heading, 1.5, epsilon = 1e-12);

        let second = estimator.update(10.0, 0.0, 1.5);
        assert_eq!(second.speed, 0.0);
        assert_relative_eq!(second.heading, 1.5, epsilon = 1e-12);

        let third = estimator.update(15.0, 0.0, 1.5);
        assert!(third.speed > 0.0);
        assert_relative_eq!(third.heading, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_moving_target_speed_approaches_truth() {
        let mut estimator = VelocityEstimator::new(0.0, 0.0, 0.0, 1.0);

        // Target moving at 1 m/s along +x.
        let mut last = estimator.update(1.0, 0.0, 0.0);
        for step in 2..=8 {
            last = estimator.update(step as f64, 0.0, 0.0);
        }

        assert!((last.speed - 1.0).abs() < 0.2, "speed {} far from 1.0", last.speed);
        assert_relative_eq!(last.heading, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_slow_step_reports_forward_motion() {
        // Two fixes at (10, 0), then one at (10.5, 0): the third update is
        // past the validity gate and must report forward motion.
        let mut estimator = VelocityEstimator::new(10.0, 0.0, 0.0, 1.0);
        estimator.update(10.0, 0.0, 0.0);
        estimator.update(10.0, 0.0, 0.0);

        let third = estimator.update(10.5, 0.0, 0.0);
        assert!(third.speed > 0.0);
        assert!(third.speed < 1.0);
        assert_relative_eq!(third.heading, 0.0, epsilon = 1e-9);
        assert!(third.x > 10.0);
    }

    #[test]
    fn test_creep_clamps_to_zero() {
        let mut estimator = VelocityEstimator::new(10.0, 0.0, 0.0, 1.0);

        // 1 mm/frame drift reads as jitter, not motion.
        let mut position = 10.0;
        let mut last = estimator.update(position, 0.0, 0.0);
        for _ in 0..10 {
            position += 0.001;
            last = estimator.update(position, 0.0, 0.0);
        }
        assert_eq!(last.speed, 0.0);
    }

    #[test]
    fn test_coincident_positions_hold_heading() {
        let mut estimator = VelocityEstimator::new(0.0, 0.0, 0.0, 1.0);

        // Build up a northward heading, then stop dead.
        for step in 1..=5 {
            estimator.update(0.0, step as f64, 0.0);
        }
        let moving = estimator.update(0.0, 6.0, 0.0);
        assert_relative_eq!(moving.heading, std::f64::consts::FRAC_PI_2, epsilon = 1e-6);

        // Identical fixes from here: the displacement collapses toward zero
        // but heading must stay finite and the residual creep must clamp.
        let mut held = moving;
        for _ in 0..10 {
            held = estimator.update(0.0, 6.0, 0.0);
        }
        assert!(held.heading.is_finite());
        assert_eq!(held.speed, 0.0);
    }

    #[test]
    fn test_velocity_accessor_matches_reported_speed() {
        let mut estimator = VelocityEstimator::new(0.0, 0.0, 0.0, 0.5);
        for step in 1..=6 {
            estimator.update(step as f64 * 0.5, 0.0, 0.0);
        }
        let velocity = estimator.velocity();
        assert!(velocity.x > 0.5);
        assert!(velocity.y.abs() < 0.1);
    }
}
