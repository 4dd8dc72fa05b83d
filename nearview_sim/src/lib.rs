//! Nearview Deterministic Simulation Harness
//!
//! A controlled environment where the tracker runs end to end with every
//! source of non-determinism pinned down:
//! - **Time**: the frame clock advances tick by tick, never from a wall clock
//! - **World**: a ground-truth oracle steps entity kinematics
//! - **Randomness**: all sensor noise and dropout derive from one 64-bit seed
//!
//! The runner drives `ObjectTracker::step` against the oracle's detections,
//! checks the tracker's structural invariants every frame, and scores the
//! run against ground truth.

pub mod metrics;
pub mod oracle;
pub mod runner;
pub mod scenarios;

pub use metrics::{MetricsReport, MetricsSession};
pub use oracle::{GroundTruthEntity, Oracle};
pub use runner::{ScenarioResult, ScenarioRunner, SimConfig};
pub use scenarios::ScenarioId;
