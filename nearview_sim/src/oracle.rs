//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated world:
//! - True positions of all entities
//! - Physics stepping (constant-velocity kinematics)
//! - Detection generation (with sensor noise and dropout)

use nalgebra::{Point2, Vector2};
use nearview_core::DetectedObject;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A ground truth entity in the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthEntity {
    /// Unique entity ID
    pub id: u64,

    /// Position [x, y] in meters (world frame)
    pub position: Point2<f64>,

    /// Velocity [vx, vy] in m/s
    pub velocity: Vector2<f64>,

    /// Object class forwarded into detections
    pub class_id: u8,

    /// Half-size of the square outline reported as a contour; 0 = point object
    pub half_extent: f64,

    /// Entity is active (not despawned)
    pub active: bool,
}

impl GroundTruthEntity {
    /// True heading; zero for a motionless entity.
    pub fn heading(&self) -> f64 {
        if self.velocity.norm() == 0.0 {
            0.0
        } else {
            self.velocity.y.atan2(self.velocity.x)
        }
    }
}

/// The Oracle - maintains ground truth and generates detections.
pub struct Oracle {
    /// RNG for sensor noise and dropout; fed only from the physics seed
    physics_rng: ChaCha8Rng,

    /// All ground truth entities, in id order for deterministic iteration
    entities: BTreeMap<u64, GroundTruthEntity>,

    /// Next entity ID
    next_id: u64,

    /// Current simulation time (seconds)
    current_time: f64,

    /// Position noise standard deviation (meters)
    position_noise_std: f64,

    /// Probability that an entity produces no detection this frame
    dropout_rate: f64,
}

impl Oracle {
    /// Creates a new Oracle with the given physics seed.
    ///
    /// The physics seed should be derived separately from other subsystem
    /// seeds so changing one subsystem does not shift entity noise streams.
    pub fn new(physics_seed: u64) -> Self {
        Self {
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            entities: BTreeMap::new(),
            next_id: 0,
            current_time: 0.0,
            position_noise_std: 0.2,
            dropout_rate: 0.0,
        }
    }

    pub fn set_position_noise(&mut self, std: f64) {
        self.position_noise_std = std.max(0.0);
    }

    pub fn set_dropout(&mut self, rate: f64) {
        self.dropout_rate = rate.clamp(0.0, 1.0);
    }

    /// Spawns an entity and returns its id.
    pub fn spawn_entity(
        &mut self,
        position: Point2<f64>,
        velocity: Vector2<f64>,
        class_id: u8,
        half_extent: f64,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entities.insert(
            id,
            GroundTruthEntity {
                id,
                position,
                velocity,
                class_id,
                half_extent,
                active: true,
            },
        );
        id
    }

    /// Advances the world by one tick of constant-velocity motion.
    pub fn step(&mut self, dt: f64) {
        for entity in self.entities.values_mut() {
            if entity.active {
                entity.position += entity.velocity * dt;
            }
        }
        self.current_time += dt;
    }

    /// Generates world-frame detections for the current tick.
    ///
    /// Every entity consumes the same number of random draws whether or not
    /// it drops out, so the noise stream stays aligned across configurations
    /// with the same seed.
    pub fn generate_detections(&mut self) -> Vec<DetectedObject> {
        let noise = Normal::new(0.0, self.position_noise_std).ok();

        let mut detections = Vec::new();
        for entity in self.entities.values() {
            let dropped = self.physics_rng.gen::<f64>() < self.dropout_rate;
            let (dx, dy) = match noise {
                Some(n) => (
                    n.sample(&mut self.physics_rng),
                    n.sample(&mut self.physics_rng),
                ),
                None => (0.0, 0.0),
            };
            if !entity.active || dropped {
                continue;
            }

            let position = Point2::new(entity.position.x + dx, entity.position.y + dy);
            let mut detection =
                DetectedObject::new(entity.id as u32, position.x, position.y, entity.heading());
            detection.class_id = entity.class_id;
            if entity.half_extent > 0.0 {
                let e = entity.half_extent;
                detection = detection.with_contour(vec![
                    Point2::new(position.x - e, position.y - e),
                    Point2::new(position.x + e, position.y - e),
                    Point2::new(position.x + e, position.y + e),
                    Point2::new(position.x - e, position.y + e),
                ]);
            }
            detections.push(detection);
        }
        detections
    }

    /// True positions of all active entities, in id order.
    pub fn ground_truth_positions(&self) -> Vec<(u64, Point2<f64>)> {
        self.entities
            .values()
            .filter(|e| e.active)
            .map(|e| (e.id, e.position))
            .collect()
    }

    pub fn entities(&self) -> impl Iterator<Item = &GroundTruthEntity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.values().filter(|e| e.active).count()
    }

    /// Current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.current_time
    }
}
