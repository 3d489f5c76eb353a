//! Simulation tuning for the world tick

use navphys::MoveConfig;

/// Tuning applied by every map tick
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SimulationConfig {
    /// Fraction of the overlap turned into a separating push each tick
    pub avoidance_push: f32,
    /// Multiplier on the push received by the lower-priority body of a pair
    pub low_priority_push_factor: f32,
    /// Per-agent movement tuning
    pub movement: MoveConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            avoidance_push: 0.3,
            low_priority_push_factor: 2.0,
            movement: MoveConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_avoidance_push(mut self, push: f32) -> Self {
        self.avoidance_push = push;
        self
    }

    pub fn with_low_priority_push_factor(mut self, factor: f32) -> Self {
        self.low_priority_push_factor = factor;
        self
    }

    pub fn with_movement(mut self, movement: MoveConfig) -> Self {
        self.movement = movement;
        self
    }
}
