use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// The state of one body at one instant: position and velocity in the fixed
/// reference frame of the engine (metres, metres per second).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegreesOfFreedom {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

impl DegreesOfFreedom {
    pub fn new(position: Vector3<f64>, velocity: Vector3<f64>) -> Self {
        Self { position, velocity }
    }
}
