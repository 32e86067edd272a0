//! Node mobility
//!
//! Positions are queried at a simulated timestamp; the core never moves nodes
//! itself.

use common::Vector3;
use std::time::Duration;

/// Position provider for one node
pub trait MobilityModel {
    /// Position in meters at simulated time `at`
    fn position(&self, at: Duration) -> Vector3;

    /// Velocity in m/s at simulated time `at`
    fn velocity(&self, at: Duration) -> Vector3;
}

/// Straight-line motion from an initial position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantVelocityMobility {
    pub initial_position: Vector3,
    pub velocity: Vector3,
}

impl ConstantVelocityMobility {
    pub fn new(initial_position: Vector3, velocity: Vector3) -> Self {
        Self { initial_position, velocity }
    }

    pub fn stationary(position: Vector3) -> Self {
        Self::new(position, Vector3::ZERO)
    }
}

impl MobilityModel for ConstantVelocityMobility {
    fn position(&self, at: Duration) -> Vector3 {
        self.initial_position + self.velocity * at.as_secs_f64()
    }

    fn velocity(&self, _at: Duration) -> Vector3 {
        self.velocity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_velocity_track() {
        let mobility = ConstantVelocityMobility::new(
            Vector3::new(10.0, 0.0, 1.5),
            Vector3::new(20.0, 0.0, 0.0),
        );
        let pos = mobility.position(Duration::from_millis(500));
        assert!((pos.x - 20.0).abs() < 1e-12);
        assert_eq!(pos.z, 1.5);
        assert_eq!(mobility.velocity(Duration::ZERO).x, 20.0);

        let parked = ConstantVelocityMobility::stationary(Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(parked.position(Duration::from_secs(100)), Vector3::new(1.0, 2.0, 3.0));
    }
}
