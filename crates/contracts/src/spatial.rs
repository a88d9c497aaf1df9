//! Sensor and ego poses attached to a capture.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Position + rotation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl Pose {
    pub fn new(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Poses of the ego and of the sensor relative to it
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSpatialData {
    /// Ego pose in world space
    pub ego_pose: Pose,

    /// Sensor pose relative to the ego
    pub sensor_pose: Pose,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ego_velocity: Option<Vector3<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ego_acceleration: Option<Vector3<f64>>,
}

impl SensorSpatialData {
    /// Build from world-space poses. Without an ego, the sensor is its own ego.
    pub fn from_world_poses(ego: Option<Pose>, sensor: Pose) -> Self {
        let ego = ego.unwrap_or(sensor);
        Self {
            ego_pose: ego,
            sensor_pose: Pose {
                position: sensor.position - ego.position,
                rotation: sensor.rotation * ego.rotation.inverse(),
            },
            ego_velocity: None,
            ego_acceleration: None,
        }
    }

    pub fn with_motion(
        mut self,
        velocity: Option<Vector3<f64>>,
        acceleration: Option<Vector3<f64>>,
    ) -> Self {
        self.ego_velocity = velocity;
        self.ego_acceleration = acceleration;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_pose_from_world_poses() {
        let ego = Pose::new(
            Vector3::new(10.0, 0.0, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 0.5),
        );
        let sensor = Pose::new(
            Vector3::new(12.0, 1.0, 1.5),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 0.75),
        );

        let data = SensorSpatialData::from_world_poses(Some(ego), sensor);

        assert_eq!(data.ego_pose, ego);
        assert!((data.sensor_pose.position - Vector3::new(2.0, 1.0, 1.5)).norm() < 1e-12);
        assert!((data.sensor_pose.rotation.angle() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn missing_ego_uses_sensor() {
        let sensor = Pose::new(Vector3::new(1.0, 2.0, 3.0), UnitQuaternion::identity());
        let data = SensorSpatialData::from_world_poses(None, sensor);
        assert_eq!(data.ego_pose, sensor);
        assert_eq!(data.sensor_pose.position, Vector3::zeros());
    }
}
