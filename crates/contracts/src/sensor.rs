//! SensorDefinition - registration input of a sensor
//!
//! Also defines the frame tick delivered by the host clock.

use serde::{Deserialize, Serialize};

use crate::CaptureError;

/// How a sensor decides when to capture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureTriggerMode {
    /// Captures fire automatically from a first frame and a fixed period
    #[default]
    Scheduled,
    /// Captures fire only on the frame after an explicit request
    Manual,
}

/// Timing policy and description of a sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDefinition {
    /// Kind of the sensor (e.g. "camera", "lidar")
    pub modality: String,

    /// Human readable description (e.g. "front-left rgb camera")
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub trigger_mode: CaptureTriggerMode,

    /// Simulation seconds per frame requested by this sensor
    #[serde(default)]
    pub simulation_delta_time: f64,

    /// Frames simulated between two scheduled captures, 0 captures every frame
    #[serde(default)]
    pub frames_between_captures: u32,

    /// Offset, in frames of `simulation_delta_time`, of the first scheduled capture
    #[serde(default)]
    pub first_capture_frame: u32,

    /// Lets a manual sensor request its delta time like a scheduled one
    #[serde(default)]
    pub manual_sensor_affects_timing: bool,
}

impl SensorDefinition {
    /// Scheduled sensor capturing every `simulation_delta_time` seconds
    pub fn scheduled(
        modality: impl Into<String>,
        description: impl Into<String>,
        simulation_delta_time: f64,
    ) -> Self {
        Self {
            modality: modality.into(),
            description: description.into(),
            trigger_mode: CaptureTriggerMode::Scheduled,
            simulation_delta_time,
            frames_between_captures: 0,
            first_capture_frame: 0,
            manual_sensor_affects_timing: false,
        }
    }

    /// Manual sensor, capturing only on request
    pub fn manual(modality: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            modality: modality.into(),
            description: description.into(),
            trigger_mode: CaptureTriggerMode::Manual,
            simulation_delta_time: 0.0,
            frames_between_captures: 0,
            first_capture_frame: 0,
            manual_sensor_affects_timing: false,
        }
    }

    pub fn with_frames_between_captures(mut self, frames: u32) -> Self {
        self.frames_between_captures = frames;
        self
    }

    pub fn with_first_capture_frame(mut self, frame: u32) -> Self {
        self.first_capture_frame = frame;
        self
    }

    /// Manual sensors only: request `delta_time` from the simulation clock
    pub fn affecting_timing(mut self, delta_time: f64) -> Self {
        self.manual_sensor_affects_timing = true;
        self.simulation_delta_time = delta_time;
        self
    }

    /// Simulation time between two scheduled captures
    pub fn capture_interval(&self) -> f64 {
        (f64::from(self.frames_between_captures) + 1.0) * self.simulation_delta_time
    }

    /// Whether this sensor has an opinion on the simulation frame time
    pub fn affects_timing(&self) -> bool {
        match self.trigger_mode {
            CaptureTriggerMode::Scheduled => true,
            CaptureTriggerMode::Manual => self.manual_sensor_affects_timing,
        }
    }

    /// Reject definitions the scheduler cannot honor
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.modality.trim().is_empty() {
            return Err(CaptureError::invalid_sensor(
                "modality",
                "modality cannot be empty",
            ));
        }

        let delta = self.simulation_delta_time;
        if self.affects_timing() && !(delta.is_finite() && delta > 0.0) {
            return Err(CaptureError::invalid_sensor(
                "simulation_delta_time",
                format!("must be a finite value > 0 for a timing sensor, got {delta}"),
            ));
        }

        Ok(())
    }
}

/// One tick of the host clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameTick {
    /// Frame index since process start
    pub frame: u64,

    /// Elapsed simulation time (seconds)
    pub elapsed: f64,
}

impl FrameTick {
    pub fn new(frame: u64, elapsed: f64) -> Self {
        Self { frame, elapsed }
    }
}

/// Clock / frame source owned by the host.
///
/// `requested_delta` is the frame time the capture scheduler asks for; sources
/// that cannot honor it are free to ignore it.
pub trait FrameSource {
    fn next_tick(&mut self, requested_delta: Option<f64>) -> FrameTick;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_interval_counts_skipped_frames() {
        let def = SensorDefinition::scheduled("camera", "rgb", 0.1).with_frames_between_captures(2);
        assert!((def.capture_interval() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn scheduled_sensor_requires_positive_delta() {
        let def = SensorDefinition::scheduled("camera", "rgb", 0.0);
        assert!(matches!(
            def.validate(),
            Err(CaptureError::InvalidSensorDefinition { .. })
        ));
        assert!(SensorDefinition::scheduled("camera", "rgb", f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn manual_sensor_delta_is_advisory() {
        assert!(SensorDefinition::manual("camera", "on demand").validate().is_ok());
        assert!(!SensorDefinition::manual("camera", "").affects_timing());

        let timed = SensorDefinition::manual("camera", "").affecting_timing(0.05);
        assert!(timed.affects_timing());
        assert!(timed.validate().is_ok());
    }

    #[test]
    fn trigger_mode_from_config() {
        let def: SensorDefinition = serde_json::from_str(
            r#"{ "modality": "lidar", "trigger_mode": "manual" }"#,
        )
        .unwrap();
        assert_eq!(def.trigger_mode, CaptureTriggerMode::Manual);
        assert_eq!(def.frames_between_captures, 0);
    }
}
