//! Simulated host - plays the role of the engine that owns the sensors.
//!
//! Every frame it asks the capture manager which sensors are due, reports a
//! capture plus the configured annotations for each of them, issues manual
//! capture requests, and resolves async annotations a few frames later.

use std::collections::VecDeque;
use std::sync::Arc;

use contracts::{
    AsyncAnnotation, CaptureBlueprint, CaptureError, FrameSource, FrameTick, Pose, Resolution,
    SensorConfig, SensorHandle, SensorSpatialData,
};
use dataset_capture::DatasetCapture;
use nalgebra::{UnitQuaternion, Vector3};
use scheduler::SimulationClock;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

/// Ego speed along x (m/s)
const EGO_SPEED: f64 = 10.0;

/// Sensor mount height above the ego origin (m)
const MOUNT_HEIGHT: f64 = 1.5;

/// Running totals of what the host reported
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCounters {
    pub frames: u64,
    pub sequences: u64,
    pub captures: u64,
    pub annotations: u64,
    pub metrics: u64,
    pub capture_requests: u64,
    pub async_recorded: u64,
    pub async_dropped: u64,
}

struct HostedSensor {
    handle: SensorHandle,
    config: SensorConfig,
}

struct PendingAnnotation {
    due_frame: u64,
    slot: AsyncAnnotation,
    sensor: String,
}

pub struct SimulatedHost {
    capture: Arc<DatasetCapture>,
    clock: SimulationClock,
    sensors: Vec<HostedSensor>,
    metric_ids: Vec<String>,
    frames_per_sequence: u64,
    async_delay: u64,
    pending: VecDeque<PendingAnnotation>,
    counters: HostCounters,
}

impl SimulatedHost {
    /// Register every definition and sensor of the blueprint
    #[instrument(name = "host_new", skip_all, fields(sensors = blueprint.sensors.len()))]
    pub fn new(
        capture: Arc<DatasetCapture>,
        blueprint: &CaptureBlueprint,
        async_delay: u64,
    ) -> Result<Self, CaptureError> {
        for definition in &blueprint.annotation_definitions {
            capture.register_annotation_definition(definition.clone())?;
        }
        for definition in &blueprint.metric_definitions {
            capture.register_metric_definition(definition.clone())?;
        }

        let mut sensors = Vec::with_capacity(blueprint.sensors.len());
        for config in &blueprint.sensors {
            let handle = capture.register_sensor(config.definition.clone())?;
            info!(sensor = %config.name, %handle, manual = config.is_manual(), "Sensor registered");
            sensors.push(HostedSensor {
                handle,
                config: config.clone(),
            });
        }

        Ok(Self {
            capture,
            clock: SimulationClock::new(blueprint.simulation.default_delta_time),
            sensors,
            metric_ids: blueprint
                .metric_definitions
                .iter()
                .map(|definition| definition.id.to_string())
                .collect(),
            frames_per_sequence: blueprint.simulation.frames_per_sequence,
            async_delay,
            pending: VecDeque::new(),
            counters: HostCounters {
                sequences: 1,
                ..Default::default()
            },
        })
    }

    pub fn counters(&self) -> HostCounters {
        self.counters
    }

    pub fn frames_run(&self) -> u64 {
        self.counters.frames
    }

    /// Simulate one frame
    pub fn step(&mut self) -> Result<FrameTick, CaptureError> {
        let frames_run = self.counters.frames;
        if self.frames_per_sequence > 0 && frames_run > 0 && frames_run.is_multiple_of(self.frames_per_sequence) {
            self.capture.start_new_sequence();
            self.counters.sequences += 1;
        }

        let tick = self.clock.next_tick(self.capture.next_delta_time());
        let decisions = self.capture.begin_frame(tick)?;

        self.resolve_due(tick.frame)?;

        for handle in &decisions.capturing {
            let Some(index) = self.sensors.iter().position(|sensor| sensor.handle == *handle) else {
                continue;
            };
            self.report_sensor(index, tick, decisions.sequence_time)?;
        }

        for id in &self.metric_ids {
            self.capture.report_metric(
                id,
                json!({
                    "frame": tick.frame,
                    "sequence_time": decisions.sequence_time,
                    "capturing": decisions.capturing.len(),
                }),
            )?;
            self.counters.metrics += 1;
        }

        self.issue_requests(tick.frame)?;

        self.counters.frames += 1;
        debug!(
            frame = tick.frame,
            elapsed = tick.elapsed,
            capturing = decisions.capturing.len(),
            pending = self.pending.len(),
            "Frame simulated"
        );
        Ok(tick)
    }

    /// Resolve every async annotation still waiting
    pub fn finish(&mut self) -> Result<(), CaptureError> {
        self.resolve_due(u64::MAX)
    }

    fn report_sensor(&mut self, index: usize, tick: FrameTick, sequence_time: f64) -> Result<(), CaptureError> {
        let sensor = &self.sensors[index];
        let name = &sensor.config.name;

        let mut extra = Map::new();
        extra.insert("sensor_name".to_string(), Value::String(name.clone()));
        self.capture.report_capture(
            &sensor.handle,
            format!("{}/frame_{:06}.bin", name, tick.frame),
            spatial_at(tick.elapsed),
            extra,
        )?;
        self.counters.captures += 1;

        for definition in &sensor.config.annotations {
            self.capture.report_annotation(
                &sensor.handle,
                definition,
                json!({ "sensor": name, "frame": tick.frame, "sequence_time": sequence_time }),
            )?;
            self.counters.annotations += 1;
        }

        for definition in &sensor.config.async_annotations {
            let slot = self.capture.report_annotation_async(&sensor.handle, definition)?;
            self.pending.push_back(PendingAnnotation {
                due_frame: tick.frame.saturating_add(self.async_delay),
                slot,
                sensor: name.clone(),
            });
        }
        Ok(())
    }

    fn issue_requests(&mut self, frame: u64) -> Result<(), CaptureError> {
        for sensor in &self.sensors {
            let Some(every) = sensor.config.request_every_frames.filter(|every| *every > 0) else {
                continue;
            };
            if frame.is_multiple_of(every) {
                self.capture.request_capture(&sensor.handle)?;
                self.counters.capture_requests += 1;
            }
        }
        Ok(())
    }

    fn resolve_due(&mut self, frame: u64) -> Result<(), CaptureError> {
        while self.pending.front().is_some_and(|pending| pending.due_frame <= frame) {
            let Some(pending) = self.pending.pop_front() else {
                break;
            };
            let value = json!({ "sensor": pending.sensor, "resolved_at": frame.min(pending.due_frame) });
            match self.capture.report_async_annotation(&pending.slot, value)? {
                Resolution::Recorded => self.counters.async_recorded += 1,
                Resolution::Dropped => self.counters.async_dropped += 1,
            }
        }
        Ok(())
    }
}

/// Ego driving along x with a roof-mounted sensor
fn spatial_at(elapsed: f64) -> SensorSpatialData {
    let ego = Pose::new(Vector3::new(EGO_SPEED * elapsed, 0.0, 0.0), UnitQuaternion::identity());
    let sensor = Pose::new(
        ego.position + Vector3::new(0.0, 0.0, MOUNT_HEIGHT),
        UnitQuaternion::identity(),
    );
    SensorSpatialData::from_world_poses(Some(ego), sensor)
        .with_motion(Some(Vector3::new(EGO_SPEED, 0.0, 0.0)), Some(Vector3::zeros()))
}
