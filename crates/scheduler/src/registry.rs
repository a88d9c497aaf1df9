//! Sensor registry and per-frame capture decisions.

use std::collections::{BTreeMap, HashSet};

use contracts::{CaptureError, CaptureTriggerMode, Epoch, FrameTick, SensorDefinition, SensorHandle};
use tracing::{debug, instrument, trace};

/// Tolerance when comparing sequence time against a capture time
pub const CAPTURE_TIME_EPSILON: f64 = 1e-6;

/// Registry state
#[derive(Debug, Clone, Copy, PartialEq)]
enum RegistryState {
    /// No frame has begun yet
    Idle,
    /// Decisions for this frame are frozen
    InFrame(FrameTick),
}

/// A registered sensor and its schedule
#[derive(Debug, Clone)]
pub struct SensorEntry {
    handle: SensorHandle,
    definition: SensorDefinition,
    enabled: bool,
    /// Sequence time of the first scheduled capture
    schedule_origin: f64,
    /// Index of the next capture slot on the `origin + slot * interval` grid
    next_slot: u64,
    capture_requested: bool,
    capture_count: u64,
    last_capture_frame: Option<u64>,
}

impl SensorEntry {
    fn new(handle: SensorHandle, definition: SensorDefinition, sequence_time: f64) -> Self {
        let schedule_origin = sequence_time
            + f64::from(definition.first_capture_frame) * definition.simulation_delta_time;
        Self {
            handle,
            definition,
            enabled: true,
            schedule_origin,
            next_slot: 0,
            capture_requested: false,
            capture_count: 0,
            last_capture_frame: None,
        }
    }

    pub fn handle(&self) -> SensorHandle {
        self.handle
    }

    pub fn definition(&self) -> &SensorDefinition {
        &self.definition
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_manual(&self) -> bool {
        self.definition.trigger_mode == CaptureTriggerMode::Manual
    }

    pub fn capture_requested(&self) -> bool {
        self.capture_requested
    }

    pub fn capture_count(&self) -> u64 {
        self.capture_count
    }

    pub fn last_capture_frame(&self) -> Option<u64> {
        self.last_capture_frame
    }

    /// Sequence time of the next scheduled capture (`None` for manual sensors)
    pub fn next_capture_time(&self) -> Option<f64> {
        if self.is_manual() {
            return None;
        }
        Some(self.schedule_origin + self.next_slot as f64 * self.definition.capture_interval())
    }

    /// Time until the next frame this sensor wants simulated.
    ///
    /// Scheduled sensors step on their `simulation_delta_time` grid so the
    /// frames between two captures are simulated too.
    fn requested_gap(&self, now: f64) -> f64 {
        let delta = self.definition.simulation_delta_time;
        match self.next_capture_time() {
            None => delta,
            Some(next) => {
                let steps = ((now + CAPTURE_TIME_EPSILON - self.schedule_origin) / delta).floor() + 1.0;
                let next_frame = self.schedule_origin + steps * delta;
                next_frame.min(next) - now
            }
        }
    }

    fn reschedule(&mut self, sequence_time: f64) {
        self.schedule_origin = sequence_time
            + f64::from(self.definition.first_capture_frame) * self.definition.simulation_delta_time;
        self.next_slot = 0;
    }

    /// Decide for the frame at `sequence_time`, advancing the schedule when capturing
    fn evaluate(&mut self, sequence_time: f64) -> bool {
        if self.is_manual() {
            return std::mem::take(&mut self.capture_requested);
        }

        let interval = self.definition.capture_interval();
        let due = self.schedule_origin + self.next_slot as f64 * interval;
        if sequence_time + CAPTURE_TIME_EPSILON < due {
            return false;
        }

        // Skip slots missed while disabled so captures stay on the grid
        let elapsed_slots = ((sequence_time + CAPTURE_TIME_EPSILON - self.schedule_origin)
            / interval)
            .floor()
            .max(0.0) as u64;
        self.next_slot = elapsed_slots + 1;
        true
    }
}

/// Per-frame decision summary
#[derive(Debug, Clone, Default)]
pub struct FrameDecisions {
    pub frame: u64,
    pub sequence_time: f64,
    pub capturing: Vec<SensorHandle>,
}

/// Registry of the sensors of one simulation
#[derive(Debug)]
pub struct SensorRegistry {
    epoch: Epoch,
    next_id: u64,
    sensors: BTreeMap<u64, SensorEntry>,
    state: RegistryState,
    sequence_start: f64,
    restart_sequence: bool,
    /// Sensors capturing in the current frame, frozen at frame begin
    capturing: HashSet<u64>,
}

impl SensorRegistry {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            next_id: 1,
            sensors: BTreeMap::new(),
            state: RegistryState::Idle,
            sequence_start: 0.0,
            restart_sequence: false,
            capturing: HashSet::new(),
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorEntry> {
        self.sensors.values()
    }

    /// Current host frame, if one has begun
    pub fn current_frame(&self) -> Option<FrameTick> {
        match self.state {
            RegistryState::Idle => None,
            RegistryState::InFrame(tick) => Some(tick),
        }
    }

    /// Simulation time since the current sequence started
    pub fn sequence_time(&self) -> f64 {
        match self.state {
            RegistryState::Idle => 0.0,
            RegistryState::InFrame(tick) => tick.elapsed - self.sequence_start,
        }
    }

    #[instrument(
        name = "registry_register",
        skip(self, definition),
        fields(epoch = %self.epoch, modality = %definition.modality)
    )]
    pub fn register(&mut self, definition: SensorDefinition) -> Result<SensorHandle, CaptureError> {
        definition.validate()?;

        let handle = SensorHandle::new(self.next_id, self.epoch);
        self.next_id += 1;

        let entry = SensorEntry::new(handle, definition, self.sequence_time());
        debug!(
            sensor = %handle,
            trigger_mode = ?entry.definition.trigger_mode,
            first_capture_time = ?entry.next_capture_time(),
            "sensor registered"
        );
        self.sensors.insert(handle.id(), entry);
        Ok(handle)
    }

    /// Membership test against this registry's epoch and id table
    pub fn contains(&self, handle: &SensorHandle) -> bool {
        !handle.is_nil() && handle.epoch() == self.epoch && self.sensors.contains_key(&handle.id())
    }

    pub fn get(&self, handle: &SensorHandle) -> Result<&SensorEntry, CaptureError> {
        if !self.contains(handle) {
            return Err(CaptureError::invalid_handle("sensor", handle));
        }
        self.sensors
            .get(&handle.id())
            .ok_or_else(|| CaptureError::invalid_handle("sensor", handle))
    }

    fn get_mut(&mut self, handle: &SensorHandle) -> Result<&mut SensorEntry, CaptureError> {
        if !self.contains(handle) {
            return Err(CaptureError::invalid_handle("sensor", handle));
        }
        self.sensors
            .get_mut(&handle.id())
            .ok_or_else(|| CaptureError::invalid_handle("sensor", handle))
    }

    pub fn is_enabled(&self, handle: &SensorHandle) -> Result<bool, CaptureError> {
        Ok(self.get(handle)?.enabled)
    }

    pub fn set_enabled(&mut self, handle: &SensorHandle, enabled: bool) -> Result<(), CaptureError> {
        let entry = self.get_mut(handle)?;
        if entry.enabled != enabled {
            debug!(sensor = %handle, enabled, "sensor enabled state changed");
        }
        entry.enabled = enabled;
        Ok(())
    }

    /// Queue a capture for the next frame.
    ///
    /// Returns `false` when the sensor is scheduled, in which case the request is ignored.
    pub fn request_capture(&mut self, handle: &SensorHandle) -> Result<bool, CaptureError> {
        let entry = self.get_mut(handle)?;
        if !entry.is_manual() {
            debug!(sensor = %handle, "capture request ignored for scheduled sensor");
            return Ok(false);
        }
        entry.capture_requested = true;
        Ok(true)
    }

    /// Frozen decision for the current frame
    pub fn should_capture(&self, handle: &SensorHandle) -> Result<bool, CaptureError> {
        let entry = self.get(handle)?;
        Ok(entry.enabled && self.capturing.contains(&handle.id()))
    }

    /// Restart sequence time at the next frame and reschedule every sensor from its offset
    pub fn start_new_sequence(&mut self) {
        self.restart_sequence = true;
    }

    /// Evaluate every enabled sensor once for `tick` and freeze the result
    #[instrument(
        name = "registry_begin_frame",
        level = "debug",
        skip(self),
        fields(epoch = %self.epoch, frame = tick.frame, elapsed = tick.elapsed)
    )]
    pub fn begin_frame(&mut self, tick: FrameTick) -> Result<FrameDecisions, CaptureError> {
        if let RegistryState::InFrame(previous) = self.state {
            if tick.frame <= previous.frame {
                return Err(CaptureError::NonMonotonicFrame {
                    frame: tick.frame,
                    previous: previous.frame,
                });
            }
        }

        self.state = RegistryState::InFrame(tick);
        if std::mem::take(&mut self.restart_sequence) {
            self.sequence_start = tick.elapsed;
            for entry in self.sensors.values_mut() {
                entry.reschedule(0.0);
            }
        }

        let sequence_time = self.sequence_time();
        self.capturing.clear();
        let mut capturing = Vec::new();

        for entry in self.sensors.values_mut() {
            if !entry.enabled {
                continue;
            }
            if entry.evaluate(sequence_time) {
                entry.capture_count += 1;
                entry.last_capture_frame = Some(tick.frame);
                self.capturing.insert(entry.handle.id());
                capturing.push(entry.handle);
            }
        }

        trace!(capturing = capturing.len(), sequence_time, "frame decisions frozen");

        Ok(FrameDecisions {
            frame: tick.frame,
            sequence_time,
            capturing,
        })
    }

    /// Frame time the host should simulate next, if any sensor cares
    pub fn requested_delta_time(&self) -> Option<f64> {
        let now = self.sequence_time();
        self.sensors
            .values()
            .filter(|entry| entry.enabled && entry.definition.affects_timing())
            .map(|entry| entry.requested_gap(now))
            .filter(|gap| *gap > CAPTURE_TIME_EPSILON)
            .min_by(f64::total_cmp)
    }
}
