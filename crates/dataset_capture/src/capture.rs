//! DatasetCapture - entry point for sensors and reports
//!
//! Holds the current [`SimulationState`] behind a single lock. The state is
//! created on first use and replaced by [`DatasetCapture::reset_simulation`],
//! which bumps the epoch and so invalidates every handle issued before.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{
    AnnotationDefinition, AnnotationHandle, AsyncAnnotation, AsyncMetric, CaptureConsumer,
    CaptureError, Epoch, FrameTick, MetricDefinition, Resolution, SensorDefinition, SensorHandle,
    SensorSpatialData,
};
use scheduler::FrameDecisions;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::state::SimulationState;

/// Callback fired while a simulation is ending
pub type EndingCallback = Arc<dyn Fn(&DatasetCapture) + Send + Sync>;

struct Inner {
    /// Epoch of the current simulation, or of the next one if none exists yet
    epoch: Epoch,
    state: Option<SimulationState>,
}

impl Inner {
    fn state(&mut self, consumer: &Arc<dyn CaptureConsumer>) -> &mut SimulationState {
        let epoch = self.epoch;
        self.state
            .get_or_insert_with(|| SimulationState::new(epoch, Arc::clone(consumer)))
    }

    /// Live state issued under `epoch`
    fn live(&mut self, epoch: Epoch) -> Option<&mut SimulationState> {
        self.state.as_mut().filter(|state| state.epoch() == epoch)
    }
}

/// Registered sensor as seen from outside
#[derive(Debug, Clone, Serialize)]
pub struct SensorInfo {
    pub handle: SensorHandle,
    pub definition: SensorDefinition,
    pub enabled: bool,
    pub capture_count: u64,
    pub next_capture_time: Option<f64>,
}

/// Point-in-time view of the current simulation
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSnapshot {
    pub epoch: Epoch,
    pub sequence: u64,
    pub step: u64,
    pub frame: Option<u64>,
    pub sequence_time: f64,
    pub sensors: usize,
    pub pending_async: usize,
    pub queued_frames: usize,
}

/// Capture manager
pub struct DatasetCapture {
    inner: Mutex<Inner>,
    consumer: Arc<dyn CaptureConsumer>,
    subscribers: Mutex<Vec<EndingCallback>>,
    ending: AtomicBool,
}

impl DatasetCapture {
    pub fn new(consumer: Arc<dyn CaptureConsumer>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                epoch: Epoch::FIRST,
                state: None,
            }),
            consumer,
            subscribers: Mutex::new(Vec::new()),
            ending: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut SimulationState) -> Result<R, CaptureError>,
    ) -> Result<R, CaptureError> {
        let mut inner = self.lock();
        f(inner.state(&self.consumer))
    }

    /// Run `f` against the simulation that issued `epoch`
    fn with_live<R>(
        &self,
        epoch: Epoch,
        kind: &'static str,
        id: impl ToString,
        f: impl FnOnce(&mut SimulationState) -> Result<R, CaptureError>,
    ) -> Result<R, CaptureError> {
        let mut inner = self.lock();
        match inner.live(epoch) {
            Some(state) => f(state),
            None => Err(CaptureError::invalid_handle(kind, id)),
        }
    }

    /// Epoch of the current (or next) simulation
    pub fn epoch(&self) -> Epoch {
        self.lock().epoch
    }

    /// True once a simulation has been created for the current epoch
    pub fn is_active(&self) -> bool {
        self.lock().state.is_some()
    }

    // ===== Sensors =====

    #[instrument(name = "capture_register_sensor", skip(self, definition), fields(modality = %definition.modality))]
    pub fn register_sensor(&self, definition: SensorDefinition) -> Result<SensorHandle, CaptureError> {
        self.with_state(|state| state.register_sensor(definition))
    }

    /// Register a sensor that is disabled when the guard drops
    pub fn scoped_sensor(&self, definition: SensorDefinition) -> Result<SensorGuard<'_>, CaptureError> {
        let handle = self.register_sensor(definition)?;
        Ok(SensorGuard {
            capture: self,
            handle,
        })
    }

    pub fn is_valid(&self, sensor: &SensorHandle) -> bool {
        self.lock()
            .live(sensor.epoch())
            .is_some_and(|state| state.registry().contains(sensor))
    }

    pub fn is_annotation_valid(&self, annotation: &AnnotationHandle) -> bool {
        self.lock()
            .live(annotation.epoch())
            .is_some_and(|state| state.is_annotation_valid(annotation))
    }

    /// Frozen capture decision of the current frame
    pub fn should_capture_this_frame(&self, sensor: &SensorHandle) -> Result<bool, CaptureError> {
        self.with_live(sensor.epoch(), "sensor", sensor, |state| state.should_capture(sensor))
    }

    /// Ask a manual sensor to capture on the next frame; ignored for scheduled sensors
    pub fn request_capture(&self, sensor: &SensorHandle) -> Result<(), CaptureError> {
        self.with_live(sensor.epoch(), "sensor", sensor, |state| {
            state.request_capture(sensor).map(|_| ())
        })
    }

    pub fn is_enabled(&self, sensor: &SensorHandle) -> Result<bool, CaptureError> {
        self.with_live(sensor.epoch(), "sensor", sensor, |state| {
            state.registry().is_enabled(sensor)
        })
    }

    pub fn set_enabled(&self, sensor: &SensorHandle, enabled: bool) -> Result<(), CaptureError> {
        self.with_live(sensor.epoch(), "sensor", sensor, |state| {
            state.set_enabled(sensor, enabled)
        })
    }

    /// Disable the sensor; it stays registered and can be enabled again
    pub fn dispose(&self, sensor: &SensorHandle) -> Result<(), CaptureError> {
        self.set_enabled(sensor, false)
    }

    pub fn sensors(&self) -> Vec<SensorInfo> {
        let inner = self.lock();
        let Some(state) = inner.state.as_ref() else {
            return Vec::new();
        };
        state
            .registry()
            .iter()
            .map(|entry| SensorInfo {
                handle: entry.handle(),
                definition: entry.definition().clone(),
                enabled: entry.is_enabled(),
                capture_count: entry.capture_count(),
                next_capture_time: entry.next_capture_time(),
            })
            .collect()
    }

    pub fn snapshot(&self) -> Option<SimulationSnapshot> {
        let inner = self.lock();
        let state = inner.state.as_ref()?;
        Some(SimulationSnapshot {
            epoch: state.epoch(),
            sequence: state.sequence(),
            step: state.step(),
            frame: state.current_frame().map(|tick| tick.frame),
            sequence_time: state.registry().sequence_time(),
            sensors: state.registry().len(),
            pending_async: state.pending(),
            queued_frames: state.queued_frames(),
        })
    }

    // ===== Frames =====

    /// Advance the current simulation to `tick`
    pub fn begin_frame(&self, tick: FrameTick) -> Result<FrameDecisions, CaptureError> {
        self.with_state(|state| state.begin_frame(tick))
    }

    /// Frame time requested by the enabled timing sensors
    pub fn next_delta_time(&self) -> Option<f64> {
        self.lock()
            .state
            .as_ref()
            .and_then(|state| state.registry().requested_delta_time())
    }

    pub fn start_new_sequence(&self) {
        let mut inner = self.lock();
        inner.state(&self.consumer).start_new_sequence();
    }

    // ===== Definitions =====

    pub fn register_annotation_definition(
        &self,
        definition: AnnotationDefinition,
    ) -> Result<AnnotationDefinition, CaptureError> {
        self.with_state(|state| state.register_annotation_definition(definition))
    }

    pub fn register_metric_definition(
        &self,
        definition: MetricDefinition,
    ) -> Result<MetricDefinition, CaptureError> {
        self.with_state(|state| state.register_metric_definition(definition))
    }

    pub fn annotation_definitions(&self) -> Vec<AnnotationDefinition> {
        self.lock()
            .state
            .as_ref()
            .map(|state| state.annotation_definitions().to_vec())
            .unwrap_or_default()
    }

    pub fn metric_definitions(&self) -> Vec<MetricDefinition> {
        self.lock()
            .state
            .as_ref()
            .map(|state| state.metric_definitions().to_vec())
            .unwrap_or_default()
    }

    // ===== Reports =====

    pub fn report_capture(
        &self,
        sensor: &SensorHandle,
        filename: impl Into<String>,
        spatial: SensorSpatialData,
        extra: Map<String, Value>,
    ) -> Result<(), CaptureError> {
        let filename = filename.into();
        self.with_live(sensor.epoch(), "sensor", sensor, |state| {
            state.report_capture(sensor, filename, spatial, extra)
        })
    }

    pub fn report_annotation(
        &self,
        sensor: &SensorHandle,
        definition: &str,
        value: Value,
    ) -> Result<AnnotationHandle, CaptureError> {
        self.with_live(sensor.epoch(), "sensor", sensor, |state| {
            state.report_annotation(sensor, definition, value)
        })
    }

    /// Reserve an annotation whose value arrives later through [`Self::report_async_annotation`]
    pub fn report_annotation_async(
        &self,
        sensor: &SensorHandle,
        definition: &str,
    ) -> Result<AsyncAnnotation, CaptureError> {
        self.with_live(sensor.epoch(), "sensor", sensor, |state| {
            state.report_annotation_async(sensor, definition)
        })
    }

    /// Metric of the whole simulation, attached to the current frame
    pub fn report_metric(&self, definition: &str, values: Value) -> Result<(), CaptureError> {
        self.with_state(|state| state.report_metric(definition, values))
    }

    pub fn report_sensor_metric(
        &self,
        sensor: &SensorHandle,
        definition: &str,
        values: Value,
    ) -> Result<(), CaptureError> {
        self.with_live(sensor.epoch(), "sensor", sensor, |state| {
            state.report_sensor_metric(sensor, definition, values)
        })
    }

    pub fn report_annotation_metric(
        &self,
        annotation: &AnnotationHandle,
        definition: &str,
        values: Value,
    ) -> Result<(), CaptureError> {
        self.with_live(annotation.epoch(), "annotation", annotation, |state| {
            state.report_annotation_metric(annotation, definition, values)
        })
    }

    pub fn report_metric_async(&self, definition: &str) -> Result<AsyncMetric, CaptureError> {
        self.with_state(|state| state.report_metric_async(definition, None))
    }

    pub fn report_sensor_metric_async(
        &self,
        sensor: &SensorHandle,
        definition: &str,
    ) -> Result<AsyncMetric, CaptureError> {
        self.with_live(sensor.epoch(), "sensor", sensor, |state| {
            state.report_metric_async(definition, Some(sensor))
        })
    }

    /// True while the slot is reserved and its simulation is still running
    pub fn is_pending_annotation(&self, pending: &AsyncAnnotation) -> bool {
        !pending.is_nil() && self.lock().live(pending.epoch()).is_some_and(|state| state.is_slot_pending(pending.slot))
    }

    pub fn is_pending_metric(&self, pending: &AsyncMetric) -> bool {
        !pending.is_nil() && self.lock().live(pending.epoch).is_some_and(|state| state.is_slot_pending(pending.slot))
    }

    /// Supply the value of an async annotation.
    ///
    /// Resolving after the issuing simulation ended drops the value and returns
    /// [`Resolution::Dropped`].
    pub fn report_async_annotation(
        &self,
        pending: &AsyncAnnotation,
        value: Value,
    ) -> Result<Resolution, CaptureError> {
        if pending.is_nil() {
            return Err(CaptureError::invalid_handle("async annotation", pending));
        }
        let mut inner = self.lock();
        let current = inner.epoch;
        match inner.live(pending.epoch()) {
            Some(state) => state
                .resolve_annotation(pending, value)
                .map(|_| Resolution::Recorded),
            None if pending.epoch() < current => {
                warn!(slot = %pending, %current, "async annotation resolved after its simulation ended");
                observability::record_async_resolved("annotation", true);
                Ok(Resolution::Dropped)
            }
            None => Err(CaptureError::invalid_handle("async annotation", pending)),
        }
    }

    /// Supply the values of an async metric
    pub fn report_async_metric(&self, pending: &AsyncMetric, values: Value) -> Result<Resolution, CaptureError> {
        if pending.is_nil() {
            return Err(CaptureError::invalid_handle("async metric", pending));
        }
        let mut inner = self.lock();
        let current = inner.epoch;
        match inner.live(pending.epoch) {
            Some(state) => state
                .resolve_metric(pending, values)
                .map(|_| Resolution::Recorded),
            None if pending.epoch < current => {
                warn!(slot = %pending, %current, "async metric resolved after its simulation ended");
                observability::record_async_resolved("metric", true);
                Ok(Resolution::Dropped)
            }
            None => Err(CaptureError::invalid_handle("async metric", pending)),
        }
    }

    // ===== Lifecycle =====

    /// Subscribe to the end of every simulation
    pub fn on_simulation_ending(&self, callback: impl Fn(&DatasetCapture) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// End the current simulation and start a new one.
    ///
    /// Subscribers run first, against the still valid simulation. The new
    /// simulation is installed before the old one is flushed, so a flush error
    /// is returned with the new simulation already in place.
    #[instrument(name = "capture_reset_simulation", skip(self))]
    pub fn reset_simulation(&self) -> Result<(), CaptureError> {
        if self.ending.swap(true, Ordering::AcqRel) {
            return Err(CaptureError::stale("simulation", "already ending"));
        }
        let result = self.end_current();
        self.ending.store(false, Ordering::Release);
        result
    }

    fn end_current(&self) -> Result<(), CaptureError> {
        if !self.is_active() {
            debug!("no simulation to end");
            return Ok(());
        }

        // 1. Notify without holding the lock so subscribers can still report
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for subscriber in &subscribers {
            subscriber(self);
        }

        // 2. Swap
        let previous = {
            let mut inner = self.lock();
            let previous = inner.state.take();
            inner.epoch = inner.epoch.next();
            observability::record_simulation_reset(inner.epoch.get());
            info!(epoch = %inner.epoch, "simulation reset");
            previous
        };

        // 3. Flush
        match previous {
            Some(state) => state.finish(),
            None => Ok(()),
        }
    }

    /// Host shutdown: end the current simulation
    pub fn shutdown(&self) -> Result<(), CaptureError> {
        info!("capture shutdown requested");
        self.reset_simulation()
    }
}

/// Sensor disabled on drop
pub struct SensorGuard<'a> {
    capture: &'a DatasetCapture,
    handle: SensorHandle,
}

impl SensorGuard<'_> {
    pub fn handle(&self) -> SensorHandle {
        self.handle
    }
}

impl Deref for SensorGuard<'_> {
    type Target = SensorHandle;

    fn deref(&self) -> &SensorHandle {
        &self.handle
    }
}

impl Drop for SensorGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.capture.dispose(&self.handle) {
            debug!(sensor = %self.handle, error = %e, "scoped sensor already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CollectingConsumer;
    use contracts::{DatasetEvent, Pose};
    use nalgebra::{UnitQuaternion, Vector3};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn setup() -> (DatasetCapture, Arc<CollectingConsumer>) {
        let consumer = Arc::new(CollectingConsumer::new());
        let capture = DatasetCapture::new(consumer.clone());
        (capture, consumer)
    }

    fn camera(delta: f64) -> SensorDefinition {
        SensorDefinition::scheduled("camera", "front rgb", delta)
    }

    fn capture_now(capture: &DatasetCapture, sensor: &SensorHandle, name: &str) {
        capture
            .report_capture(sensor, name, SensorSpatialData::default(), Map::new())
            .unwrap();
    }

    #[test]
    fn simulation_is_created_lazily() {
        let (capture, _) = setup();
        assert!(!capture.is_active());
        assert!(capture.snapshot().is_none());
        assert!(capture.sensors().is_empty());

        capture.register_sensor(camera(0.1)).unwrap();
        assert!(capture.is_active());
        assert_eq!(capture.snapshot().unwrap().sensors, 1);
    }

    #[test]
    fn scheduled_sensor_captures_on_its_interval() {
        let (capture, _) = setup();
        let sensor = capture.register_sensor(camera(0.1)).unwrap();

        for (frame, elapsed) in [0.0, 0.1, 0.2].into_iter().enumerate() {
            capture.begin_frame(FrameTick::new(frame as u64, elapsed)).unwrap();
            assert!(capture.should_capture_this_frame(&sensor).unwrap());
        }
    }

    #[test]
    fn manual_sensor_captures_once_after_request() {
        let (capture, _) = setup();
        let sensor = capture
            .register_sensor(SensorDefinition::manual("camera", "on demand"))
            .unwrap();

        let mut results = Vec::new();
        for frame in 0..5u64 {
            capture.begin_frame(FrameTick::new(frame, frame as f64 * 0.1)).unwrap();
            results.push(capture.should_capture_this_frame(&sensor).unwrap());
            if frame == 1 {
                capture.request_capture(&sensor).unwrap();
            }
        }
        assert_eq!(results, vec![false, false, true, false, false]);
    }

    #[test]
    fn reset_invalidates_previous_handles() {
        let (capture, _) = setup();
        let old = capture.register_sensor(camera(0.1)).unwrap();
        capture.register_annotation_definition(AnnotationDefinition::new("bbox", "boxes")).unwrap();
        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();
        let annotation = capture.report_annotation(&old, "bbox", json!([])).unwrap();
        assert!(capture.is_annotation_valid(&annotation));

        capture.reset_simulation().unwrap();

        assert!(!capture.is_valid(&old));
        assert!(!capture.is_annotation_valid(&annotation));
        assert!(capture.should_capture_this_frame(&old).unwrap_err().is_invalid_handle());
        assert!(capture.set_enabled(&old, true).unwrap_err().is_invalid_handle());

        // Same id, new epoch
        let fresh = capture.register_sensor(camera(0.1)).unwrap();
        assert_eq!(fresh.id(), old.id());
        assert_ne!(fresh, old);
        assert!(capture.is_valid(&fresh));
        assert!(!capture.is_valid(&old));
    }

    #[test]
    fn nil_handle_is_never_valid() {
        let (capture, _) = setup();
        capture.register_sensor(camera(0.1)).unwrap();
        let nil = SensorHandle::default();
        assert!(!capture.is_valid(&nil));
        assert!(capture.should_capture_this_frame(&nil).unwrap_err().is_invalid_handle());
    }

    #[test]
    fn capture_outside_scheduled_frame_is_stale() {
        let (capture, _) = setup();
        let sensor = capture
            .register_sensor(camera(0.1).with_frames_between_captures(1))
            .unwrap();

        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();
        capture_now(&capture, &sensor, "rgb_0.png");
        let err = capture
            .report_capture(&sensor, "rgb_0b.png", SensorSpatialData::default(), Map::new())
            .unwrap_err();
        assert!(matches!(err, CaptureError::DuplicateCapture { step: 0, .. }));

        capture.begin_frame(FrameTick::new(1, 0.1)).unwrap();
        let err = capture
            .report_capture(&sensor, "rgb_1.png", SensorSpatialData::default(), Map::new())
            .unwrap_err();
        assert!(matches!(err, CaptureError::StaleOperation { .. }));
    }

    #[test]
    fn disabled_sensor_rejects_reports() {
        let (capture, _) = setup();
        let sensor = capture.register_sensor(camera(0.1)).unwrap();
        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();

        capture.set_enabled(&sensor, false).unwrap();
        assert!(!capture.is_enabled(&sensor).unwrap());
        assert!(!capture.should_capture_this_frame(&sensor).unwrap());
        let err = capture
            .report_capture(&sensor, "rgb.png", SensorSpatialData::default(), Map::new())
            .unwrap_err();
        assert!(matches!(err, CaptureError::SensorDisabled { .. }));

        // Disposal keeps the handle valid
        capture.dispose(&sensor).unwrap();
        assert!(capture.is_valid(&sensor));
    }

    #[test]
    fn unknown_definition_is_rejected() {
        let (capture, _) = setup();
        let sensor = capture.register_sensor(camera(0.1)).unwrap();
        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();

        let err = capture.report_annotation(&sensor, "missing", json!(1)).unwrap_err();
        assert!(matches!(err, CaptureError::UnknownDefinition { .. }));
    }

    #[test]
    fn definition_registration_is_idempotent() {
        let (capture, _) = setup();
        let first = capture
            .register_annotation_definition(AnnotationDefinition::new("bbox", "boxes"))
            .unwrap();
        let again = capture
            .register_annotation_definition(AnnotationDefinition::new("bbox", "boxes"))
            .unwrap();
        assert_eq!(first, again);

        let err = capture
            .register_annotation_definition(AnnotationDefinition::new("bbox", "other"))
            .unwrap_err();
        assert!(matches!(err, CaptureError::DuplicateDefinitionConflict { .. }));
        assert_eq!(capture.annotation_definitions().len(), 1);

        capture
            .register_metric_definition(MetricDefinition::new("bbox", "metric ids are separate"))
            .unwrap();
    }

    #[test]
    fn async_annotation_resolves_exactly_once() {
        let (capture, _) = setup();
        let sensor = capture.register_sensor(camera(0.1)).unwrap();
        capture.register_annotation_definition(AnnotationDefinition::new("seg", "mask")).unwrap();
        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();

        let pending = capture.report_annotation_async(&sensor, "seg").unwrap();
        assert!(capture.is_pending_annotation(&pending));

        let outcome = capture.report_async_annotation(&pending, json!("mask.png")).unwrap();
        assert_eq!(outcome, Resolution::Recorded);
        assert!(!capture.is_pending_annotation(&pending));

        let err = capture.report_async_annotation(&pending, json!("again")).unwrap_err();
        assert!(matches!(err, CaptureError::AlreadyResolved { .. }));
    }

    #[test]
    fn late_async_resolution_is_dropped() {
        let (capture, _) = setup();
        let sensor = capture.register_sensor(camera(0.1)).unwrap();
        capture.register_annotation_definition(AnnotationDefinition::new("seg", "mask")).unwrap();
        capture.register_metric_definition(MetricDefinition::new("latency", "ms")).unwrap();
        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();

        let annotation = capture.report_annotation_async(&sensor, "seg").unwrap();
        let metric = capture.report_metric_async("latency").unwrap();
        capture.reset_simulation().unwrap();

        assert!(!capture.is_pending_annotation(&annotation));
        assert_eq!(
            capture.report_async_annotation(&annotation, json!(1)).unwrap(),
            Resolution::Dropped
        );
        assert_eq!(
            capture.report_async_metric(&metric, json!(1)).unwrap(),
            Resolution::Dropped
        );
    }

    #[test]
    fn nil_async_handles_are_invalid() {
        let (capture, _) = setup();
        assert!(capture
            .report_async_annotation(&AsyncAnnotation::default(), json!(1))
            .unwrap_err()
            .is_invalid_handle());
        assert!(capture
            .report_async_metric(&AsyncMetric::default(), json!(1))
            .unwrap_err()
            .is_invalid_handle());
    }

    #[test]
    fn frames_are_emitted_in_order_once_resolved() {
        let (capture, consumer) = setup();
        let sensor = capture.register_sensor(camera(0.1)).unwrap();
        capture.register_annotation_definition(AnnotationDefinition::new("seg", "mask")).unwrap();

        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();
        capture_now(&capture, &sensor, "rgb_0.png");
        let pending = capture.report_annotation_async(&sensor, "seg").unwrap();

        capture.begin_frame(FrameTick::new(1, 0.1)).unwrap();
        capture_now(&capture, &sensor, "rgb_1.png");
        capture.begin_frame(FrameTick::new(2, 0.2)).unwrap();
        capture_now(&capture, &sensor, "rgb_2.png");

        // Step 0 is still pending and holds back step 1
        assert!(consumer.frames().is_empty());

        capture.report_async_annotation(&pending, json!("seg_0.png")).unwrap();
        let steps: Vec<u64> = consumer.frames().iter().map(|frame| frame.step).collect();
        assert_eq!(steps, vec![0, 1]);
        assert_eq!(consumer.frames()[0].annotations.len(), 1);

        capture.reset_simulation().unwrap();
        let events = consumer.events();
        assert!(matches!(events.first(), Some(DatasetEvent::SimulationStarted(_))));
        let Some(DatasetEvent::SimulationCompleted(metadata)) = events.last() else {
            panic!("expected completion event, got {events:?}");
        };
        assert_eq!(metadata.total_frames, 3);
        assert_eq!(metadata.orphaned_pending, 0);

        let steps: Vec<u64> = consumer.frames().iter().map(|frame| frame.step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
    }

    #[test]
    fn orphaned_pending_entries_are_counted() {
        let (capture, consumer) = setup();
        let sensor = capture.register_sensor(camera(0.1)).unwrap();
        capture.register_annotation_definition(AnnotationDefinition::new("seg", "mask")).unwrap();

        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();
        capture_now(&capture, &sensor, "rgb_0.png");
        capture.report_annotation_async(&sensor, "seg").unwrap();
        capture.reset_simulation().unwrap();

        let frames = consumer.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dropped_pending, 1);
        assert!(frames[0].annotations.is_empty());

        let Some(DatasetEvent::SimulationCompleted(metadata)) = consumer.events().pop() else {
            panic!("expected completion event");
        };
        assert_eq!(metadata.orphaned_pending, 1);
        assert!(metadata.ended_at.is_some());
    }

    #[test]
    fn ending_subscribers_see_the_old_simulation() {
        let (capture, consumer) = setup();
        let sensor = capture.register_sensor(camera(0.1)).unwrap();
        capture.register_metric_definition(MetricDefinition::new("summary", "totals")).unwrap();
        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        capture.on_simulation_ending(move |capture| {
            assert!(capture.is_valid(&sensor));
            capture.report_metric("summary", json!({ "frames": 1 })).unwrap();
            seen.fetch_add(1, Ordering::SeqCst);
        });

        capture.reset_simulation().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!capture.is_valid(&sensor));

        let frames = consumer.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].metrics[0].definition, "summary");
    }

    #[test]
    fn reset_without_simulation_does_nothing() {
        let (capture, consumer) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        capture.on_simulation_ending(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        capture.reset_simulation().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(capture.epoch(), Epoch::FIRST);
        assert!(consumer.events().is_empty());
    }

    struct RejectingConsumer;

    impl CaptureConsumer for RejectingConsumer {
        fn consume(&self, event: contracts::DatasetEvent) -> Result<(), CaptureError> {
            match event {
                DatasetEvent::SimulationCompleted(_) => Err(CaptureError::sink_write("test", "closed")),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn flush_error_leaves_new_simulation_installed() {
        let capture = DatasetCapture::new(Arc::new(RejectingConsumer));
        capture.register_sensor(camera(0.1)).unwrap();
        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();

        let err = capture.reset_simulation().unwrap_err();
        assert!(matches!(err, CaptureError::SinkWrite { .. }));

        assert_eq!(capture.epoch(), Epoch::new(2));
        let sensor = capture.register_sensor(camera(0.1)).unwrap();
        assert_eq!(sensor.epoch(), Epoch::new(2));
        assert!(capture.is_valid(&sensor));
    }

    #[test]
    fn scoped_sensor_is_disabled_on_every_exit() {
        let (capture, _) = setup();

        fn run(capture: &DatasetCapture, fail: bool) -> Result<SensorHandle, CaptureError> {
            let guard = capture.scoped_sensor(SensorDefinition::scheduled("camera", "scoped", 0.1))?;
            let handle = guard.handle();
            capture.begin_frame(FrameTick::new(handle.id(), handle.id() as f64))?;
            if fail {
                capture.report_annotation(&guard, "missing", json!(null))?;
            }
            Ok(handle)
        }

        let handle = run(&capture, false).unwrap();
        assert!(!capture.is_enabled(&handle).unwrap());

        assert!(run(&capture, true).is_err());
        let failed = capture.sensors().last().unwrap().handle;
        assert!(!capture.is_enabled(&failed).unwrap());
    }

    #[test]
    fn new_sequence_restarts_step_numbering() {
        let (capture, consumer) = setup();
        let sensor = capture.register_sensor(camera(0.1)).unwrap();

        for frame in 0..2u64 {
            capture.begin_frame(FrameTick::new(frame, frame as f64 * 0.1)).unwrap();
            capture_now(&capture, &sensor, "rgb.png");
        }
        capture.start_new_sequence();
        capture.begin_frame(FrameTick::new(2, 0.2)).unwrap();
        capture_now(&capture, &sensor, "rgb.png");

        let snapshot = capture.snapshot().unwrap();
        assert_eq!((snapshot.sequence, snapshot.step), (1, 0));
        assert!(snapshot.sequence_time.abs() < 1e-12);

        capture.reset_simulation().unwrap();
        let keys: Vec<(u64, u64)> = consumer
            .frames()
            .iter()
            .map(|frame| (frame.sequence, frame.step))
            .collect();
        assert_eq!(keys, vec![(0, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn metrics_attach_to_sensor_and_annotation() {
        let (capture, consumer) = setup();
        let sensor = capture.register_sensor(camera(0.1)).unwrap();
        capture.register_annotation_definition(AnnotationDefinition::new("bbox", "boxes")).unwrap();
        capture.register_metric_definition(MetricDefinition::new("count", "objects")).unwrap();

        assert!(matches!(
            capture.report_metric("count", json!(0)).unwrap_err(),
            CaptureError::StaleOperation { .. }
        ));

        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();
        let annotation = capture.report_annotation(&sensor, "bbox", json!([[0, 0, 4, 4]])).unwrap();
        capture.report_sensor_metric(&sensor, "count", json!(1)).unwrap();
        capture.report_annotation_metric(&annotation, "count", json!(1)).unwrap();
        let pending = capture.report_sensor_metric_async(&sensor, "count").unwrap();
        assert!(capture.is_pending_metric(&pending));

        capture.begin_frame(FrameTick::new(1, 0.1)).unwrap();
        capture.report_async_metric(&pending, json!(2)).unwrap();
        capture.begin_frame(FrameTick::new(2, 0.2)).unwrap();

        // Frame 0 has left; the annotation can no longer take metrics
        let err = capture
            .report_annotation_metric(&annotation, "count", json!(3))
            .unwrap_err();
        assert!(matches!(err, CaptureError::StaleOperation { .. }));

        let frames = consumer.frames();
        let metrics = &frames[0].metrics;
        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics[0].sensor, Some(sensor));
        assert_eq!(metrics[1].annotation.as_ref(), Some(&annotation));
        assert_eq!(metrics[2].values, json!(2));
    }

    #[test]
    fn annotation_metric_requires_capturing_sensor_and_current_step() {
        let (capture, consumer) = setup();
        let sensor = capture
            .register_sensor(camera(0.1).with_frames_between_captures(1))
            .unwrap();
        capture.register_annotation_definition(AnnotationDefinition::new("bbox", "boxes")).unwrap();
        capture.register_metric_definition(MetricDefinition::new("count", "objects")).unwrap();

        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();
        let annotation = capture.report_annotation(&sensor, "bbox", json!([])).unwrap();
        // Keeps frame 0 open
        let held = capture.report_annotation_async(&sensor, "bbox").unwrap();

        // Frame 1 is off the capture grid
        capture.begin_frame(FrameTick::new(1, 0.1)).unwrap();
        assert!(!capture.should_capture_this_frame(&sensor).unwrap());
        assert!(matches!(
            capture.report_annotation_metric(&annotation, "count", json!(1)).unwrap_err(),
            CaptureError::StaleOperation { .. }
        ));

        capture.set_enabled(&sensor, false).unwrap();
        assert!(matches!(
            capture.report_annotation_metric(&annotation, "count", json!(1)).unwrap_err(),
            CaptureError::SensorDisabled { .. }
        ));

        // Capturing again at frame 2, but the annotation is from step 0
        capture.set_enabled(&sensor, true).unwrap();
        capture.begin_frame(FrameTick::new(2, 0.2)).unwrap();
        assert!(capture.should_capture_this_frame(&sensor).unwrap());
        assert!(matches!(
            capture.report_annotation_metric(&annotation, "count", json!(1)).unwrap_err(),
            CaptureError::StaleOperation { .. }
        ));

        capture.report_async_annotation(&held, json!([])).unwrap();
        capture.begin_frame(FrameTick::new(3, 0.3)).unwrap();
        let frames = consumer.frames();
        assert_eq!(frames[0].step, 0);
        assert!(frames[0].metrics.is_empty());
    }

    #[test]
    fn capture_carries_spatial_data() {
        let (capture, consumer) = setup();
        let sensor = capture.register_sensor(camera(0.1)).unwrap();
        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();

        let ego = Pose::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity());
        let mounted = Pose::new(Vector3::new(1.0, 0.0, 2.0), UnitQuaternion::identity());
        let mut extra = Map::new();
        extra.insert("exposure".into(), json!(0.01));
        capture
            .report_capture(&sensor, "rgb_0.png", SensorSpatialData::from_world_poses(Some(ego), mounted), extra)
            .unwrap();
        capture.shutdown().unwrap();

        let frames = consumer.frames();
        let record = &frames[0].captures[0];
        assert_eq!(record.modality, "camera");
        assert_eq!(record.filename, "rgb_0.png");
        assert_eq!(record.spatial.sensor_pose.position, Vector3::new(0.0, 0.0, 2.0));
        assert_eq!(record.extra["exposure"], json!(0.01));
    }

    #[test]
    fn async_results_can_arrive_from_worker_threads() {
        let consumer = Arc::new(CollectingConsumer::new());
        let capture = Arc::new(DatasetCapture::new(consumer.clone()));
        let sensor = capture.register_sensor(camera(0.1)).unwrap();
        capture.register_annotation_definition(AnnotationDefinition::new("seg", "mask")).unwrap();

        let mut workers = Vec::new();
        for frame in 0..4u64 {
            capture.begin_frame(FrameTick::new(frame, frame as f64 * 0.1)).unwrap();
            let pending = capture.report_annotation_async(&sensor, "seg").unwrap();
            let capture = Arc::clone(&capture);
            workers.push(std::thread::spawn(move || {
                capture.report_async_annotation(&pending, json!(frame))
            }));
        }
        for worker in workers {
            assert_eq!(worker.join().unwrap().unwrap(), Resolution::Recorded);
        }

        capture.reset_simulation().unwrap();
        let frames = consumer.frames();
        assert_eq!(frames.len(), 4);
        for (step, frame) in frames.iter().enumerate() {
            assert_eq!(frame.step, step as u64);
            assert_eq!(frame.annotations[0].value, json!(step as u64));
        }
    }

    #[test]
    fn requested_delta_follows_next_capture() {
        let (capture, _) = setup();
        assert_eq!(capture.next_delta_time(), None);

        capture.register_sensor(camera(0.25)).unwrap();
        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();
        let delta = capture.next_delta_time().unwrap();
        assert!((delta - 0.25).abs() < 1e-9);
    }
}
