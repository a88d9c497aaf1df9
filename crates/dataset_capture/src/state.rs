//! SimulationState - one capture session
//!
//! Owns the sensor registry, the definition tables and the frame assembler.
//! Every method assumes the caller holds the session lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use contracts::{
    AnnotationDefinition, AnnotationHandle, AsyncAnnotation, AsyncMetric, CaptureConsumer,
    CaptureError, CaptureRecord, DatasetEvent, DefinitionId, Epoch, FrameTick, MetricDefinition,
    MetricRecord, PendingId, SensorDefinition, SensorHandle, SensorSpatialData, SimulationMetadata,
};
use scheduler::{FrameDecisions, SensorRegistry};
use serde_json::{Map, Value};
use tracing::{debug, instrument, trace, warn};

use crate::assembly::{FrameAssembler, FrameKey, SlotTarget};

/// Kind descriptors that can be registered by id
pub(crate) trait Definition: Clone + PartialEq {
    const KIND: &'static str;
    fn id(&self) -> &DefinitionId;
}

impl Definition for AnnotationDefinition {
    const KIND: &'static str = "annotation definition";
    fn id(&self) -> &DefinitionId {
        &self.id
    }
}

impl Definition for MetricDefinition {
    const KIND: &'static str = "metric definition";
    fn id(&self) -> &DefinitionId {
        &self.id
    }
}

/// Definitions in registration order
#[derive(Debug)]
pub(crate) struct DefinitionTable<T> {
    entries: Vec<T>,
    index: HashMap<DefinitionId, usize>,
}

impl<T: Definition> DefinitionTable<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Idempotent for identical content
    fn register(&mut self, definition: T) -> Result<T, CaptureError> {
        if definition.id().is_empty() {
            return Err(CaptureError::config_validation(T::KIND, "id must not be empty"));
        }
        if let Some(&position) = self.index.get(definition.id()) {
            let existing = &self.entries[position];
            if *existing != definition {
                return Err(CaptureError::DuplicateDefinitionConflict {
                    id: definition.id().to_string(),
                });
            }
            return Ok(existing.clone());
        }
        self.index.insert(definition.id().clone(), self.entries.len());
        self.entries.push(definition.clone());
        Ok(definition)
    }

    fn get(&self, id: &str) -> Result<&T, CaptureError> {
        self.index
            .get(id)
            .map(|&position| &self.entries[position])
            .ok_or_else(|| CaptureError::UnknownDefinition { id: id.to_string() })
    }

    fn all(&self) -> &[T] {
        &self.entries
    }
}

/// Current step of the simulation
#[derive(Debug, Clone, Copy)]
struct FrameCursor {
    key: FrameKey,
    tick: FrameTick,
    timestamp: f64,
}

pub(crate) struct SimulationState {
    epoch: Epoch,
    registry: SensorRegistry,
    annotation_definitions: DefinitionTable<AnnotationDefinition>,
    metric_definitions: DefinitionTable<MetricDefinition>,

    cursor: Option<FrameCursor>,
    new_sequence: bool,

    /// Sensors that already reported a capture in the current frame
    captured: HashSet<u64>,

    assembler: FrameAssembler,
    next_annotation: u64,
    metadata: SimulationMetadata,
    consumer: Arc<dyn CaptureConsumer>,
}

impl SimulationState {
    pub fn new(epoch: Epoch, consumer: Arc<dyn CaptureConsumer>) -> Self {
        debug!(%epoch, "simulation created");
        Self {
            epoch,
            registry: SensorRegistry::new(epoch),
            annotation_definitions: DefinitionTable::new(),
            metric_definitions: DefinitionTable::new(),
            cursor: None,
            new_sequence: false,
            captured: HashSet::new(),
            assembler: FrameAssembler::new(epoch),
            next_annotation: 1,
            metadata: SimulationMetadata::new(epoch),
            consumer,
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn sequence(&self) -> u64 {
        self.cursor.map(|cursor| cursor.key.sequence).unwrap_or(0)
    }

    pub fn step(&self) -> u64 {
        self.cursor.map(|cursor| cursor.key.step).unwrap_or(0)
    }

    pub fn current_frame(&self) -> Option<FrameTick> {
        self.cursor.map(|cursor| cursor.tick)
    }

    pub fn pending(&self) -> usize {
        self.assembler.pending()
    }

    pub fn is_slot_pending(&self, slot: PendingId) -> bool {
        self.assembler.is_pending(slot)
    }

    pub fn queued_frames(&self) -> usize {
        self.assembler.queued()
    }

    pub fn annotation_definitions(&self) -> &[AnnotationDefinition] {
        self.annotation_definitions.all()
    }

    pub fn metric_definitions(&self) -> &[MetricDefinition] {
        self.metric_definitions.all()
    }

    // ===== Sensors =====

    pub fn register_sensor(&mut self, definition: SensorDefinition) -> Result<SensorHandle, CaptureError> {
        self.registry.register(definition)
    }

    pub fn set_enabled(&mut self, sensor: &SensorHandle, enabled: bool) -> Result<(), CaptureError> {
        self.registry.set_enabled(sensor, enabled)
    }

    pub fn request_capture(&mut self, sensor: &SensorHandle) -> Result<bool, CaptureError> {
        self.registry.request_capture(sensor)
    }

    pub fn should_capture(&self, sensor: &SensorHandle) -> Result<bool, CaptureError> {
        self.registry.should_capture(sensor)
    }

    pub fn is_annotation_valid(&self, annotation: &AnnotationHandle) -> bool {
        !annotation.is_nil()
            && annotation.epoch() == self.epoch
            && annotation.index < self.next_annotation
            && self.registry.contains(&annotation.sensor)
    }

    // ===== Definitions =====

    pub fn register_annotation_definition(
        &mut self,
        definition: AnnotationDefinition,
    ) -> Result<AnnotationDefinition, CaptureError> {
        self.annotation_definitions.register(definition)
    }

    pub fn register_metric_definition(
        &mut self,
        definition: MetricDefinition,
    ) -> Result<MetricDefinition, CaptureError> {
        self.metric_definitions.register(definition)
    }

    // ===== Frames =====

    pub fn start_new_sequence(&mut self) {
        debug!(epoch = %self.epoch, sequence = self.sequence(), "new sequence requested");
        self.new_sequence = true;
        self.registry.start_new_sequence();
    }

    /// Advance to `tick`, freezing capture decisions and emitting completed frames
    #[instrument(
        name = "simulation_begin_frame",
        level = "debug",
        skip(self),
        fields(epoch = %self.epoch, frame = tick.frame)
    )]
    pub fn begin_frame(&mut self, tick: FrameTick) -> Result<FrameDecisions, CaptureError> {
        let decisions = self.registry.begin_frame(tick)?;

        let first_frame = self.cursor.is_none();
        let key = match self.cursor {
            None => FrameKey { sequence: 0, step: 0 },
            Some(cursor) if self.new_sequence => FrameKey {
                sequence: cursor.key.sequence + 1,
                step: 0,
            },
            Some(cursor) => FrameKey {
                sequence: cursor.key.sequence,
                step: cursor.key.step + 1,
            },
        };
        self.new_sequence = false;
        self.cursor = Some(FrameCursor {
            key,
            tick,
            timestamp: decisions.sequence_time,
        });
        self.captured.clear();

        if !decisions.capturing.is_empty() {
            self.assembler.open(key, tick.frame, decisions.sequence_time);
        }

        self.metadata.total_frames += 1;
        self.metadata.total_sequences = key.sequence + 1;
        observability::record_frame_scheduled(tick.frame, decisions.capturing.len());

        let mut result = Ok(());
        if first_frame {
            let started = self.snapshot_metadata();
            result = self.emit(DatasetEvent::SimulationStarted(started));
        }
        let emitted = self.emit_ready();
        result.and(emitted).map(|_| decisions)
    }

    fn snapshot_metadata(&self) -> SimulationMetadata {
        let mut metadata = self.metadata.clone();
        metadata.sensor_count = self.registry.len();
        metadata.annotation_definitions = self.annotation_definitions.all().to_vec();
        metadata.metric_definitions = self.metric_definitions.all().to_vec();
        metadata
    }

    fn emit(&self, event: DatasetEvent) -> Result<(), CaptureError> {
        trace!(epoch = %self.epoch, event = event.kind(), "emitting event");
        if let DatasetEvent::Frame(frame) = &event {
            observability::record_frame_emitted(frame);
        }
        self.consumer.consume(event)
    }

    fn emit_ready(&mut self) -> Result<(), CaptureError> {
        let current = self.cursor.map(|cursor| cursor.key);
        let mut result = Ok(());
        for frame in self.assembler.take_ready(current) {
            if let Err(e) = self.emit(DatasetEvent::Frame(frame)) {
                warn!(epoch = %self.epoch, error = %e, "consumer rejected frame");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    // ===== Reporting =====

    /// Cursor of the current frame if `sensor` is capturing in it
    fn capturing_frame(&self, sensor: &SensorHandle, operation: &str) -> Result<FrameCursor, CaptureError> {
        let entry = self.registry.get(sensor)?;
        if !entry.is_enabled() {
            return Err(CaptureError::SensorDisabled {
                sensor: sensor.to_string(),
            });
        }
        if !self.registry.should_capture(sensor)? {
            return Err(CaptureError::stale(
                sensor,
                format!("{operation} outside a frame in which the sensor captures"),
            ));
        }
        self.cursor
            .ok_or_else(|| CaptureError::stale(sensor, "no frame has begun"))
    }

    fn current_frame_cursor(&self, operation: &str) -> Result<FrameCursor, CaptureError> {
        self.cursor
            .ok_or_else(|| CaptureError::stale(operation, "no frame has begun"))
    }

    pub fn report_capture(
        &mut self,
        sensor: &SensorHandle,
        filename: String,
        spatial: SensorSpatialData,
        extra: Map<String, Value>,
    ) -> Result<(), CaptureError> {
        let cursor = self.capturing_frame(sensor, "capture reported")?;
        if self.captured.contains(&sensor.id()) {
            return Err(CaptureError::DuplicateCapture {
                sensor: sensor.to_string(),
                step: cursor.key.step,
            });
        }

        let definition = self.registry.get(sensor)?.definition();
        let record = CaptureRecord {
            sensor: *sensor,
            modality: definition.modality.clone(),
            description: definition.description.clone(),
            filename,
            spatial,
            extra,
        };
        observability::record_capture_reported(&record.modality);

        self.captured.insert(sensor.id());
        self.open_frame(cursor).captures.push(record);
        Ok(())
    }

    fn new_annotation(
        &mut self,
        sensor: &SensorHandle,
        definition: &str,
        operation: &str,
    ) -> Result<(AnnotationHandle, FrameCursor), CaptureError> {
        let cursor = self.capturing_frame(sensor, operation)?;
        let definition = self.annotation_definitions.get(definition)?.id.clone();

        let handle = AnnotationHandle {
            index: self.next_annotation,
            definition,
            sensor: *sensor,
            sequence: cursor.key.sequence,
            step: cursor.key.step,
        };
        self.next_annotation += 1;
        Ok((handle, cursor))
    }

    pub fn report_annotation(
        &mut self,
        sensor: &SensorHandle,
        definition: &str,
        value: Value,
    ) -> Result<AnnotationHandle, CaptureError> {
        let (handle, cursor) = self.new_annotation(sensor, definition, "annotation reported")?;
        observability::record_annotation_reported(definition, false);

        self.open_frame(cursor).annotations.push(contracts::AnnotationRecord {
            annotation: handle.clone(),
            value,
        });
        Ok(handle)
    }

    pub fn report_annotation_async(
        &mut self,
        sensor: &SensorHandle,
        definition: &str,
    ) -> Result<AsyncAnnotation, CaptureError> {
        let (handle, cursor) = self.new_annotation(sensor, definition, "async annotation reserved")?;
        observability::record_annotation_reported(definition, true);

        self.open_frame(cursor);
        let slot = self
            .assembler
            .reserve(cursor.key, SlotTarget::Annotation(handle.clone()))?;
        observability::record_pending_depth(self.assembler.pending());

        Ok(AsyncAnnotation {
            annotation: handle,
            slot,
        })
    }

    pub fn report_metric(&mut self, definition: &str, values: Value) -> Result<(), CaptureError> {
        let cursor = self.current_frame_cursor("metric")?;
        let definition = self.metric_definitions.get(definition)?.id.clone();
        observability::record_metric_reported(&definition, false);

        self.open_frame(cursor).metrics.push(MetricRecord {
            definition,
            sensor: None,
            annotation: None,
            values,
        });
        Ok(())
    }

    pub fn report_sensor_metric(
        &mut self,
        sensor: &SensorHandle,
        definition: &str,
        values: Value,
    ) -> Result<(), CaptureError> {
        let cursor = self.capturing_frame(sensor, "metric reported")?;
        let definition = self.metric_definitions.get(definition)?.id.clone();
        observability::record_metric_reported(&definition, false);

        self.open_frame(cursor).metrics.push(MetricRecord {
            definition,
            sensor: Some(*sensor),
            annotation: None,
            values,
        });
        Ok(())
    }

    pub fn report_annotation_metric(
        &mut self,
        annotation: &AnnotationHandle,
        definition: &str,
        values: Value,
    ) -> Result<(), CaptureError> {
        if !self.is_annotation_valid(annotation) {
            return Err(CaptureError::invalid_handle("annotation", annotation));
        }
        let cursor = self.capturing_frame(&annotation.sensor, "annotation metric reported")?;
        if (cursor.key.sequence, cursor.key.step) != (annotation.sequence, annotation.step) {
            return Err(CaptureError::stale(
                annotation,
                "annotation belongs to an earlier step",
            ));
        }
        let definition = self.metric_definitions.get(definition)?.id.clone();
        observability::record_metric_reported(&definition, false);

        self.open_frame(cursor).metrics.push(MetricRecord {
            definition,
            sensor: Some(annotation.sensor),
            annotation: Some(annotation.clone()),
            values,
        });
        Ok(())
    }

    /// Reserve a metric slot, attached to `sensor` when given
    pub fn report_metric_async(
        &mut self,
        definition: &str,
        sensor: Option<&SensorHandle>,
    ) -> Result<AsyncMetric, CaptureError> {
        let cursor = match sensor {
            Some(sensor) => self.capturing_frame(sensor, "async metric reserved")?,
            None => self.current_frame_cursor("metric")?,
        };
        let definition = self.metric_definitions.get(definition)?.id.clone();
        observability::record_metric_reported(&definition, true);

        self.open_frame(cursor);
        let slot = self.assembler.reserve(
            cursor.key,
            SlotTarget::Metric {
                definition: definition.clone(),
                sensor: sensor.copied(),
                annotation: None,
            },
        )?;
        observability::record_pending_depth(self.assembler.pending());

        Ok(AsyncMetric {
            definition,
            slot,
            epoch: self.epoch,
        })
    }

    pub fn resolve_annotation(&mut self, pending: &AsyncAnnotation, value: Value) -> Result<(), CaptureError> {
        self.assembler.resolve_annotation(pending.slot, value)?;
        observability::record_async_resolved("annotation", false);
        observability::record_pending_depth(self.assembler.pending());
        self.emit_ready()
    }

    pub fn resolve_metric(&mut self, pending: &AsyncMetric, values: Value) -> Result<(), CaptureError> {
        self.assembler.resolve_metric(pending.slot, values)?;
        observability::record_async_resolved("metric", false);
        observability::record_pending_depth(self.assembler.pending());
        self.emit_ready()
    }

    fn open_frame(&mut self, cursor: FrameCursor) -> &mut contracts::Frame {
        self.assembler
            .open(cursor.key, cursor.tick.frame, cursor.timestamp)
    }

    /// Emit every remaining frame and the completion event.
    ///
    /// Pending slots are dropped. A simulation that never began a frame emits nothing.
    #[instrument(name = "simulation_finish", skip(self), fields(epoch = %self.epoch))]
    pub fn finish(mut self) -> Result<(), CaptureError> {
        if self.cursor.is_none() {
            debug!("simulation ended before its first frame");
            return Ok(());
        }

        let (frames, orphaned) = self.assembler.drain();
        if orphaned > 0 {
            warn!(orphaned, "dropping unresolved async reports");
        }

        let mut result = Ok(());
        for frame in frames {
            if let Err(e) = self.emit(DatasetEvent::Frame(frame)) {
                warn!(error = %e, "consumer rejected frame during flush");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        self.metadata.orphaned_pending = orphaned;
        self.metadata.ended_at = Some(Utc::now());
        let completed = self.snapshot_metadata();
        debug!(
            total_frames = completed.total_frames,
            total_sequences = completed.total_sequences,
            "simulation completed"
        );
        result.and(self.emit(DatasetEvent::SimulationCompleted(completed)))
    }
}
