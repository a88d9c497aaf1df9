//! Report records - what a simulation hands to its consumer
//!
//! Values are opaque JSON; the scheduler never interprets them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    AnnotationDefinition, AnnotationHandle, DefinitionId, Epoch, MetricDefinition, SensorHandle,
    SensorSpatialData,
};

/// One recorded observation of a sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub sensor: SensorHandle,
    pub modality: String,
    pub description: String,

    /// Path of the capture data, possibly not yet written
    pub filename: String,

    pub spatial: SensorSpatialData,

    /// Extra name/value pairs emitted next to the sensor
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// A resolved annotation value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub annotation: AnnotationHandle,
    pub value: Value,
}

/// A resolved metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub definition: DefinitionId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<SensorHandle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationHandle>,

    pub values: Value,
}

/// Everything reported during one step of a sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub epoch: Epoch,
    pub sequence: u64,
    pub step: u64,

    /// Host frame index
    pub frame: u64,

    /// Simulation time since the sequence started (seconds)
    pub timestamp: f64,

    pub captures: Vec<CaptureRecord>,
    pub annotations: Vec<AnnotationRecord>,
    pub metrics: Vec<MetricRecord>,

    /// Async entries still pending when the simulation ended
    #[serde(default)]
    pub dropped_pending: u32,
}

impl Frame {
    pub fn is_empty(&self) -> bool {
        self.captures.is_empty() && self.annotations.is_empty() && self.metrics.is_empty()
    }
}

/// Description of a simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetadata {
    pub epoch: Epoch,
    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    pub total_frames: u64,
    pub total_sequences: u64,
    pub sensor_count: usize,
    pub annotation_definitions: Vec<AnnotationDefinition>,
    pub metric_definitions: Vec<MetricDefinition>,

    /// Async entries abandoned at the end of the simulation
    pub orphaned_pending: u64,
}

impl SimulationMetadata {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            started_at: Utc::now(),
            ended_at: None,
            total_frames: 0,
            total_sequences: 0,
            sensor_count: 0,
            annotation_definitions: Vec::new(),
            metric_definitions: Vec::new(),
            orphaned_pending: 0,
        }
    }
}

/// Outcome of resolving an async annotation or metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Value stored in its frame
    Recorded,
    /// The issuing simulation ended; nobody is left to receive the value
    Dropped,
}
