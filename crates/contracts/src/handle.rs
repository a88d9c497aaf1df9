//! Handles - opaque references into a simulation
//!
//! Handles carry no state of their own. Each one is tagged with the
//! [`Epoch`] of the simulation that issued it; a handle is only valid
//! while that epoch is the current one and its id is still present.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::DefinitionId;

/// Generation marker of a simulation.
///
/// Epoch 0 is reserved for nil handles; the first simulation runs as epoch 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Epoch(u64);

impl Epoch {
    pub const NIL: Epoch = Epoch(0);
    pub const FIRST: Epoch = Epoch(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn is_nil(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch-{}", self.0)
    }
}

/// Handle to a registered sensor.
///
/// The default value is the nil handle, which is never valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorHandle {
    id: u64,
    epoch: Epoch,
}

impl SensorHandle {
    pub fn new(id: u64, epoch: Epoch) -> Self {
        Self { id, epoch }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn is_nil(&self) -> bool {
        self.id == 0
    }
}

impl fmt::Display for SensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor-{}.{}", self.epoch.0, self.id)
    }
}

/// Handle to one reported annotation instance.
///
/// Identifies the definition, the sensor it was reported on and the
/// (sequence, step) of the frame that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationHandle {
    /// Per-simulation instance number, 0 for nil
    pub index: u64,
    pub definition: DefinitionId,
    pub sensor: SensorHandle,
    pub sequence: u64,
    pub step: u64,
}

impl AnnotationHandle {
    pub fn is_nil(&self) -> bool {
        self.index == 0
    }

    pub fn epoch(&self) -> Epoch {
        self.sensor.epoch()
    }
}

impl fmt::Display for AnnotationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "annotation-{}.{}({})",
            self.epoch().0,
            self.index,
            self.definition
        )
    }
}

/// Reserved slot in a simulation's pending-report table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PendingId(u64);

impl PendingId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Annotation whose value is supplied after its frame has passed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AsyncAnnotation {
    pub annotation: AnnotationHandle,
    pub slot: PendingId,
}

impl AsyncAnnotation {
    pub fn is_nil(&self) -> bool {
        self.slot.0 == 0
    }

    pub fn epoch(&self) -> Epoch {
        self.annotation.epoch()
    }
}

impl fmt::Display for AsyncAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "async-{}.{}", self.epoch().0, self.slot.0)
    }
}

/// Metric whose values are supplied after its frame has passed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AsyncMetric {
    pub definition: DefinitionId,
    pub slot: PendingId,
    pub epoch: Epoch,
}

impl AsyncMetric {
    pub fn is_nil(&self) -> bool {
        self.slot.0 == 0
    }
}

impl fmt::Display for AsyncMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "async-{}.{}({})", self.epoch.0, self.slot.0, self.definition)
    }
}
