//! Frame assembly and the pending-report table
//!
//! Reports land in the frame of the step that produced them. A frame is handed
//! to the consumer once the simulation has moved past it and none of its async
//! slots are still pending. Frames leave strictly in (sequence, step) order.

use std::collections::{BTreeMap, HashMap};

use contracts::{
    AnnotationHandle, AnnotationRecord, CaptureError, DefinitionId, Epoch, Frame, MetricRecord,
    PendingId, SensorHandle,
};
use serde_json::Value;

/// Position of a frame inside a simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct FrameKey {
    pub sequence: u64,
    pub step: u64,
}

/// What an async slot resolves into
#[derive(Debug, Clone)]
pub(crate) enum SlotTarget {
    Annotation(AnnotationHandle),
    Metric {
        definition: DefinitionId,
        sensor: Option<SensorHandle>,
        annotation: Option<AnnotationHandle>,
    },
}

impl SlotTarget {
    fn kind(&self) -> &'static str {
        match self {
            Self::Annotation(_) => "annotation",
            Self::Metric { .. } => "metric",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Resolved,
}

#[derive(Debug)]
struct Slot {
    key: FrameKey,
    target: SlotTarget,
    state: SlotState,
}

#[derive(Debug)]
struct PendingFrame {
    frame: Frame,
    pending: u32,
    slots: Vec<u64>,
}

#[derive(Debug)]
pub(crate) struct FrameAssembler {
    epoch: Epoch,
    frames: BTreeMap<FrameKey, PendingFrame>,
    slots: HashMap<u64, Slot>,
    next_slot: u64,
}

impl FrameAssembler {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            frames: BTreeMap::new(),
            slots: HashMap::new(),
            next_slot: 1,
        }
    }

    /// Frame for `key`, created on first use
    pub fn open(&mut self, key: FrameKey, frame: u64, timestamp: f64) -> &mut Frame {
        let epoch = self.epoch;
        &mut self
            .frames
            .entry(key)
            .or_insert_with(|| PendingFrame {
                frame: Frame {
                    epoch,
                    sequence: key.sequence,
                    step: key.step,
                    frame,
                    timestamp,
                    ..Default::default()
                },
                pending: 0,
                slots: Vec::new(),
            })
            .frame
    }

    /// Frame for `key` if it has not been emitted yet
    pub fn get_mut(&mut self, key: FrameKey) -> Option<&mut Frame> {
        self.frames.get_mut(&key).map(|pending| &mut pending.frame)
    }

    /// Reserve a pending slot in an open frame
    pub fn reserve(&mut self, key: FrameKey, target: SlotTarget) -> Result<PendingId, CaptureError> {
        let frame = self
            .frames
            .get_mut(&key)
            .ok_or_else(|| CaptureError::stale(target.kind(), "frame is no longer open"))?;

        let id = self.next_slot;
        self.next_slot += 1;
        frame.pending += 1;
        frame.slots.push(id);
        self.slots.insert(
            id,
            Slot {
                key,
                target,
                state: SlotState::Pending,
            },
        );
        Ok(PendingId::new(id))
    }

    /// Resolve a pending annotation slot
    pub fn resolve_annotation(&mut self, slot: PendingId, value: Value) -> Result<(), CaptureError> {
        self.resolve(slot, "annotation", value)
    }

    /// Resolve a pending metric slot
    pub fn resolve_metric(&mut self, slot: PendingId, values: Value) -> Result<(), CaptureError> {
        self.resolve(slot, "metric", values)
    }

    fn resolve(&mut self, slot: PendingId, kind: &'static str, value: Value) -> Result<(), CaptureError> {
        let id = slot.get();
        let display = format!("{}.{}", self.epoch.get(), id);

        let Some(entry) = self.slots.get_mut(&id) else {
            // Slots leave the table only after resolution
            if id > 0 && id < self.next_slot {
                return Err(CaptureError::AlreadyResolved { kind, id: display });
            }
            return Err(CaptureError::invalid_handle(kind, display));
        };

        if entry.target.kind() != kind {
            return Err(CaptureError::invalid_handle(kind, display));
        }
        if entry.state == SlotState::Resolved {
            return Err(CaptureError::AlreadyResolved { kind, id: display });
        }
        entry.state = SlotState::Resolved;

        let pending = self
            .frames
            .get_mut(&entry.key)
            .ok_or_else(|| CaptureError::stale(&display, "frame already emitted"))?;
        pending.pending = pending.pending.saturating_sub(1);

        match &entry.target {
            SlotTarget::Annotation(annotation) => pending.frame.annotations.push(AnnotationRecord {
                annotation: annotation.clone(),
                value,
            }),
            SlotTarget::Metric {
                definition,
                sensor,
                annotation,
            } => pending.frame.metrics.push(MetricRecord {
                definition: definition.clone(),
                sensor: *sensor,
                annotation: annotation.clone(),
                values: value,
            }),
        }
        Ok(())
    }

    /// Frames that precede `current` and have nothing pending, in order
    pub fn take_ready(&mut self, current: Option<FrameKey>) -> Vec<Frame> {
        let mut ready = Vec::new();
        while let Some(entry) = self.frames.first_entry() {
            let passed = current.is_none_or(|current| *entry.key() < current);
            if !passed || entry.get().pending > 0 {
                break;
            }
            let pending = entry.remove();
            for id in &pending.slots {
                self.slots.remove(id);
            }
            if !pending.frame.is_empty() {
                ready.push(pending.frame);
            }
        }
        ready
    }

    /// Every remaining frame, dropping unresolved slots
    pub fn drain(&mut self) -> (Vec<Frame>, u64) {
        let mut orphaned = 0u64;
        let mut frames = Vec::with_capacity(self.frames.len());
        for (_, mut pending) in std::mem::take(&mut self.frames) {
            pending.frame.dropped_pending = pending.pending;
            orphaned += u64::from(pending.pending);
            if !pending.frame.is_empty() || pending.pending > 0 {
                frames.push(pending.frame);
            }
        }
        self.slots.clear();
        (frames, orphaned)
    }

    pub fn is_pending(&self, slot: PendingId) -> bool {
        self.slots
            .get(&slot.get())
            .is_some_and(|entry| entry.state == SlotState::Pending)
    }

    /// Number of unresolved slots
    pub fn pending(&self) -> usize {
        self.frames.values().map(|frame| frame.pending as usize).sum()
    }

    /// Number of frames not yet emitted
    pub fn queued(&self) -> usize {
        self.frames.len()
    }
}
