//! In-memory consumer

use std::sync::{Mutex, PoisonError};

use contracts::{CaptureConsumer, CaptureError, DatasetEvent, Frame};

/// Keeps every event it receives
#[derive(Debug, Default)]
pub struct CollectingConsumer {
    events: Mutex<Vec<DatasetEvent>>,
}

impl CollectingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DatasetEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|event| match event {
                DatasetEvent::Frame(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn take(&self) -> Vec<DatasetEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl CaptureConsumer for CollectingConsumer {
    fn consume(&self, event: DatasetEvent) -> Result<(), CaptureError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}
