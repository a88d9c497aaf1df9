//! Consumer and sink interfaces
//!
//! A simulation hands [`DatasetEvent`]s to a [`CaptureConsumer`] on the tick
//! thread. Sinks are the async side behind a consumer.

use serde::{Deserialize, Serialize};

use crate::{CaptureError, Frame, SimulationMetadata};

/// Lifecycle and data events of a simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DatasetEvent {
    SimulationStarted(SimulationMetadata),
    Frame(Frame),
    SimulationCompleted(SimulationMetadata),
}

impl DatasetEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SimulationStarted(_) => "simulation_started",
            Self::Frame(_) => "frame",
            Self::SimulationCompleted(_) => "simulation_completed",
        }
    }
}

/// Receiver of completed frames.
///
/// Called while the simulation is locked: implementations must not block
/// and must not call back into the capture manager.
pub trait CaptureConsumer: Send + Sync {
    fn consume(&self, event: DatasetEvent) -> Result<(), CaptureError>;
}

/// Data output trait
///
/// All sink implementations must implement this trait.
#[trait_variant::make(DataSink: Send)]
pub trait LocalDataSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one event
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, event: &DatasetEvent) -> Result<(), CaptureError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), CaptureError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), CaptureError>;
}
