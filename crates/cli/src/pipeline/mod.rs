//! Pipeline orchestration module.

mod host;
mod orchestrator;
mod recorder;
mod stats;

pub use host::{HostCounters, SimulatedHost};
pub use orchestrator::{Pipeline, PipelineConfig};
pub use recorder::RecordingConsumer;
pub use stats::PipelineStats;
