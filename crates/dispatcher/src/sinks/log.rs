//! LogSink - logs event summaries via tracing

use contracts::{CaptureError, DataSink, DatasetEvent};
use tracing::{info, instrument};

/// Sink that logs event summaries for debugging
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn log_event_summary(&self, event: &DatasetEvent) {
        match event {
            DatasetEvent::SimulationStarted(meta) => info!(
                sink = %self.name,
                epoch = meta.epoch.get(),
                "Simulation started"
            ),
            DatasetEvent::Frame(frame) => info!(
                sink = %self.name,
                epoch = frame.epoch.get(),
                sequence = frame.sequence,
                step = frame.step,
                timestamp = frame.timestamp,
                captures = frame.captures.len(),
                annotations = frame.annotations.len(),
                metrics = frame.metrics.len(),
                dropped_pending = frame.dropped_pending,
                "Frame received"
            ),
            DatasetEvent::SimulationCompleted(meta) => info!(
                sink = %self.name,
                epoch = meta.epoch.get(),
                frames = meta.total_frames,
                sequences = meta.total_sequences,
                orphaned = meta.orphaned_pending,
                "Simulation completed"
            ),
        }
    }
}

impl DataSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, event),
        fields(sink = %self.name, event = event.kind())
    )]
    async fn write(&mut self, event: &DatasetEvent) -> Result<(), CaptureError> {
        self.log_event_summary(event);
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), CaptureError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Epoch, Frame, SimulationMetadata};

    #[tokio::test]
    async fn test_log_sink_write() {
        let mut sink = LogSink::new("test_log");

        let started = DatasetEvent::SimulationStarted(SimulationMetadata::new(Epoch::FIRST));
        assert!(sink.write(&started).await.is_ok());
        assert!(sink.write(&DatasetEvent::Frame(Frame::default())).await.is_ok());
    }

    #[tokio::test]
    async fn test_log_sink_name() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
    }
}
