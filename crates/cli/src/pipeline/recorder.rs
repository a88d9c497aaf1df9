//! Consumer that tallies events before forwarding them to the dispatcher

use std::sync::{Mutex, PoisonError};

use contracts::{CaptureConsumer, CaptureError, DatasetEvent};
use dispatcher::ChannelConsumer;
use observability::CaptureMetricsAggregator;

pub struct RecordingConsumer {
    inner: ChannelConsumer,
    aggregator: Mutex<CaptureMetricsAggregator>,
}

impl RecordingConsumer {
    pub fn new(inner: ChannelConsumer) -> Self {
        Self {
            inner,
            aggregator: Mutex::new(CaptureMetricsAggregator::new()),
        }
    }

    /// Copy of the statistics gathered so far
    pub fn aggregator(&self) -> CaptureMetricsAggregator {
        self.aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events lost because the dispatcher queue was full
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped_count()
    }
}

impl CaptureConsumer for RecordingConsumer {
    fn consume(&self, event: DatasetEvent) -> Result<(), CaptureError> {
        if let DatasetEvent::Frame(frame) = &event {
            observability::record_frame_emitted(frame);
        }
        self.aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(&event);
        self.inner.consume(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Epoch, Frame, SimulationMetadata};

    #[tokio::test]
    async fn observes_and_forwards() {
        let (channel, mut rx) = ChannelConsumer::channel(8);
        let recorder = RecordingConsumer::new(channel);

        recorder
            .consume(DatasetEvent::SimulationStarted(SimulationMetadata::new(
                Epoch::FIRST,
            )))
            .unwrap();
        recorder
            .consume(DatasetEvent::Frame(Frame::default()))
            .unwrap();

        let aggregator = recorder.aggregator();
        assert_eq!(aggregator.simulations, 1);
        assert_eq!(aggregator.total_frames, 1);

        assert_eq!(rx.recv().await.unwrap().kind(), "simulation_started");
        assert_eq!(rx.recv().await.unwrap().kind(), "frame");
    }
}
