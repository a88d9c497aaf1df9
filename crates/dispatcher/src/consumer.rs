//! ChannelConsumer - bridges the tick thread to the async dispatcher

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::{CaptureConsumer, CaptureError, DatasetEvent};
use tokio::sync::mpsc;
use tracing::warn;

/// Consumer that forwards events into a bounded channel without blocking.
///
/// A full channel drops the event and counts it; a closed channel is an error.
pub struct ChannelConsumer {
    tx: mpsc::Sender<DatasetEvent>,
    dropped: AtomicU64,
}

impl ChannelConsumer {
    /// Consumer plus the receiver to hand to a [`crate::Dispatcher`]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DatasetEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn new(tx: mpsc::Sender<DatasetEvent>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Events dropped because the channel was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl CaptureConsumer for ChannelConsumer {
    fn consume(&self, event: DatasetEvent) -> Result<(), CaptureError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(event = event.kind(), "Dispatcher queue full, event dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(event)) => Err(CaptureError::sink_write(
                "dispatcher",
                format!("channel closed, {} event lost", event.kind()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Epoch, Frame, SimulationMetadata};

    #[tokio::test]
    async fn test_forwards_events() {
        let (consumer, mut rx) = ChannelConsumer::channel(4);
        consumer
            .consume(DatasetEvent::SimulationStarted(SimulationMetadata::new(Epoch::FIRST)))
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "simulation_started");
    }

    #[tokio::test]
    async fn test_full_channel_drops() {
        let (consumer, _rx) = ChannelConsumer::channel(1);
        consumer.consume(DatasetEvent::Frame(Frame::default())).unwrap();
        consumer.consume(DatasetEvent::Frame(Frame::default())).unwrap();
        assert_eq!(consumer.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_channel_errors() {
        let (consumer, rx) = ChannelConsumer::channel(1);
        drop(rx);
        let err = consumer
            .consume(DatasetEvent::Frame(Frame::default()))
            .unwrap_err();
        assert!(matches!(err, CaptureError::SinkWrite { .. }));
    }
}
