//! Pipeline orchestrator - wires the simulated host, the capture manager and the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::CaptureBlueprint;
use dataset_capture::DatasetCapture;
use dispatcher::ChannelConsumer;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{PipelineStats, RecordingConsumer, SimulatedHost};
use crate::error::CliError;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The capture blueprint
    pub blueprint: CaptureBlueprint,

    /// Frames an async annotation stays pending
    pub async_delay: u64,

    /// Sleep for each frame's delta time
    pub realtime: bool,

    /// Pipeline timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Channel buffer size
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until the frame budget is reached, the timeout expires or `shutdown` flips to true.
    ///
    /// The capture manager is always shut down, so every frame reported so far
    /// reaches the sinks.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        // Dispatcher
        if blueprint.sinks.is_empty() {
            warn!("No sinks configured - frames will only be counted");
        }
        let (channel, event_rx) = ChannelConsumer::channel(self.config.buffer_size.max(1));
        let dispatcher = dispatcher::create_dispatcher(blueprint.sinks.clone(), event_rx)
            .context("Failed to create dispatcher")?;
        let active_sinks = blueprint.sinks.len();
        let dispatcher_handle = dispatcher.spawn();
        info!(active_sinks, "Dispatcher started");

        // Capture manager
        let recorder = Arc::new(RecordingConsumer::new(channel));
        let capture = Arc::new(DatasetCapture::new(recorder.clone()));
        capture.on_simulation_ending(|capture| {
            if let Some(snapshot) = capture.snapshot() {
                info!(
                    epoch = %snapshot.epoch,
                    sequence = snapshot.sequence,
                    step = snapshot.step,
                    pending_async = snapshot.pending_async,
                    queued_frames = snapshot.queued_frames,
                    "Simulation ending"
                );
            }
        });

        let mut host = SimulatedHost::new(Arc::clone(&capture), blueprint, self.config.async_delay)
            .context("Failed to register sensors")?;
        let budget = blueprint.frame_budget();
        info!(frame_budget = ?budget, "Simulation running");

        let loop_result = match self.config.timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.drive(&mut host, budget, shutdown)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(timeout_secs = timeout.as_secs(), "Pipeline timed out");
                        Ok(0.0)
                    }
                }
            }
            None => self.drive(&mut host, budget, shutdown).await,
        };

        // Shutdown
        info!("Shutting down capture...");
        let finish_result = host.finish();
        let sensors = capture.sensors();
        capture
            .shutdown()
            .map_err(|e| CliError::shutdown(e.to_string()))?;

        let counters = host.counters();
        let capture_metrics = recorder.aggregator();
        let events_dropped = recorder.dropped_events();

        // Closing the last sender lets the dispatcher drain and stop
        drop(host);
        drop(capture);
        drop(recorder);

        let sink_metrics = match tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await {
            Ok(Ok(metrics)) => metrics,
            Ok(Err(e)) => {
                warn!(error = %e, "Dispatcher task failed");
                Vec::new()
            }
            Err(_) => {
                warn!("Dispatcher did not finish within 5s");
                Vec::new()
            }
        };

        let simulated_time = loop_result?;
        finish_result.context("Failed to resolve pending annotations")?;

        let stats = PipelineStats {
            host: counters,
            simulated_time,
            duration: start_time.elapsed(),
            sensors,
            active_sinks,
            events_dropped,
            sink_metrics,
            capture_metrics,
        };

        info!(
            frames = stats.host.frames,
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.fps()),
            "Pipeline shutdown complete"
        );
        Ok(stats)
    }

    /// Step the host until a stop condition; returns the simulated time reached
    async fn drive(
        &self,
        host: &mut SimulatedHost,
        budget: Option<u64>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<f64> {
        let mut elapsed = 0.0;
        loop {
            if budget.is_some_and(|budget| host.frames_run() >= budget) {
                info!(frames = host.frames_run(), "Reached frame budget");
                break;
            }
            if *shutdown.borrow() {
                info!(frames = host.frames_run(), "Stop requested");
                break;
            }

            let tick = host
                .step()
                .map_err(|e| CliError::pipeline_execution(e.to_string()))?;
            let delta = tick.elapsed - elapsed;
            elapsed = tick.elapsed;

            if self.config.realtime && delta > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(delta)).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
        Ok(elapsed)
    }
}
