//! Manual Capture Example
//!
//! Drives the capture manager by hand: a scheduled camera, a manual sensor
//! requested every few frames, async metrics resolved from a worker task,
//! and a reset between two simulations.
//!
//! Run with: cargo run -p capture_demos --bin manual_capture [config.toml]

use std::sync::Arc;

use contracts::{
    AnnotationDefinition, FrameSource, MetricDefinition, SensorDefinition, SensorSpatialData,
    SinkConfig, SinkType,
};
use dataset_capture::DatasetCapture;
use dispatcher::{create_dispatcher, ChannelConsumer};
use scheduler::SimulationClock;
use serde_json::{json, Map};

const FRAMES_PER_SIMULATION: u64 = 20;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting Manual Capture Demo");

    // ==== Stage 1: Sinks from a config file, or a log sink ====
    let sinks = match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!(path = %path, "Loading blueprint config");
            config_loader::ConfigLoader::load_from_path(std::path::Path::new(&path))?.sinks
        }
        None => vec![SinkConfig {
            name: "log".to_string(),
            sink_type: SinkType::Log,
            queue_capacity: 128,
            params: Default::default(),
        }],
    };

    let (consumer, event_rx) = ChannelConsumer::channel(256);
    let dispatcher_handle = create_dispatcher(sinks, event_rx)?.spawn();
    let capture = Arc::new(DatasetCapture::new(Arc::new(consumer)));

    capture.on_simulation_ending(|capture| {
        if let Err(e) = capture.report_metric("summary", json!({ "epoch": capture.epoch().get() })) {
            tracing::warn!(error = %e, "Failed to report summary metric");
        }
    });

    // ==== Stage 2: Two simulations separated by a reset ====
    for run in 0..2 {
        capture.register_annotation_definition(AnnotationDefinition::new("boxes", "2d boxes"))?;
        capture.register_metric_definition(MetricDefinition::new("latency", "labeler latency"))?;
        capture.register_metric_definition(MetricDefinition::new("summary", "end of run"))?;

        let camera = capture.register_sensor(
            SensorDefinition::scheduled("camera", "front rgb", 0.05).with_frames_between_captures(1),
        )?;
        // Disabled again when the guard goes out of scope
        let on_demand = capture.scoped_sensor(SensorDefinition::manual("camera", "on demand"))?;

        let mut clock = SimulationClock::new(0.05);
        let mut pending = Vec::new();

        for _ in 0..FRAMES_PER_SIMULATION {
            let tick = clock.next_tick(capture.next_delta_time());
            let decisions = capture.begin_frame(tick)?;

            for sensor in [camera, on_demand.handle()] {
                if decisions.capturing.contains(&sensor) {
                    capture.report_capture(
                        &sensor,
                        format!("run{}/{}_{}.png", run, sensor.id(), tick.frame),
                        SensorSpatialData::default(),
                        Map::new(),
                    )?;
                    capture.report_annotation(&sensor, "boxes", json!([[0, 0, 10, 10]]))?;
                    pending.push(capture.report_sensor_metric_async(&sensor, "latency")?);
                }
            }

            if tick.frame % 5 == 4 {
                capture.request_capture(&on_demand)?;
            }
        }

        // Resolve the async metrics off the tick thread
        let worker = {
            let capture = Arc::clone(&capture);
            tokio::task::spawn_blocking(move || {
                for (index, slot) in pending.iter().enumerate() {
                    if let Err(e) = capture.report_async_metric(slot, json!({ "ms": index * 3 })) {
                        tracing::warn!(error = %e, "Async metric rejected");
                    }
                }
            })
        };
        worker.await?;

        if let Some(snapshot) = capture.snapshot() {
            tracing::info!(
                epoch = %snapshot.epoch,
                sensors = snapshot.sensors,
                pending = snapshot.pending_async,
                "Simulation finished"
            );
        }
        drop(on_demand);
        capture.reset_simulation()?;
    }

    // ==== Stage 3: Shutdown ====
    capture.shutdown()?;
    drop(capture);

    for (sink, metrics) in dispatcher_handle.await? {
        tracing::info!(sink = %sink, written = metrics.write_count, dropped = metrics.dropped_count, "Sink finished");
    }

    tracing::info!("Demo complete");
    Ok(())
}
