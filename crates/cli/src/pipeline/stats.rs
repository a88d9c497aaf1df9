//! Pipeline statistics and metrics.

use std::time::Duration;

use dataset_capture::SensorInfo;
use dispatcher::MetricsSnapshot;
use observability::CaptureMetricsAggregator;

use super::HostCounters;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// What the simulated host reported
    pub host: HostCounters,

    /// Simulated seconds covered by the run
    pub simulated_time: f64,

    /// Wall-clock duration of the run
    pub duration: Duration,

    /// Sensors of the last simulation before shutdown
    pub sensors: Vec<SensorInfo>,

    /// Number of sinks that received data
    pub active_sinks: usize,

    /// Events lost between the capture thread and the dispatcher
    pub events_dropped: u64,

    /// Per-sink final metrics
    pub sink_metrics: Vec<(String, MetricsSnapshot)>,

    /// Aggregated frame statistics
    pub capture_metrics: CaptureMetricsAggregator,
}

impl PipelineStats {
    /// Simulated frames per wall-clock second
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.host.frames as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Capture Statistics                        ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Simulated time: {:.3}s", self.simulated_time);
        println!("   ├─ Frames simulated: {}", self.host.frames);
        println!("   ├─ Sequences: {}", self.host.sequences);
        println!("   ├─ FPS: {:.2}", self.fps());
        println!("   └─ Active sinks: {}", self.active_sinks);

        println!("\n📝 Reports");
        println!("   ├─ Captures: {}", self.host.captures);
        println!("   ├─ Annotations: {}", self.host.annotations);
        println!("   ├─ Metrics: {}", self.host.metrics);
        println!("   ├─ Capture requests: {}", self.host.capture_requests);
        println!(
            "   └─ Async annotations: {} recorded, {} dropped",
            self.host.async_recorded, self.host.async_dropped
        );

        if !self.sensors.is_empty() {
            println!("\n📷 Sensors ({})", self.sensors.len());
            for (i, sensor) in self.sensors.iter().enumerate() {
                let prefix = if i == self.sensors.len() - 1 { "└─" } else { "├─" };
                println!(
                    "   {} {} {} ({:?}): {} captures{}",
                    prefix,
                    sensor.handle,
                    sensor.definition.modality,
                    sensor.definition.trigger_mode,
                    sensor.capture_count,
                    if sensor.enabled { "" } else { ", disabled" }
                );
            }
        }

        if !self.sink_metrics.is_empty() {
            println!("\n📤 Sinks");
            for (i, (name, snapshot)) in self.sink_metrics.iter().enumerate() {
                let prefix = if i == self.sink_metrics.len() - 1 { "└─" } else { "├─" };
                println!(
                    "   {} {}: {} written, {} failed, {} dropped",
                    prefix, name, snapshot.write_count, snapshot.failure_count, snapshot.dropped_count
                );
            }
        }

        if self.events_dropped > 0 {
            println!("\n⚠️  {} events dropped before reaching the dispatcher", self.events_dropped);
        }

        println!("\n{}", self.capture_metrics.summary());
    }
}
