//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if args.max_frames > 0 {
        info!(max_frames = args.max_frames, "Overriding max frames from CLI");
        blueprint.simulation.max_frames = args.max_frames;
    }
    if let Some(delta) = args.delta_time {
        if !(delta.is_finite() && delta > 0.0) {
            return Err(CliError::invalid_override("delta-time", "must be a positive number").into());
        }
        info!(delta, "Overriding default delta time from CLI");
        blueprint.simulation.default_delta_time = delta;
    }

    info!(
        sensors = blueprint.sensors.len(),
        annotation_definitions = blueprint.annotation_definitions.len(),
        metric_definitions = blueprint.metric_definitions.len(),
        sinks = blueprint.sinks.len(),
        frame_budget = ?blueprint.frame_budget(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        blueprint,
        async_delay: args.async_delay,
        realtime: args.realtime,
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        buffer_size: args.buffer_size,
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Received shutdown signal, stopping capture...");
        let _ = shutdown_tx.send(true);
    });

    info!("Starting pipeline...");
    let result = Pipeline::new(pipeline_config).run(shutdown_rx).await;
    signal_task.abort();

    let stats = result.context("Pipeline execution failed")?;
    info!(
        frames = stats.host.frames,
        captures = stats.host.captures,
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        "Pipeline completed successfully"
    );
    stats.print_summary();

    info!("Capture Sim finished");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &contracts::CaptureBlueprint) {
    let sim = &blueprint.simulation;
    println!("\n=== Configuration Summary ===\n");
    println!("Simulation:");
    println!("  Default delta time: {}s", sim.default_delta_time);
    match blueprint.frame_budget() {
        Some(budget) => println!("  Frame budget: {}", budget),
        None => println!("  Frame budget: unlimited"),
    }
    if sim.frames_per_sequence > 0 {
        println!(
            "  Sequences: {} x {} frames",
            sim.sequences, sim.frames_per_sequence
        );
    }

    println!("\nSensors ({}):", blueprint.sensors.len());
    for sensor in &blueprint.sensors {
        println!(
            "  - {} ({}, {:?}) every {}s",
            sensor.name,
            sensor.definition.modality,
            sensor.definition.trigger_mode,
            sensor.definition.capture_interval()
        );
    }

    if !blueprint.sinks.is_empty() {
        println!("\nSinks ({}):", blueprint.sinks.len());
        for sink in &blueprint.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}
