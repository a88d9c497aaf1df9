//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::CaptureBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    simulation: SimulationInfo,
    sensors: Vec<SensorInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    definitions: Vec<DefinitionInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct SimulationInfo {
    default_delta_time: f64,
    frames_per_sequence: u64,
    sequences: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_budget: Option<u64>,
}

#[derive(Serialize)]
struct SensorInfo {
    name: String,
    modality: String,
    trigger_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    capture_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_every_frames: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    async_annotations: Vec<String>,
}

#[derive(Serialize)]
struct DefinitionInfo {
    kind: &'static str,
    id: String,
    description: String,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &CaptureBlueprint, args: &InfoArgs) -> ConfigInfo {
    let sensors = blueprint
        .sensors
        .iter()
        .map(|sensor| {
            let detailed = args.sensors;
            SensorInfo {
                name: sensor.name.clone(),
                modality: sensor.definition.modality.clone(),
                trigger_mode: format!("{:?}", sensor.definition.trigger_mode),
                capture_interval: (!sensor.is_manual()).then(|| sensor.definition.capture_interval()),
                request_every_frames: sensor.request_every_frames,
                annotations: if detailed { sensor.annotations.clone() } else { Vec::new() },
                async_annotations: if detailed {
                    sensor.async_annotations.clone()
                } else {
                    Vec::new()
                },
            }
        })
        .collect();

    let mut definitions = Vec::new();
    if args.definitions {
        definitions.extend(blueprint.annotation_definitions.iter().map(|d| DefinitionInfo {
            kind: "annotation",
            id: d.id.to_string(),
            description: d.description.clone(),
        }));
        definitions.extend(blueprint.metric_definitions.iter().map(|d| DefinitionInfo {
            kind: "metric",
            id: d.id.to_string(),
            description: d.description.clone(),
        }));
    }

    let sinks = if args.sinks {
        blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
            })
            .collect()
    } else {
        Vec::new()
    };

    let sim = &blueprint.simulation;
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        simulation: SimulationInfo {
            default_delta_time: sim.default_delta_time,
            frames_per_sequence: sim.frames_per_sequence,
            sequences: sim.sequences,
            frame_budget: blueprint.frame_budget(),
        },
        sensors,
        definitions,
        sinks,
    }
}

fn tree_prefix(index: usize, len: usize) -> &'static str {
    if index + 1 == len {
        "└─"
    } else {
        "├─"
    }
}

fn print_config_info(blueprint: &CaptureBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Capture Sim Configuration                      ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let sim = &blueprint.simulation;
    println!("⏱  Simulation");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Default delta time: {}s", sim.default_delta_time);
    if sim.frames_per_sequence > 0 {
        println!("   ├─ Sequences: {} x {} frames", sim.sequences, sim.frames_per_sequence);
    }
    match blueprint.frame_budget() {
        Some(budget) => println!("   └─ Frame budget: {}", budget),
        None => println!("   └─ Frame budget: unlimited"),
    }

    println!("\n📷 Sensors ({})", blueprint.sensors.len());
    for (i, sensor) in blueprint.sensors.iter().enumerate() {
        let prefix = tree_prefix(i, blueprint.sensors.len());
        let timing = if sensor.is_manual() {
            match sensor.request_every_frames {
                Some(every) => format!("manual, requested every {} frames", every),
                None => "manual".to_string(),
            }
        } else {
            format!("every {}s", sensor.definition.capture_interval())
        };
        println!("   {} {} ({}, {})", prefix, sensor.name, sensor.definition.modality, timing);

        if args.sensors {
            let child = if prefix == "└─" { "   " } else { "│  " };
            if !sensor.annotations.is_empty() {
                println!("   {}  ├─ annotations: {:?}", child, sensor.annotations);
            }
            if !sensor.async_annotations.is_empty() {
                println!("   {}  ├─ async annotations: {:?}", child, sensor.async_annotations);
            }
            println!(
                "   {}  └─ first capture frame: {}",
                child, sensor.definition.first_capture_frame
            );
        }
    }

    if args.definitions {
        let total = blueprint.annotation_definitions.len() + blueprint.metric_definitions.len();
        println!("\n🏷  Definitions ({})", total);
        let ids = blueprint
            .annotation_definitions
            .iter()
            .map(|d| ("annotation", d.id.to_string()))
            .chain(blueprint.metric_definitions.iter().map(|d| ("metric", d.id.to_string())));
        for (i, (kind, id)) in ids.enumerate() {
            println!("   {} {} ({})", tree_prefix(i, total), id, kind);
        }
    }

    if args.sinks && !blueprint.sinks.is_empty() {
        println!("\n📤 Sinks ({})", blueprint.sinks.len());
        for (i, sink) in blueprint.sinks.iter().enumerate() {
            println!(
                "   {} {} ({:?}, queue {})",
                tree_prefix(i, blueprint.sinks.len()),
                sink.name,
                sink.sink_type,
                sink.queue_capacity
            );
        }
    }

    println!();
}
