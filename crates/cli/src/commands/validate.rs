//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::CaptureBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    sensor_count: usize,
    manual_sensor_count: usize,
    annotation_definition_count: usize,
    metric_definition_count: usize,
    sink_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_budget: Option<u64>,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    sensor_count: blueprint.sensors.len(),
                    manual_sensor_count: blueprint
                        .sensors
                        .iter()
                        .filter(|sensor| sensor.is_manual())
                        .count(),
                    annotation_definition_count: blueprint.annotation_definitions.len(),
                    metric_definition_count: blueprint.metric_definitions.len(),
                    sink_count: blueprint.sinks.len(),
                    frame_budget: blueprint.frame_budget(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &CaptureBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sinks.is_empty() {
        warnings.push("No sinks configured - frames will only be counted".to_string());
    }

    if blueprint.sensors.is_empty() {
        warnings.push("No sensors configured - no frame will ever capture".to_string());
    }

    for sensor in &blueprint.sensors {
        if sensor.is_manual() && sensor.request_every_frames.is_none() {
            warnings.push(format!(
                "Manual sensor '{}' has no request_every_frames - it will never capture",
                sensor.name
            ));
        }
    }

    for definition in &blueprint.annotation_definitions {
        let used = blueprint.sensors.iter().any(|sensor| {
            sensor.annotations.iter().any(|id| definition.id == id.as_str())
                || sensor.async_annotations.iter().any(|id| definition.id == id.as_str())
        });
        if !used {
            warnings.push(format!(
                "Annotation definition '{}' is not used by any sensor",
                definition.id
            ));
        }
    }

    if blueprint.frame_budget().is_none() {
        warnings.push("No frame budget - run continues until interrupted".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!(
                "  Sensors: {} ({} manual)",
                summary.sensor_count, summary.manual_sensor_count
            );
            println!(
                "  Definitions: {} annotation, {} metric",
                summary.annotation_definition_count, summary.metric_definition_count
            );
            println!("  Sinks: {}", summary.sink_count);
            if let Some(budget) = summary.frame_budget {
                println!("  Frame budget: {}", budget);
            }
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
[[sensors]]
name = "front"
modality = "camera"
simulation_delta_time = 0.1

[[sensors]]
name = "manual"
modality = "camera"
trigger_mode = "manual"

[[annotation_definitions]]
id = "unused"
description = "never reported"
"#;

    #[test]
    fn valid_config_reports_warnings() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });

        assert!(result.valid);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("Manual sensor 'manual'")));
        assert!(warnings.iter().any(|w| w.contains("'unused'")));
        assert_eq!(result.summary.unwrap().manual_sensor_count, 1);
    }

    #[test]
    fn missing_file_is_invalid() {
        let result = validate_config(&ValidateArgs {
            config: "does/not/exist.toml".into(),
            json: false,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }
}
