//! 配置校验模块
//!
//! 校验规则：
//! - default_delta_time > 0
//! - 传感器名称唯一且非空
//! - 传感器调度参数合法 (Scheduled 需要 simulation_delta_time > 0)
//! - request_every_frames 仅用于 manual 传感器
//! - 标注/指标定义 ID 唯一
//! - 传感器引用的标注定义存在
//! - sink 名称唯一，file sink 需要 path

use std::collections::HashSet;

use contracts::{CaptureBlueprint, CaptureError, SinkType};

/// 校验 CaptureBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &CaptureBlueprint) -> Result<(), CaptureError> {
    validate_simulation(blueprint)?;
    validate_sensor_names(blueprint)?;
    validate_sensor_definitions(blueprint)?;
    validate_definition_ids(blueprint)?;
    validate_annotation_references(blueprint)?;
    validate_sinks(blueprint)?;
    Ok(())
}

/// 校验仿真时钟
fn validate_simulation(blueprint: &CaptureBlueprint) -> Result<(), CaptureError> {
    let sim = &blueprint.simulation;
    if !(sim.default_delta_time.is_finite() && sim.default_delta_time > 0.0) {
        return Err(CaptureError::config_validation(
            "simulation.default_delta_time",
            format!(
                "default_delta_time must be > 0, got {}",
                sim.default_delta_time
            ),
        ));
    }
    if sim.sequences == 0 {
        return Err(CaptureError::config_validation(
            "simulation.sequences",
            "sequences must be >= 1",
        ));
    }
    Ok(())
}

/// 校验传感器名称唯一性
fn validate_sensor_names(blueprint: &CaptureBlueprint) -> Result<(), CaptureError> {
    let mut seen = HashSet::new();
    for (idx, sensor) in blueprint.sensors.iter().enumerate() {
        if sensor.name.trim().is_empty() {
            return Err(CaptureError::config_validation(
                format!("sensors[{}].name", idx),
                "sensor name cannot be empty",
            ));
        }
        if !seen.insert(sensor.name.as_str()) {
            return Err(CaptureError::config_validation(
                format!("sensors[name={}]", sensor.name),
                "duplicate sensor name",
            ));
        }
    }
    Ok(())
}

/// 校验传感器调度参数
fn validate_sensor_definitions(blueprint: &CaptureBlueprint) -> Result<(), CaptureError> {
    for sensor in &blueprint.sensors {
        if let Err(CaptureError::InvalidSensorDefinition { field, message }) =
            sensor.definition.validate()
        {
            return Err(CaptureError::config_validation(
                format!("sensors[{}].{}", sensor.name, field),
                message,
            ));
        }

        match sensor.request_every_frames {
            Some(_) if !sensor.is_manual() => {
                return Err(CaptureError::config_validation(
                    format!("sensors[{}].request_every_frames", sensor.name),
                    "request_every_frames only applies to manual sensors",
                ));
            }
            Some(0) => {
                return Err(CaptureError::config_validation(
                    format!("sensors[{}].request_every_frames", sensor.name),
                    "request_every_frames must be > 0",
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

/// 校验定义 ID 唯一性
fn validate_definition_ids(blueprint: &CaptureBlueprint) -> Result<(), CaptureError> {
    let mut seen = HashSet::new();
    for definition in &blueprint.annotation_definitions {
        if definition.id.is_empty() {
            return Err(CaptureError::config_validation(
                "annotation_definitions.id",
                "definition id cannot be empty",
            ));
        }
        if !seen.insert(definition.id.as_str()) {
            return Err(CaptureError::config_validation(
                format!("annotation_definitions[id={}]", definition.id),
                "duplicate definition id",
            ));
        }
    }

    let mut seen = HashSet::new();
    for definition in &blueprint.metric_definitions {
        if definition.id.is_empty() {
            return Err(CaptureError::config_validation(
                "metric_definitions.id",
                "definition id cannot be empty",
            ));
        }
        if !seen.insert(definition.id.as_str()) {
            return Err(CaptureError::config_validation(
                format!("metric_definitions[id={}]", definition.id),
                "duplicate definition id",
            ));
        }
    }
    Ok(())
}

/// 校验传感器引用的标注定义存在
fn validate_annotation_references(blueprint: &CaptureBlueprint) -> Result<(), CaptureError> {
    let known: HashSet<&str> = blueprint
        .annotation_definitions
        .iter()
        .map(|definition| definition.id.as_str())
        .collect();

    for sensor in &blueprint.sensors {
        let referenced = sensor.annotations.iter().chain(&sensor.async_annotations);
        for id in referenced {
            if !known.contains(id.as_str()) {
                return Err(CaptureError::config_validation(
                    format!("sensors[{}].annotations", sensor.name),
                    format!("annotation definition '{}' not found", id),
                ));
            }
        }
    }
    Ok(())
}

/// 校验 sink 配置
fn validate_sinks(blueprint: &CaptureBlueprint) -> Result<(), CaptureError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(CaptureError::config_validation(
                format!("sinks[{}].name", idx),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(CaptureError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
        if sink.queue_capacity == 0 {
            return Err(CaptureError::config_validation(
                format!("sinks[{}].queue_capacity", sink.name),
                "queue_capacity must be > 0",
            ));
        }
        if sink.sink_type == SinkType::File && !sink.params.contains_key("path") {
            return Err(CaptureError::config_validation(
                format!("sinks[{}].params.path", sink.name),
                "file sink requires a 'path' parameter",
            ));
        }
    }
    Ok(())
}
