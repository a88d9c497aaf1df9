//! CaptureBlueprint - Config Loader 输出
//!
//! 描述一次采集运行：仿真时钟、传感器、标注/指标定义、输出路由。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{AnnotationDefinition, CaptureTriggerMode, MetricDefinition, SensorDefinition};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的采集配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 仿真时钟设置
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// 传感器列表
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,

    /// 标注定义
    #[serde(default)]
    pub annotation_definitions: Vec<AnnotationDefinition>,

    /// 指标定义
    #[serde(default)]
    pub metric_definitions: Vec<MetricDefinition>,

    /// 输出路由配置
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

/// 仿真时钟设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// 无传感器请求时使用的帧间隔 (秒)
    #[serde(default = "default_delta_time")]
    pub default_delta_time: f64,

    /// 每个 sequence 的帧数 (0 = 单一 sequence)
    #[serde(default)]
    pub frames_per_sequence: u64,

    /// 运行的 sequence 数量
    #[serde(default = "default_sequences")]
    pub sequences: u64,

    /// 最大帧数 (0 = 不限制)
    #[serde(default)]
    pub max_frames: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_delta_time: default_delta_time(),
            frames_per_sequence: 0,
            sequences: default_sequences(),
            max_frames: 0,
        }
    }
}

fn default_delta_time() -> f64 {
    1.0 / 60.0
}

fn default_sequences() -> u64 {
    1
}

/// 传感器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// 唯一名称
    pub name: String,

    /// 调度策略
    #[serde(flatten)]
    pub definition: SensorDefinition,

    /// 模拟宿主对 manual 传感器发起请求的帧间隔 (仅 CLI 使用)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_every_frames: Option<u64>,

    /// 每次采集时上报的标注定义 ID
    #[serde(default)]
    pub annotations: Vec<String>,

    /// 以异步方式上报的标注定义 ID
    #[serde(default)]
    pub async_annotations: Vec<String>,
}

impl SensorConfig {
    pub fn is_manual(&self) -> bool {
        self.definition.trigger_mode == CaptureTriggerMode::Manual
    }
}

/// Sink 输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink 名称
    pub name: String,

    /// Sink 类型
    pub sink_type: SinkType,

    /// 队列容量
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// 类型特定参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// 日志输出
    Log,
    /// 文件输出 (JSON Lines)
    File,
}

impl CaptureBlueprint {
    pub fn sensor(&self, name: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|sensor| sensor.name == name)
    }

    pub fn scheduled_sensors(&self) -> impl Iterator<Item = &SensorConfig> {
        self.sensors.iter().filter(|sensor| !sensor.is_manual())
    }

    /// 运行的总帧数上限
    pub fn frame_budget(&self) -> Option<u64> {
        let sim = &self.simulation;
        let by_sequence = if sim.frames_per_sequence > 0 {
            Some(sim.frames_per_sequence * sim.sequences.max(1))
        } else {
            None
        };
        let by_max = (sim.max_frames > 0).then_some(sim.max_frames);

        match (by_sequence, by_max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
