//! 采集指标收集模块
//!
//! 记录调度、上报与帧输出的运行指标，并提供内存聚合统计。

use std::collections::HashMap;

use contracts::{DatasetEvent, Frame};
use metrics::{counter, gauge, histogram};

/// 记录一帧的调度结果
pub fn record_frame_scheduled(frame: u64, capturing: usize) {
    counter!("capture_frames_scheduled_total").increment(1);
    gauge!("capture_last_frame_index").set(frame as f64);
    histogram!("capture_sensors_per_frame").record(capturing as f64);
}

/// 记录传感器采集上报
pub fn record_capture_reported(modality: &str) {
    counter!(
        "capture_captures_reported_total",
        "modality" => modality.to_string()
    )
    .increment(1);
}

/// 记录标注上报
pub fn record_annotation_reported(definition: &str, deferred: bool) {
    let mode = if deferred { "async" } else { "sync" };
    counter!(
        "capture_annotations_reported_total",
        "definition" => definition.to_string(),
        "mode" => mode.to_string()
    )
    .increment(1);
}

/// 记录指标上报
pub fn record_metric_reported(definition: &str, deferred: bool) {
    let mode = if deferred { "async" } else { "sync" };
    counter!(
        "capture_metrics_reported_total",
        "definition" => definition.to_string(),
        "mode" => mode.to_string()
    )
    .increment(1);
}

/// 记录异步结果的解析 (recorded / dropped)
pub fn record_async_resolved(kind: &str, dropped: bool) {
    let outcome = if dropped { "dropped" } else { "recorded" };
    counter!(
        "capture_async_resolved_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录未解析的异步槽位数量
pub fn record_pending_depth(depth: usize) {
    gauge!("capture_async_pending").set(depth as f64);
}

/// 记录帧输出
pub fn record_frame_emitted(frame: &Frame) {
    counter!("capture_frames_emitted_total").increment(1);
    histogram!("capture_frame_captures").record(frame.captures.len() as f64);

    if frame.dropped_pending > 0 {
        counter!("capture_pending_dropped_total").increment(u64::from(frame.dropped_pending));
    }
}

/// 记录仿真重置
pub fn record_simulation_reset(epoch: u64) {
    counter!("capture_simulation_resets_total").increment(1);
    gauge!("capture_current_epoch").set(epoch as f64);
}

/// 记录事件分发
pub fn record_event_dispatched(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "capture_events_dispatched_total",
        "sink" => sink_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录 sink 队列深度
pub fn record_queue_depth(sink_name: &str, depth: usize) {
    gauge!(
        "capture_sink_queue_depth",
        "sink" => sink_name.to_string()
    )
    .set(depth as f64);
}

/// 采集指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct CaptureMetricsAggregator {
    /// 总帧数
    pub total_frames: u64,

    /// 采集总数
    pub total_captures: u64,

    /// 标注总数
    pub total_annotations: u64,

    /// 指标总数
    pub total_metrics: u64,

    /// 丢弃的异步槽位
    pub total_dropped_pending: u64,

    /// 运行的 simulation 数
    pub simulations: u64,

    /// 每帧采集数统计
    pub captures_per_frame: RunningStats,

    /// 同一 sequence 内相邻帧的时间间隔 (毫秒)
    pub frame_interval_ms: RunningStats,

    /// 各模态采集次数
    pub modality_counts: HashMap<String, u64>,

    last_frame: Option<(u64, u64, f64)>,
}

impl CaptureMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 按事件更新
    pub fn observe(&mut self, event: &DatasetEvent) {
        match event {
            DatasetEvent::SimulationStarted(_) => {
                self.simulations += 1;
                self.last_frame = None;
            }
            DatasetEvent::Frame(frame) => self.update(frame),
            DatasetEvent::SimulationCompleted(_) => {}
        }
    }

    /// 更新聚合统计
    pub fn update(&mut self, frame: &Frame) {
        self.total_frames += 1;
        self.total_captures += frame.captures.len() as u64;
        self.total_annotations += frame.annotations.len() as u64;
        self.total_metrics += frame.metrics.len() as u64;
        self.total_dropped_pending += u64::from(frame.dropped_pending);

        self.captures_per_frame.push(frame.captures.len() as f64);
        for capture in &frame.captures {
            *self
                .modality_counts
                .entry(capture.modality.clone())
                .or_insert(0) += 1;
        }

        let key = (frame.epoch.get(), frame.sequence, frame.timestamp);
        if let Some((epoch, sequence, timestamp)) = self.last_frame {
            if epoch == key.0 && sequence == key.1 {
                self.frame_interval_ms.push((frame.timestamp - timestamp) * 1000.0);
            }
        }
        self.last_frame = Some(key);
    }

    /// 生成摘要报告
    pub fn summary(&self) -> CaptureSummary {
        CaptureSummary {
            total_frames: self.total_frames,
            total_captures: self.total_captures,
            total_annotations: self.total_annotations,
            total_metrics: self.total_metrics,
            total_dropped_pending: self.total_dropped_pending,
            simulations: self.simulations,
            captures_per_frame: StatsSummary::from(&self.captures_per_frame),
            frame_interval_ms: StatsSummary::from(&self.frame_interval_ms),
            modality_counts: self.modality_counts.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct CaptureSummary {
    pub total_frames: u64,
    pub total_captures: u64,
    pub total_annotations: u64,
    pub total_metrics: u64,
    pub total_dropped_pending: u64,
    pub simulations: u64,
    pub captures_per_frame: StatsSummary,
    pub frame_interval_ms: StatsSummary,
    pub modality_counts: HashMap<String, u64>,
}

impl std::fmt::Display for CaptureSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Capture Metrics Summary ===")?;
        writeln!(f, "Simulations: {}", self.simulations)?;
        writeln!(f, "Total frames: {}", self.total_frames)?;
        writeln!(f, "Captures: {}", self.total_captures)?;
        writeln!(f, "Annotations: {}", self.total_annotations)?;
        writeln!(f, "Metrics: {}", self.total_metrics)?;
        writeln!(f, "Dropped pending entries: {}", self.total_dropped_pending)?;
        writeln!(f, "Captures per frame: {}", self.captures_per_frame)?;
        writeln!(f, "Frame interval (ms): {}", self.frame_interval_ms)?;

        if !self.modality_counts.is_empty() {
            writeln!(f, "Captures by modality:")?;
            let mut modalities: Vec<_> = self.modality_counts.iter().collect();
            modalities.sort();
            for (modality, count) in modalities {
                writeln!(f, "  {}: {}", modality, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        CaptureRecord, Epoch, SensorHandle, SensorSpatialData, SimulationMetadata,
    };

    fn frame(sequence: u64, step: u64, timestamp: f64, modalities: &[&str]) -> Frame {
        Frame {
            epoch: Epoch::FIRST,
            sequence,
            step,
            frame: step,
            timestamp,
            captures: modalities
                .iter()
                .enumerate()
                .map(|(i, modality)| CaptureRecord {
                    sensor: SensorHandle::new(i as u64 + 1, Epoch::FIRST),
                    modality: modality.to_string(),
                    description: String::new(),
                    filename: format!("{modality}_{step}.png"),
                    spatial: SensorSpatialData::default(),
                    extra: Default::default(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(value);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = CaptureMetricsAggregator::new();
        aggregator.observe(&DatasetEvent::SimulationStarted(SimulationMetadata::new(
            Epoch::FIRST,
        )));
        aggregator.observe(&DatasetEvent::Frame(frame(0, 0, 0.0, &["camera", "lidar"])));
        aggregator.observe(&DatasetEvent::Frame(frame(0, 1, 0.1, &["camera"])));
        // New sequence does not contribute an interval
        aggregator.observe(&DatasetEvent::Frame(frame(1, 0, 0.0, &[])));

        assert_eq!(aggregator.simulations, 1);
        assert_eq!(aggregator.total_frames, 3);
        assert_eq!(aggregator.total_captures, 3);
        assert_eq!(aggregator.modality_counts.get("camera"), Some(&2));
        assert_eq!(aggregator.frame_interval_ms.count(), 1);
        assert!((aggregator.frame_interval_ms.mean() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = CaptureMetricsAggregator::new();
        aggregator.update(&frame(0, 0, 0.0, &["camera"]));

        let output = format!("{}", aggregator.summary());
        assert!(output.contains("Total frames: 1"));
        assert!(output.contains("camera: 1"));
        assert!(output.contains("Frame interval (ms): N/A"));
    }
}
