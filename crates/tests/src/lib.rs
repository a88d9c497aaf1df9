//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置 -> 采集 -> 分发的完整链路
//! - 调度间隔属性测试（仿真时钟驱动）
//! - 仿真重置后句柄失效

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};

    #[test]
    fn test_blueprint_survives_toml_round_trip() {
        let source = r#"
[simulation]
default_delta_time = 0.05
max_frames = 20

[[sensors]]
name = "front"
modality = "camera"
simulation_delta_time = 0.1
frames_between_captures = 1
annotations = ["boxes"]

[[annotation_definitions]]
id = "boxes"
description = "2d boxes"
"#;
        let blueprint = ConfigLoader::load_from_str(source, ConfigFormat::Toml).unwrap();
        let rendered = ConfigLoader::to_toml(&blueprint).unwrap();
        let reloaded = ConfigLoader::load_from_str(&rendered, ConfigFormat::Toml).unwrap();

        assert_eq!(reloaded.sensors[0].definition, blueprint.sensors[0].definition);
        assert_eq!(reloaded.annotation_definitions, blueprint.annotation_definitions);
        assert_eq!(reloaded.frame_budget(), Some(20));
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{FrameSource, Resolution, SensorSpatialData};
    use dataset_capture::DatasetCapture;
    use dispatcher::{create_dispatcher, ChannelConsumer};
    use scheduler::SimulationClock;
    use serde_json::{json, Map, Value};

    const CONFIG: &str = r#"{
        "simulation": { "default_delta_time": 0.1, "max_frames": 6 },
        "sensors": [
            {
                "name": "front",
                "modality": "camera",
                "simulation_delta_time": 0.1,
                "frames_between_captures": 1,
                "async_annotations": ["segmentation"]
            }
        ],
        "annotation_definitions": [
            { "id": "segmentation", "description": "semantic segmentation" }
        ],
        "sinks": [
            { "name": "jsonl", "sink_type": "file", "params": { "path": "PATH" } }
        ]
    }"#;

    /// End-to-end test: blueprint -> DatasetCapture -> ChannelConsumer -> Dispatcher -> FileSink
    #[tokio::test]
    async fn test_e2e_capture_to_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.jsonl");
        let config = CONFIG.replace("PATH", &path.display().to_string());
        let blueprint = ConfigLoader::load_from_str(&config, ConfigFormat::Json).unwrap();

        let (consumer, event_rx) = ChannelConsumer::channel(64);
        let dispatcher = create_dispatcher(blueprint.sinks.clone(), event_rx).unwrap();
        let dispatcher_handle = dispatcher.spawn();

        let capture = DatasetCapture::new(Arc::new(consumer));
        for definition in &blueprint.annotation_definitions {
            capture.register_annotation_definition(definition.clone()).unwrap();
        }
        let sensor_config = &blueprint.sensors[0];
        let sensor = capture
            .register_sensor(sensor_config.definition.clone())
            .unwrap();

        let mut clock = SimulationClock::new(blueprint.simulation.default_delta_time);
        let mut pending = Vec::new();
        for _ in 0..blueprint.frame_budget().unwrap() {
            let tick = clock.next_tick(capture.next_delta_time());
            let decisions = capture.begin_frame(tick).unwrap();
            if decisions.capturing.contains(&sensor) {
                capture
                    .report_capture(
                        &sensor,
                        format!("front_{}.png", tick.frame),
                        SensorSpatialData::default(),
                        Map::new(),
                    )
                    .unwrap();
                pending.push(
                    capture
                        .report_annotation_async(&sensor, "segmentation")
                        .unwrap(),
                );
            }
        }

        // Resolved from another thread after the frames were simulated
        let resolutions = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    pending
                        .iter()
                        .map(|slot| {
                            capture
                                .report_async_annotation(slot, json!({ "mask": "rle" }))
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
                .join()
                .unwrap()
        });
        assert_eq!(resolutions.len(), 3);
        assert!(resolutions.iter().all(|r| *r == Resolution::Recorded));

        capture.shutdown().unwrap();
        drop(capture);
        let sink_metrics = dispatcher_handle.await.unwrap();
        assert_eq!(sink_metrics[0].1.failure_count, 0);

        let lines: Vec<Value> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        // started + 3 capture frames (0.0, 0.2, 0.4) + completed
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0]["event"], "simulation_started");
        assert_eq!(lines[4]["event"], "simulation_completed");
        assert_eq!(lines[4]["orphaned_pending"], 0);
        for frame in &lines[1..4] {
            assert_eq!(frame["event"], "frame");
            assert_eq!(frame["captures"].as_array().unwrap().len(), 1);
            assert_eq!(frame["annotations"].as_array().unwrap().len(), 1);
        }
        let steps: Vec<u64> = lines[1..4].iter().map(|f| f["step"].as_u64().unwrap()).collect();
        assert_eq!(steps, vec![0, 2, 4]);
    }
}

#[cfg(test)]
mod scheduling_tests {
    use std::sync::Arc;

    use contracts::{FrameSource, SensorDefinition};
    use dataset_capture::{CollectingConsumer, DatasetCapture};
    use scheduler::SimulationClock;

    const EPS: f64 = 1e-6;

    /// Capture times of two sensors with different rates stay on their own grids
    /// while the clock follows the smallest requested gap.
    #[test]
    fn test_capture_times_stay_on_grid() {
        let capture = DatasetCapture::new(Arc::new(CollectingConsumer::new()));
        let fast = capture
            .register_sensor(SensorDefinition::scheduled("camera", "fast", 0.1))
            .unwrap();
        let offset = capture
            .register_sensor(
                SensorDefinition::scheduled("lidar", "offset", 0.15).with_first_capture_frame(1),
            )
            .unwrap();

        let mut clock = SimulationClock::new(1.0);
        let mut fast_times = Vec::new();
        let mut offset_times = Vec::new();
        let mut elapsed = Vec::new();

        for _ in 0..40 {
            let tick = clock.next_tick(capture.next_delta_time());
            let decisions = capture.begin_frame(tick).unwrap();
            elapsed.push(tick.elapsed);
            if decisions.capturing.contains(&fast) {
                fast_times.push(decisions.sequence_time);
            }
            if decisions.capturing.contains(&offset) {
                offset_times.push(decisions.sequence_time);
            }
        }

        for (k, t) in fast_times.iter().enumerate() {
            assert!((t - 0.1 * k as f64).abs() < EPS, "fast capture {k} at {t}");
        }
        for (k, t) in offset_times.iter().enumerate() {
            assert!((t - 0.15 * (k + 1) as f64).abs() < EPS, "offset capture {k} at {t}");
        }

        // Every frame the clock produced was a capture frame for someone
        assert!(elapsed.iter().all(|t| {
            fast_times.iter().chain(&offset_times).any(|c| (c - t).abs() < EPS)
        }));
        assert!(offset_times.len() >= 10);
    }

    /// Skipped frames: a sensor with frames_between_captures = k captures every (k+1)th frame
    #[test]
    fn test_frames_between_captures_spacing() {
        let consumer = Arc::new(CollectingConsumer::new());
        let capture = DatasetCapture::new(consumer.clone());
        let camera = capture
            .register_sensor(
                SensorDefinition::scheduled("camera", "sparse", 0.05).with_frames_between_captures(3),
            )
            .unwrap();

        // Default delta smaller than the sensor's own, but the sensor drives timing
        let mut clock = SimulationClock::new(0.01);
        let mut captured_frames = Vec::new();
        for _ in 0..12 {
            let tick = clock.next_tick(capture.next_delta_time());
            if capture.begin_frame(tick).unwrap().capturing.contains(&camera) {
                captured_frames.push(tick.elapsed);
            }
        }

        for (k, t) in captured_frames.iter().enumerate() {
            assert!((t - 0.2 * k as f64).abs() < EPS);
        }
    }
}

#[cfg(test)]
mod reset_tests {
    use std::sync::Arc;

    use contracts::{
        DatasetEvent, FrameTick, MetricDefinition, Resolution, SensorDefinition, SensorSpatialData,
    };
    use dataset_capture::{CollectingConsumer, DatasetCapture};
    use serde_json::{json, Map};

    /// A reset ends the simulation: subscribers report final data, old handles
    /// become invalid, late async values are dropped and the next simulation
    /// starts from a new epoch.
    #[test]
    fn test_reset_invalidates_previous_simulation() {
        let consumer = Arc::new(CollectingConsumer::new());
        let capture = Arc::new(DatasetCapture::new(consumer.clone()));
        capture
            .register_metric_definition(MetricDefinition::new("final", "reported while ending"))
            .unwrap();
        capture
            .register_metric_definition(MetricDefinition::new("latency", "async latency"))
            .unwrap();
        capture.on_simulation_ending(|capture| {
            capture.report_metric("final", json!({ "ok": true })).unwrap();
        });

        let sensor = capture
            .register_sensor(SensorDefinition::scheduled("camera", "rgb", 0.1))
            .unwrap();
        capture.begin_frame(FrameTick::new(0, 0.0)).unwrap();
        capture
            .report_capture(&sensor, "rgb_0.png", SensorSpatialData::default(), Map::new())
            .unwrap();
        let late = capture.report_metric_async("latency").unwrap();
        let first_epoch = capture.epoch();

        capture.reset_simulation().unwrap();

        assert_eq!(capture.epoch(), first_epoch.next());
        assert!(!capture.is_valid(&sensor));
        assert!(capture
            .should_capture_this_frame(&sensor)
            .unwrap_err()
            .is_invalid_handle());
        assert_eq!(
            capture.report_async_metric(&late, json!(12)).unwrap(),
            Resolution::Dropped
        );

        let events = consumer.take();
        let frame = events
            .iter()
            .find_map(|event| match event {
                DatasetEvent::Frame(frame) => Some(frame),
                _ => None,
            })
            .unwrap();
        assert_eq!(frame.captures.len(), 1);
        assert_eq!(frame.dropped_pending, 1);
        assert!(frame.metrics.iter().any(|m| m.definition == "final"));
        let Some(DatasetEvent::SimulationCompleted(metadata)) = events.last() else {
            panic!("expected completion event");
        };
        assert_eq!(metadata.orphaned_pending, 1);
        assert!(metadata.ended_at.is_some());

        // Next simulation: same id, different epoch
        let next = capture
            .register_sensor(SensorDefinition::scheduled("camera", "rgb", 0.1))
            .unwrap();
        assert_eq!(next.id(), sensor.id());
        assert_ne!(next, sensor);
        assert!(capture.is_valid(&next));
        assert!(capture.metric_definitions().is_empty());
    }
}
