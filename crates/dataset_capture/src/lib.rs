//! # Dataset Capture
//!
//! 采集会话管理（仿真状态）。
//!
//! 负责：
//! - 懒创建仿真会话，按 epoch 区分句柄
//! - 采集、标注、指标上报（含异步上报）
//! - 帧组装：按 (sequence, step) 顺序交给消费者
//! - 重置：先通知订阅者，再切换会话，最后刷出旧会话
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use contracts::{FrameTick, SensorDefinition, SensorSpatialData};
//! use dataset_capture::{CollectingConsumer, DatasetCapture};
//!
//! let capture = DatasetCapture::new(Arc::new(CollectingConsumer::new()));
//! let camera = capture.register_sensor(SensorDefinition::scheduled("camera", "rgb", 0.1))?;
//!
//! capture.begin_frame(FrameTick::new(0, 0.0))?;
//! if capture.should_capture_this_frame(&camera)? {
//!     capture.report_capture(&camera, "rgb_0.png", SensorSpatialData::default(), Default::default())?;
//! }
//!
//! capture.reset_simulation()?;
//! assert!(!capture.is_valid(&camera));
//! ```

mod assembly;
mod capture;
mod consumer;
mod state;

pub use capture::{DatasetCapture, EndingCallback, SensorGuard, SensorInfo, SimulationSnapshot};
pub use consumer::CollectingConsumer;
pub use scheduler::FrameDecisions;
