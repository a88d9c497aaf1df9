//! # Scheduler
//!
//! 传感器调度：逐帧决定哪些传感器需要采集。
//!
//! 负责：
//! - 传感器注册与 ID 分配
//! - Scheduled 传感器按 `(k+1) * d` 网格触发
//! - Manual 传感器按请求触发一次
//! - 计算下一帧所需的仿真步长
//!
//! ## 使用示例
//!
//! ```ignore
//! use contracts::{Epoch, FrameSource, SensorDefinition};
//! use scheduler::{SensorRegistry, SimulationClock};
//!
//! let mut registry = SensorRegistry::new(Epoch::FIRST);
//! let camera = registry.register(SensorDefinition::scheduled("camera", "rgb", 0.1))?;
//!
//! let mut clock = SimulationClock::new(1.0 / 60.0);
//! let tick = clock.next_tick(registry.requested_delta_time());
//! registry.begin_frame(tick)?;
//! if registry.should_capture(&camera)? {
//!     // render and report
//! }
//! ```

mod clock;
mod registry;

pub use clock::SimulationClock;
pub use registry::{FrameDecisions, SensorEntry, SensorRegistry, CAPTURE_TIME_EPSILON};
