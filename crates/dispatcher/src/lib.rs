//! # Dispatcher
//!
//! 数据分发模块。
//!
//! 负责：
//! - 通过 `ChannelConsumer` 从采集线程接收 `DatasetEvent`
//! - Fan-out 到多个 sinks
//! - 隔离慢 sink，不阻塞仿真 tick

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use consumer::ChannelConsumer;
pub use contracts::{DataSink, DatasetEvent};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use sinks::{FileSink, FileSinkConfig, LogSink};
