//! 按固定时间窗口统计服务器与各客户端之间的进出流量
//!
//! 数据源并发调用 [`Aggregator::record`]，刷新驱动定期调用
//! [`Aggregator::drain`] 取出已关闭的窗口并写入 CSV / SQLite。

pub mod aggregator;
pub mod config;
pub mod driver;
pub mod error;
#[cfg(feature = "live")]
pub mod live_monitor;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod protocol;
mod schema;
pub mod simulate_monitor;
pub mod sink;
pub mod sqlite_sink;
pub mod window;

pub use aggregator::{Aggregator, AggregatorConfig, AggregatorStats, LateDataPolicy};
pub use model::{BucketCounters, BucketKey, Direction, Observation, OutputRow};
pub use window::{window_start, WindowSize};
