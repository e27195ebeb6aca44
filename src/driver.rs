use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::model::OutputRow;
use crate::monitor::PacketSource;
use crate::sink::RowSink;

const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// 按 1024 进位显示字节数，例如 `2.00 KB`
fn human_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// 一批汇总行的进出字节总量
fn traffic_summary(rows: &[OutputRow]) -> (String, String) {
    let (bytes_in, bytes_out) = rows.iter().fold((0u64, 0u64), |(i, o), row| {
        (i.saturating_add(row.bytes_in), o.saturating_add(row.bytes_out))
    });
    (human_bytes(bytes_in), human_bytes(bytes_out))
}

/// 周期刷新驱动：定时调用 `drain`，把关闭的窗口写入所有输出端
pub struct FlushDriver {
    aggregator: Arc<Aggregator>,
    sinks: Vec<Box<dyn RowSink>>,
    grace: Duration,
}

impl FlushDriver {
    pub fn new(aggregator: Arc<Aggregator>, sinks: Vec<Box<dyn RowSink>>, grace: Duration) -> Self {
        Self {
            aggregator,
            sinks,
            grace,
        }
    }

    /// 只有结束时刻不晚于 `now - grace` 的窗口才会被刷新
    pub fn cutoff_for(&self, now: DateTime<Utc>) -> f64 {
        let now = now.timestamp_micros() as f64 / 1_000_000.0;
        now - self.grace.as_secs_f64() - self.aggregator.window_size().seconds() as f64
    }

    /// 执行一次刷新，返回写出的行数
    pub fn tick(&mut self, now: DateTime<Utc>) -> usize {
        let rows = self.aggregator.drain(self.cutoff_for(now));
        self.emit(&rows);
        rows.len()
    }

    /// 退出前刷新所有剩余的桶
    pub fn finish(&mut self) -> usize {
        let rows = self.aggregator.drain_all();
        self.emit(&rows);
        info!(rows = rows.len(), "最终刷新完成");
        rows.len()
    }

    fn emit(&mut self, rows: &[OutputRow]) {
        if rows.is_empty() {
            return;
        }

        let (bytes_in, bytes_out) = traffic_summary(rows);
        info!(rows = rows.len(), %bytes_in, %bytes_out, "窗口已关闭");

        // 写入失败只记录日志，数据不会回填到聚合器
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.write_rows(rows) {
                error!(sink = sink.name(), rows = rows.len(), "写入输出失败: {}", e);
            }
        }
    }

    /// 在阻塞线程池中执行一次刷新，输出端的文件与数据库 I/O 不占用异步线程
    async fn offload<F>(self, step: F) -> Result<(Self, usize), JoinError>
    where
        F: FnOnce(&mut Self) -> usize + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let mut driver = self;
            let rows = step(&mut driver);
            (driver, rows)
        })
        .await
    }

    /// 主循环：按间隔刷新，直到收到停止信号、数据源结束或到达运行时长
    ///
    /// 退出时先停止数据源，再刷新全部剩余的桶；返回写出的总行数。
    pub async fn run(
        mut self,
        source: &mut dyn PacketSource,
        running: Arc<AtomicBool>,
        flush_interval: Duration,
        duration: Option<Duration>,
    ) -> Result<usize, JoinError> {
        let started = Instant::now();
        let mut interval = time::interval(flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut total = 0;

        loop {
            interval.tick().await;

            if !running.load(Ordering::SeqCst) {
                info!("收到停止信号");
                break;
            }
            if source.is_finished() {
                info!(source = source.name(), "数据源已结束");
                break;
            }
            if duration.is_some_and(|d| started.elapsed() >= d) {
                info!("达到运行时长");
                break;
            }

            match self.offload(|driver| driver.tick(Utc::now())).await {
                Ok((driver, flushed)) => {
                    self = driver;
                    debug!(flushed, open = self.aggregator.open_buckets(), "刷新周期");
                    total += flushed;
                }
                Err(e) => {
                    error!("刷新任务异常退出: {}", e);
                    if let Err(e) = source.stop() {
                        warn!(source = source.name(), "停止数据源失败: {}", e);
                    }
                    return Err(e);
                }
            }
        }

        // 先停止生产者，保证最终刷新之后不会再有写入
        if let Err(e) = source.stop() {
            warn!(source = source.name(), "停止数据源失败: {}", e);
        }
        let (_, flushed) = self.offload(|driver| driver.finish()).await?;
        Ok(total + flushed)
    }
}
