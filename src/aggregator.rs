use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::model::{BucketCounters, BucketKey, Direction, Observation, OutputRow};
use crate::window::{window_start, WindowSize};

/// 已刷新窗口再次收到数据时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LateDataPolicy {
    /// 为迟到数据新建桶，之后单独输出
    #[default]
    Reopen,
    /// 丢弃落在已刷新窗口内的数据
    Drop,
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub server_address: String,
    pub window_size: WindowSize,
    pub late_data: LateDataPolicy,
}

impl AggregatorConfig {
    pub fn new(server_address: impl Into<String>, window_size: WindowSize) -> Self {
        Self {
            server_address: server_address.into(),
            window_size,
            late_data: LateDataPolicy::default(),
        }
    }

    pub fn with_late_data(mut self, policy: LateDataPolicy) -> Self {
        self.late_data = policy;
        self
    }
}

/// 聚合器统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub recorded: u64,
    pub ignored: u64,
    pub late_dropped: u64,
    pub rows_emitted: u64,
    pub drains: u64,
}

#[derive(Default)]
struct Counters {
    recorded: AtomicU64,
    ignored: AtomicU64,
    late_dropped: AtomicU64,
    rows_emitted: AtomicU64,
    drains: AtomicU64,
}

#[derive(Default)]
struct State {
    buckets: HashMap<BucketKey, BucketCounters>,
    /// 已刷新的最大窗口起点，仅 `LateDataPolicy::Drop` 使用
    watermark: Option<DateTime<Utc>>,
}

/// 按 (窗口, 客户端, 协议) 累计进出字节数
///
/// `record` 可被任意多个线程并发调用；`drain` 由单个周期驱动调用。
/// 所有状态位于同一把锁之后，计数对的更新与扫描删除互斥。
pub struct Aggregator {
    config: AggregatorConfig,
    state: Mutex<State>,
    stats: Counters,
}

/// 判断流量方向并找出客户端地址；与服务器无关时返回 None
pub fn classify<'a>(
    observation: &'a Observation,
    server_address: &str,
) -> Option<(Direction, &'a str)> {
    if observation.destination_address == server_address {
        Some((Direction::Inbound, observation.source_address.as_str()))
    } else if observation.source_address == server_address {
        Some((Direction::Outbound, observation.destination_address.as_str()))
    } else {
        None
    }
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            stats: Counters::default(),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn window_size(&self) -> WindowSize {
        self.config.window_size
    }

    // 临界区内不会 panic，被毒化的锁中状态依然一致
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 以配置中的服务器地址记录一条观测
    pub fn record(&self, observation: &Observation) {
        self.record_for(observation, &self.config.server_address);
    }

    pub fn record_for(&self, observation: &Observation, server_address: &str) {
        let Some((direction, client)) = classify(observation, server_address) else {
            self.stats.ignored.fetch_add(1, Ordering::Relaxed);
            trace!(
                src = %observation.source_address,
                dst = %observation.destination_address,
                "忽略与服务器无关的数据包"
            );
            return;
        };

        let key = BucketKey {
            window_start: window_start(observation.timestamp, self.config.window_size),
            client_address: client.to_string(),
            protocol: observation.protocol.clone(),
        };

        {
            let mut state = self.lock();
            if self.config.late_data == LateDataPolicy::Drop
                && state.watermark.is_some_and(|mark| key.window_start <= mark)
            {
                drop(state);
                self.stats.late_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(window = %key.window_start, client = %key.client_address, "丢弃迟到数据");
                return;
            }
            state
                .buckets
                .entry(key)
                .or_default()
                .add(direction, observation.byte_length);
        }

        self.stats.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// 取出所有窗口起点不晚于 `window_start(cutoff)` 的桶
    ///
    /// 返回按窗口、客户端、协议排序的行；被取出的桶从状态中移除，
    /// 不会在之后的调用中再次出现。
    pub fn drain(&self, cutoff_timestamp: f64) -> Vec<OutputRow> {
        let cutoff_window = window_start(cutoff_timestamp, self.config.window_size);
        self.drain_where(|key| key.window_start <= cutoff_window, Some(cutoff_window))
    }

    /// 刷新全部剩余的桶，用于退出前的最后一次输出
    pub fn drain_all(&self) -> Vec<OutputRow> {
        self.drain_where(|_| true, None)
    }

    /// `closed_through` 为本次刷新关闭的最后一个窗口；None 时取被取出桶中最新的窗口
    fn drain_where(
        &self,
        eligible: impl Fn(&BucketKey) -> bool,
        closed_through: Option<DateTime<Utc>>,
    ) -> Vec<OutputRow> {
        let mut ready = Vec::new();
        {
            let mut state = self.lock();
            state.buckets.retain(|key, counters| {
                if eligible(key) {
                    ready.push((key.clone(), *counters));
                    false
                } else {
                    true
                }
            });

            let newest = closed_through
                .or_else(|| ready.iter().map(|(key, _)| key.window_start).max());
            if let Some(newest) = newest {
                state.watermark = Some(state.watermark.map_or(newest, |mark| mark.max(newest)));
            }
        }

        ready.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
        let rows: Vec<OutputRow> = ready
            .into_iter()
            .map(|(key, counters)| OutputRow::from_bucket(key, counters))
            .collect();

        self.stats.drains.fetch_add(1, Ordering::Relaxed);
        self.stats
            .rows_emitted
            .fetch_add(rows.len() as u64, Ordering::Relaxed);
        rows
    }

    pub fn open_buckets(&self) -> usize {
        self.lock().buckets.len()
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            recorded: self.stats.recorded.load(Ordering::Relaxed),
            ignored: self.stats.ignored.load(Ordering::Relaxed),
            late_dropped: self.stats.late_dropped.load(Ordering::Relaxed),
            rows_emitted: self.stats.rows_emitted.load(Ordering::Relaxed),
            drains: self.stats.drains.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: &str = "192.168.0.5";
    const CLIENT: &str = "192.168.0.10";
    const T: f64 = 1_700_000_002.25;

    fn aggregator() -> Aggregator {
        Aggregator::new(AggregatorConfig::new(SERVER, WindowSize::new(5).unwrap()))
    }

    fn inbound(ts: f64, proto: &str, len: u64) -> Observation {
        Observation::new(ts, CLIENT, SERVER, proto, len)
    }

    fn outbound(ts: f64, proto: &str, len: u64) -> Observation {
        Observation::new(ts, SERVER, CLIENT, proto, len)
    }

    #[test]
    fn combines_both_directions_into_one_row() {
        let agg = aggregator();
        agg.record(&inbound(T, "HTTP", 100));
        agg.record(&outbound(T, "HTTP", 50));

        let rows = agg.drain(T + 10.0);
        assert_eq!(
            rows,
            vec![OutputRow {
                window_start: window_start(T, agg.window_size()),
                client_address: CLIENT.to_string(),
                protocol: "HTTP".to_string(),
                bytes_in: 100,
                bytes_out: 50,
            }]
        );
        assert_eq!(agg.open_buckets(), 0);
    }

    #[test]
    fn direction_only_touches_one_counter() {
        let agg = aggregator();
        agg.record(&inbound(T, "HTTPS", 70));
        agg.record(&outbound(T, "FTP", 30));

        let rows = agg.drain_all();
        assert_eq!(rows.len(), 2);
        let ftp = rows.iter().find(|r| r.protocol == "FTP").unwrap();
        let https = rows.iter().find(|r| r.protocol == "HTTPS").unwrap();
        assert_eq!((ftp.bytes_in, ftp.bytes_out), (0, 30));
        assert_eq!((https.bytes_in, https.bytes_out), (70, 0));
    }

    #[test]
    fn unrelated_traffic_creates_no_bucket() {
        let agg = aggregator();
        agg.record(&Observation::new(T, "10.0.0.1", "10.0.0.2", "HTTP", 999));

        assert_eq!(agg.open_buckets(), 0);
        assert!(agg.drain_all().is_empty());
        assert_eq!(agg.stats().ignored, 1);
        assert_eq!(agg.stats().recorded, 0);
    }

    #[test]
    fn explicit_server_overrides_configured_one() {
        let agg = aggregator();
        let peer = Observation::new(T, "10.0.0.1", "10.0.0.2", "UDP_OTHER", 12);
        agg.record_for(&peer, "10.0.0.2");

        let rows = agg.drain_all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].client_address, "10.0.0.1");
        assert_eq!(rows[0].bytes_in, 12);
    }

    #[test]
    fn same_key_accumulates_without_double_counting() {
        let agg = aggregator();
        agg.record(&inbound(T, "HTTP", 123));
        agg.record(&inbound(T + 0.5, "HTTP", 877));

        let rows = agg.drain_all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bytes_in, 1000);
        assert_eq!(rows[0].bytes_out, 0);
    }

    #[test]
    fn second_drain_is_empty() {
        let agg = aggregator();
        agg.record(&inbound(T, "HTTP", 1));

        assert_eq!(agg.drain(T + 10.0).len(), 1);
        assert!(agg.drain(T + 10.0).is_empty());
    }

    #[test]
    fn early_cutoff_returns_nothing() {
        let agg = aggregator();
        agg.record(&inbound(T, "HTTP", 1));

        assert!(agg.drain(T - 60.0).is_empty());
        assert_eq!(agg.open_buckets(), 1);
    }

    #[test]
    fn open_windows_keep_accumulating_across_drains() {
        let agg = aggregator();
        agg.record(&inbound(T, "HTTP", 10));
        agg.record(&inbound(T + 20.0, "HTTP", 5));

        let first = agg.drain(T + 5.0);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].bytes_in, 10);

        agg.record(&inbound(T + 21.0, "HTTP", 5));
        let rest = agg.drain_all();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].bytes_in, 10);
    }

    #[test]
    fn rows_are_sorted_by_window_client_protocol() {
        let agg = aggregator();
        agg.record(&Observation::new(T + 5.0, "192.168.0.11", SERVER, "HTTP", 1));
        agg.record(&Observation::new(T, "192.168.0.12", SERVER, "HTTP", 1));
        agg.record(&Observation::new(T, "192.168.0.11", SERVER, "UDP_OTHER", 1));
        agg.record(&Observation::new(T, "192.168.0.11", SERVER, "FTP", 1));

        let order: Vec<(i64, String, String)> = agg
            .drain_all()
            .into_iter()
            .map(|r| (r.window_start.timestamp(), r.client_address, r.protocol))
            .collect();
        let w = window_start(T, agg.window_size()).timestamp();
        assert_eq!(
            order,
            vec![
                (w, String::from("192.168.0.11"), String::from("FTP")),
                (w, String::from("192.168.0.11"), String::from("UDP_OTHER")),
                (w, String::from("192.168.0.12"), String::from("HTTP")),
                (w + 5, String::from("192.168.0.11"), String::from("HTTP")),
            ]
        );
    }

    #[test]
    fn late_data_reopens_a_fresh_bucket() {
        let agg = aggregator();
        agg.record(&inbound(T, "HTTP", 100));
        assert_eq!(agg.drain(T + 10.0)[0].bytes_in, 100);

        agg.record(&inbound(T, "HTTP", 7));
        assert_eq!(agg.open_buckets(), 1);

        let late = agg.drain(T + 10.0);
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].window_start, window_start(T, agg.window_size()));
        assert_eq!(late[0].bytes_in, 7);
    }

    #[test]
    fn drop_policy_discards_late_data() {
        let agg = Aggregator::new(
            AggregatorConfig::new(SERVER, WindowSize::new(5).unwrap())
                .with_late_data(LateDataPolicy::Drop),
        );
        agg.record(&inbound(T, "HTTP", 100));
        assert_eq!(agg.drain(T + 10.0).len(), 1);

        agg.record(&inbound(T, "HTTP", 7));
        agg.record(&inbound(T + 30.0, "HTTP", 3));

        assert_eq!(agg.stats().late_dropped, 1);
        let rows = agg.drain_all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bytes_in, 3);
    }

    #[test]
    fn drop_policy_closes_empty_windows_passed_by_drain() {
        let agg = Aggregator::new(
            AggregatorConfig::new(SERVER, WindowSize::new(5).unwrap())
                .with_late_data(LateDataPolicy::Drop),
        );
        agg.record(&inbound(100.0, "HTTP", 1));
        assert_eq!(agg.drain(120.0).len(), 1);

        // 窗口 110 在刷新时没有数据，但已被关闭
        agg.record(&inbound(110.0, "HTTP", 9));
        assert_eq!(agg.stats().late_dropped, 1);
        assert_eq!(agg.open_buckets(), 0);

        agg.record(&inbound(125.0, "HTTP", 4));
        assert_eq!(agg.open_buckets(), 1);
    }

    #[test]
    fn drop_policy_watermark_survives_empty_drain() {
        let agg = Aggregator::new(
            AggregatorConfig::new(SERVER, WindowSize::new(5).unwrap())
                .with_late_data(LateDataPolicy::Drop),
        );
        assert!(agg.drain(50.0).is_empty());

        agg.record(&inbound(42.0, "FTP", 3));
        assert_eq!(agg.stats().late_dropped, 1);
        assert!(agg.drain_all().is_empty());
    }

    #[test]
    fn stats_track_emitted_rows() {
        let agg = aggregator();
        agg.record(&inbound(T, "HTTP", 1));
        agg.record(&outbound(T, "HTTPS", 1));
        agg.drain(T + 10.0);
        agg.drain(T + 10.0);

        let stats = agg.stats();
        assert_eq!(stats.recorded, 2);
        assert_eq!(stats.rows_emitted, 2);
        assert_eq!(stats.drains, 2);
    }
}
