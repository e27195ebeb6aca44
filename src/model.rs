use chrono::{DateTime, Local, NaiveDateTime, Utc};

/// 本地时间渲染格式（ISO-8601，空格分隔日期与时间）
pub const WINDOW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 数据源产生的一条流量观测，处理后即丢弃
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// 秒级 Unix 时间戳（可带小数）
    pub timestamp: f64,
    pub source_address: String,
    pub destination_address: String,
    pub protocol: String,
    pub byte_length: u64,
}

impl Observation {
    pub fn new(
        timestamp: f64,
        source_address: impl Into<String>,
        destination_address: impl Into<String>,
        protocol: impl Into<String>,
        byte_length: u64,
    ) -> Self {
        Self {
            timestamp,
            source_address: source_address.into(),
            destination_address: destination_address.into(),
            protocol: protocol.into(),
            byte_length,
        }
    }
}

/// 流量方向（相对被监控的服务器）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 客户端 -> 服务器
    Inbound,
    /// 服务器 -> 客户端
    Outbound,
}

/// 一行输出的唯一标识；字段顺序决定排序：窗口、客户端、协议
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub window_start: DateTime<Utc>,
    pub client_address: String,
    pub protocol: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketCounters {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl BucketCounters {
    pub fn add(&mut self, direction: Direction, bytes: u64) {
        match direction {
            Direction::Inbound => self.bytes_in = self.bytes_in.saturating_add(bytes),
            Direction::Outbound => self.bytes_out = self.bytes_out.saturating_add(bytes),
        }
    }
}

/// 已关闭窗口的汇总行，交给输出端后不再修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub window_start: DateTime<Utc>,
    pub client_address: String,
    pub protocol: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl OutputRow {
    pub(crate) fn from_bucket(key: BucketKey, counters: BucketCounters) -> Self {
        Self {
            window_start: key.window_start,
            client_address: key.client_address,
            protocol: key.protocol,
            bytes_in: counters.bytes_in,
            bytes_out: counters.bytes_out,
        }
    }

    pub fn window_start_local(&self) -> NaiveDateTime {
        self.window_start.with_timezone(&Local).naive_local()
    }

    /// 例如 `2025-01-01 12:00:05`
    pub fn window_start_iso(&self) -> String {
        self.window_start_local()
            .format(WINDOW_TIME_FORMAT)
            .to_string()
    }
}
