use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::aggregator::{AggregatorConfig, LateDataPolicy};
use crate::error::ConfigError;
use crate::window::WindowSize;

// ==================== 命令行参数定义 ====================
#[derive(Parser, Debug)]
#[command(author, version, about = "按时间窗口统计服务器与各客户端之间的进出流量", long_about = None)]
pub struct Cli {
    /// 被监控的服务器 IP（必填）
    #[arg(long = "server-ip", env = "TRAFFIC_SERVER_IP", help = "示例：192.168.0.5")]
    pub server_ip: String,

    /// CSV 输出文件（追加写入）
    #[arg(short, long, env = "TRAFFIC_OUTPUT", default_value = "output.csv")]
    pub output: PathBuf,

    /// 数据来源
    #[arg(short, long, value_enum, env = "TRAFFIC_MODE", default_value_t = Mode::Simulate)]
    pub mode: Mode,

    /// 运行时长（单位：秒，设置为 0 表示永久运行）
    #[arg(short, long, env = "TRAFFIC_DURATION", default_value_t = 60)]
    pub duration: u64,

    /// 聚合窗口大小（秒）
    #[arg(short, long, env = "TRAFFIC_WINDOW", default_value_t = 5, allow_negative_numbers = true)]
    pub window: i64,

    /// 窗口关闭后额外等待的秒数，用于容纳轻微乱序的数据
    #[arg(long, env = "TRAFFIC_GRACE", default_value_t = 0)]
    pub grace: u64,

    /// 刷新间隔（秒）
    #[arg(long = "flush-interval", env = "TRAFFIC_FLUSH_INTERVAL", default_value_t = 1)]
    pub flush_interval: u64,

    /// 模拟模式下的生产者线程数
    #[arg(long, env = "TRAFFIC_PRODUCERS", default_value_t = 1)]
    pub producers: usize,

    /// 已刷新窗口的迟到数据处理方式
    #[arg(long = "late-data", value_enum, env = "TRAFFIC_LATE_DATA", default_value_t = LateData::Reopen)]
    pub late_data: LateData,

    /// live 模式抓包网卡
    #[arg(short, long, env = "TRAFFIC_IFACE", help = "示例：eth0、ens33")]
    pub iface: Option<String>,

    /// 额外写入的 SQLite 数据库文件
    #[arg(short = 'f', long = "db-path", env = "TRAFFIC_DB_PATH", help = "示例：./data/traffic.db")]
    pub db_path: Option<String>,

    /// Prometheus metrics 监听地址
    #[arg(long = "metrics-addr", env = "TRAFFIC_METRICS_ADDR", help = "示例：127.0.0.1:9090")]
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// 合成流量，无需 root
    Simulate,
    /// 实时抓包（需要 live 特性与抓包权限）
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LateData {
    Reopen,
    Drop,
}

impl From<LateData> for LateDataPolicy {
    fn from(value: LateData) -> Self {
        match value {
            LateData::Reopen => LateDataPolicy::Reopen,
            LateData::Drop => LateDataPolicy::Drop,
        }
    }
}

/// 校验后的运行配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub aggregator: AggregatorConfig,
    pub output: PathBuf,
    pub mode: Mode,
    /// None 表示永久运行
    pub duration: Option<Duration>,
    pub grace: Duration,
    pub flush_interval: Duration,
    pub producers: usize,
    pub iface: Option<String>,
    pub db_path: Option<String>,
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    pub fn into_config(self) -> Result<AppConfig, ConfigError> {
        let server = self.server_ip.trim().to_string();
        if server.is_empty() {
            return Err(ConfigError::MissingServerAddress);
        }
        let window_size = WindowSize::new(self.window)?;
        if self.producers == 0 {
            return Err(ConfigError::InvalidProducerCount);
        }
        if self.flush_interval == 0 {
            return Err(ConfigError::InvalidFlushInterval);
        }
        if self.mode == Mode::Live && self.iface.is_none() {
            return Err(ConfigError::MissingInterface);
        }

        Ok(AppConfig {
            aggregator: AggregatorConfig::new(server, window_size)
                .with_late_data(self.late_data.into()),
            output: self.output,
            mode: self.mode,
            duration: (self.duration > 0).then(|| Duration::from_secs(self.duration)),
            grace: Duration::from_secs(self.grace),
            flush_interval: Duration::from_secs(self.flush_interval),
            producers: self.producers,
            iface: self.iface,
            db_path: self.db_path,
            metrics_addr: self.metrics_addr,
        })
    }
}
