use thiserror::Error;

/// 配置错误：启动阶段即被拒绝，不会进入聚合流程
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("窗口大小必须为正整数秒，当前值: {0}")]
    InvalidWindowSize(i64),

    #[error("服务器地址不能为空")]
    MissingServerAddress,

    #[error("生产者线程数必须大于 0")]
    InvalidProducerCount,

    #[error("刷新间隔必须大于 0 秒")]
    InvalidFlushInterval,

    #[error("live 模式需要通过 --iface 指定网卡")]
    MissingInterface,
}

/// 数据包来源错误
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("数据源 {0} 尚未启动")]
    NotStarted(&'static str),

    #[error("数据源 {0} 已在运行")]
    AlreadyRunning(&'static str),

    #[error("当前构建不支持该数据源: {0}")]
    Unsupported(String),

    #[error("启动线程失败: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("抓包失败: {0}")]
    Capture(String),

    #[error("生产者线程异常退出")]
    ThreadPanicked,
}

/// 输出端写入错误
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("写入文件失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("写入 CSV 失败: {0}")]
    Csv(#[from] csv::Error),

    #[error("数据库连接失败: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("数据库写入失败: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(String),
}

/// 进程级错误，由 main 返回
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("注册 Ctrl+C 处理器失败: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("启动 metrics 服务失败: {0}")]
    Metrics(std::io::Error),

    #[error("刷新任务异常退出: {0}")]
    Driver(#[from] tokio::task::JoinError),
}
