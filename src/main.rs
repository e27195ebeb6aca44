use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ip_traffic_window::config::{AppConfig, Cli, Mode};
use ip_traffic_window::driver::FlushDriver;
use ip_traffic_window::error::{AppError, SourceError};
use ip_traffic_window::metrics;
use ip_traffic_window::monitor::PacketSource;
use ip_traffic_window::simulate_monitor::SimulatedSource;
use ip_traffic_window::sink::{CsvSink, RowSink};
use ip_traffic_window::sqlite_sink::SqliteSink;
use ip_traffic_window::Aggregator;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ==================== 创建数据源 ====================
fn build_source(config: &AppConfig) -> Result<Box<dyn PacketSource>, SourceError> {
    let server = config.aggregator.server_address.clone();
    match config.mode {
        Mode::Simulate => Ok(Box::new(SimulatedSource::new(
            server,
            config.producers,
            config.duration,
        ))),
        #[cfg(feature = "live")]
        Mode::Live => {
            let iface = config.iface.clone().unwrap_or_default();
            Ok(Box::new(ip_traffic_window::live_monitor::LiveSource::new(
                iface, server,
            )))
        }
        #[cfg(not(feature = "live"))]
        Mode::Live => Err(SourceError::Unsupported(
            "live 模式需要使用 `--features live` 重新编译".to_string(),
        )),
    }
}

// ==================== 创建输出端 ====================
fn build_sinks(config: &AppConfig) -> Result<Vec<Box<dyn RowSink>>, AppError> {
    let mut sinks: Vec<Box<dyn RowSink>> = vec![Box::new(CsvSink::new(&config.output))];
    if let Some(db_path) = &config.db_path {
        sinks.push(Box::new(SqliteSink::open(db_path)?));
    }
    Ok(sinks)
}

// ==================== 主函数 ====================
#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_tracing();
    let config = Cli::parse().into_config()?;

    info!(
        server = %config.aggregator.server_address,
        mode = ?config.mode,
        window = %config.aggregator.window_size,
        output = %config.output.display(),
        "流量窗口统计启动"
    );
    match config.duration {
        Some(d) => info!("运行时长: {} 秒", d.as_secs()),
        None => info!("永久运行，按 Ctrl+C 停止"),
    }

    let aggregator = Arc::new(Aggregator::new(config.aggregator.clone()));
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })?;
    }

    let metrics_handle = match config.metrics_addr {
        Some(addr) => {
            let server = metrics::serve(addr, Arc::clone(&aggregator)).map_err(AppError::Metrics)?;
            let handle = server.handle();
            tokio::spawn(server);
            info!(%addr, "Prometheus exporter 已启动");
            Some(handle)
        }
        None => None,
    };

    let sinks = build_sinks(&config)?;
    let mut source = build_source(&config)?;
    source.init()?;
    source.start(Arc::clone(&aggregator))?;

    let driver = FlushDriver::new(Arc::clone(&aggregator), sinks, config.grace);
    let rows = driver
        .run(
            source.as_mut(),
            Arc::clone(&running),
            config.flush_interval,
            config.duration,
        )
        .await?;

    let stats = aggregator.stats();
    info!(
        rows,
        recorded = stats.recorded,
        ignored = stats.ignored,
        late_dropped = stats.late_dropped,
        "监控完成，数据已保存到 {}",
        config.output.display()
    );
    if stats.late_dropped > 0 {
        warn!(late_dropped = stats.late_dropped, "部分迟到数据被丢弃");
    }

    if let Some(handle) = metrics_handle {
        handle.stop(true).await;
    }
    Ok(())
}
