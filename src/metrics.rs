use actix_web::{dev::Server, middleware, web, App, HttpResponse, HttpServer, Responder};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::aggregator::Aggregator;

/// 把聚合器统计渲染为 Prometheus 文本格式
pub fn render(aggregator: &Aggregator) -> String {
    let stats = aggregator.stats();
    let counters = [
        ("traffic_observations_recorded_total", "已计入聚合的观测数", stats.recorded),
        ("traffic_observations_ignored_total", "与服务器无关而被忽略的观测数", stats.ignored),
        (
            "traffic_observations_late_dropped_total",
            "落在已刷新窗口而被丢弃的观测数",
            stats.late_dropped,
        ),
        ("traffic_rows_emitted_total", "已输出的汇总行数", stats.rows_emitted),
        ("traffic_drains_total", "刷新次数", stats.drains),
    ];
    let gauges = [
        ("traffic_open_buckets", "当前未关闭的桶数量", aggregator.open_buckets() as u64),
        (
            "traffic_window_seconds",
            "聚合窗口大小",
            aggregator.window_size().seconds(),
        ),
    ];

    counters
        .iter()
        .map(|&(name, help, value)| metric(name, help, "counter", value))
        .chain(
            gauges
                .iter()
                .map(|&(name, help, value)| metric(name, help, "gauge", value)),
        )
        .collect()
}

fn metric(name: &str, help: &str, kind: &str, value: u64) -> String {
    format!("# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n")
}

async fn metrics(aggregator: web::Data<Aggregator>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(render(&aggregator))
}

/// 启动 Prometheus exporter，返回的 Server 需由调用方驱动
pub fn serve(addr: SocketAddr, aggregator: Arc<Aggregator>) -> std::io::Result<Server> {
    let data = web::Data::from(aggregator);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(middleware::Compress::default())
            .route("/metrics", web::get().to(metrics))
    })
    .workers(1)
    .bind(addr)?
    .run();
    Ok(server)
}
