use std::sync::Arc;

use crate::aggregator::Aggregator;
use crate::error::SourceError;

/// 数据包来源接口
///
/// 实现者在后台线程中产生观测并调用 [`Aggregator::record`]。
pub trait PacketSource: Send {
    /// 初始化（检查环境、打开设备等）
    fn init(&mut self) -> Result<(), SourceError>;

    /// 启动后台采集，立即返回
    fn start(&mut self, aggregator: Arc<Aggregator>) -> Result<(), SourceError>;

    /// 采集是否已自行结束（例如模拟时长到期）
    fn is_finished(&self) -> bool;

    /// 停止采集并等待后台线程退出；返回后不会再有新的 record 调用
    fn stop(&mut self) -> Result<(), SourceError>;

    /// 获取数据源名称
    fn name(&self) -> &'static str;
}
