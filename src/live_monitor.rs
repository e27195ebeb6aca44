use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use pcap::{Active, Capture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::error::SourceError;
use crate::model::Observation;
use crate::monitor::PacketSource;
use crate::protocol::{infer_protocol, Transport};

/// 基于 libpcap 的实时抓包数据源
pub struct LiveSource {
    interface: String,
    server_address: String,
    capture: Option<Capture<Active>>,
    running: Arc<AtomicBool>,
    capture_thread: Option<thread::JoinHandle<()>>,
}

impl LiveSource {
    pub fn new(interface: String, server_address: String) -> Self {
        Self {
            interface,
            server_address,
            capture: None,
            running: Arc::new(AtomicBool::new(false)),
            capture_thread: None,
        }
    }

    fn open_capture(&self) -> Result<Capture<Active>, pcap::Error> {
        let mut cap = Capture::from_device(self.interface.as_str())?
            .promisc(false)
            .snaplen(128) // 只需要报文头
            .timeout(500)
            .immediate_mode(true)
            .open()?;
        cap.filter(&format!("host {}", self.server_address), true)?;
        Ok(cap)
    }

    /// 把一帧以太网数据解析为观测；非 IP 报文返回 None
    fn parse_frame(timestamp: f64, wire_len: u32, data: &[u8]) -> Option<Observation> {
        let sliced = SlicedPacket::from_ethernet(data).ok()?;

        #[allow(unreachable_patterns)]
        let (src, dst) = match sliced.net? {
            NetSlice::Ipv4(ip) => (
                ip.header().source_addr().to_string(),
                ip.header().destination_addr().to_string(),
            ),
            NetSlice::Ipv6(ip) => (
                ip.header().source_addr().to_string(),
                ip.header().destination_addr().to_string(),
            ),
            _ => return None,
        };

        let protocol = match sliced.transport {
            Some(TransportSlice::Tcp(tcp)) => {
                infer_protocol(Transport::Tcp, tcp.source_port(), tcp.destination_port())
            }
            Some(TransportSlice::Udp(udp)) => {
                infer_protocol(Transport::Udp, udp.source_port(), udp.destination_port())
            }
            _ => infer_protocol(Transport::Other, 0, 0),
        };

        Some(Observation::new(timestamp, src, dst, protocol, u64::from(wire_len)))
    }
}

impl PacketSource for LiveSource {
    fn init(&mut self) -> Result<(), SourceError> {
        let cap = self
            .open_capture()
            .map_err(|e| SourceError::Capture(format!("打开网卡 {} 失败: {}", self.interface, e)))?;
        self.capture = Some(cap);
        info!(iface = %self.interface, server = %self.server_address, "实时抓包初始化成功");
        Ok(())
    }

    fn start(&mut self, aggregator: Arc<Aggregator>) -> Result<(), SourceError> {
        if self.capture_thread.is_some() {
            return Err(SourceError::AlreadyRunning(self.name()));
        }
        let mut cap = self.capture.take().ok_or(SourceError::NotStarted(self.name()))?;
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("pcap-capture".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match cap.next_packet() {
                        Ok(packet) => {
                            let ts = packet.header.ts.tv_sec as f64
                                + packet.header.ts.tv_usec as f64 / 1_000_000.0;
                            if let Some(obs) = Self::parse_frame(ts, packet.header.len, packet.data) {
                                aggregator.record(&obs);
                            }
                        }
                        Err(pcap::Error::TimeoutExpired) => continue,
                        Err(e) => {
                            error!("抓包失败: {}", e);
                            break;
                        }
                    }
                }
                running.store(false, Ordering::SeqCst);
            })?;

        self.capture_thread = Some(handle);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.capture_thread.is_some() && !self.running.load(Ordering::SeqCst)
    }

    fn stop(&mut self) -> Result<(), SourceError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            if handle.join().is_err() {
                warn!("抓包线程 panic");
                return Err(SourceError::ThreadPanicked);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "live"
    }
}
