/// 传输层类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Other,
}

pub const HTTP: &str = "HTTP";
pub const HTTPS: &str = "HTTPS";
pub const FTP: &str = "FTP";
pub const TCP_OTHER: &str = "TCP_OTHER";
pub const UDP_OTHER: &str = "UDP_OTHER";
pub const OTHER: &str = "OTHER";

/// 模拟模式下可能出现的协议标签
pub const SIMULATED_PROTOCOLS: [&str; 5] = [HTTP, HTTPS, FTP, TCP_OTHER, UDP_OTHER];

/// 按端口粗略推断应用层协议（任一端口命中即可）
pub fn infer_protocol(transport: Transport, src_port: u16, dst_port: u16) -> &'static str {
    let either = |ports: &[u16]| ports.contains(&src_port) || ports.contains(&dst_port);

    match transport {
        Transport::Other => OTHER,
        _ if either(&[80, 8080]) => HTTP,
        _ if either(&[443]) => HTTPS,
        _ if either(&[21]) => FTP,
        Transport::Tcp => TCP_OTHER,
        Transport::Udp => UDP_OTHER,
    }
}
