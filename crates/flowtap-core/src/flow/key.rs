use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

use crate::PacketRecord;

/// One side of a conversation. Port is `None` for portless transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: Option<u16>,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.ip, self.port) {
            (IpAddr::V4(addr), Some(port)) => write!(f, "{}:{}", addr, port),
            (IpAddr::V6(addr), Some(port)) => write!(f, "[{}]:{}", addr, port),
            (addr, None) => write!(f, "{}", addr),
        }
    }
}

/// Direction-normalized flow identifier.
///
/// The lesser endpoint (by `IpAddr` then port ordering, IPv4 before IPv6)
/// is always stored first, so both directions of a conversation share a key.
///
/// # Examples
/// ```
/// use flowtap_core::{Endpoint, FlowKey};
///
/// let a = Endpoint { ip: "10.0.0.1".parse().unwrap(), port: Some(1234) };
/// let b = Endpoint { ip: "10.0.0.2".parse().unwrap(), port: Some(80) };
/// assert_eq!(FlowKey::new(a, b, 6), FlowKey::new(b, a, 6));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FlowKey {
    pub lower: Endpoint,
    pub upper: Endpoint,
    pub ip_protocol: u8,
}

impl FlowKey {
    pub fn new(a: Endpoint, b: Endpoint, ip_protocol: u8) -> Self {
        let (lower, upper) = if a <= b { (a, b) } else { (b, a) };
        Self {
            lower,
            upper,
            ip_protocol,
        }
    }

    pub fn from_record(record: &PacketRecord) -> Self {
        Self::new(
            Endpoint {
                ip: record.src_ip,
                port: record.src_port,
            },
            Endpoint {
                ip: record.dst_ip,
                port: record.dst_port,
            },
            record.ip_protocol,
        )
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} <-> {}", self.ip_protocol, self.lower, self.upper)
    }
}
