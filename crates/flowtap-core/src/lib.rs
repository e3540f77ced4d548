//! FlowTap core library for live packet capture and flow tracking.
//!
//! This crate implements the capture pipeline used by the CLI: a capture
//! backend opens a packet source, a producer thread moves raw frames into a
//! bounded queue, and a consumer thread decodes them into [`PacketRecord`]s
//! and folds them into bidirectional flows. Idle flows are evicted into
//! immutable [`FlowSessionRecord`]s and handed to a [`Sink`].
//!
//! Invariants:
//! - The queue never grows past its capacity; overflow drops the frame and
//!   counts it, so capture is never gated by consumer speed.
//! - The flow table has a single writer (the consumer thread).
//! - A flow leaves the `active` state exactly once and is emitted once.
//! - `dropped + processed + queue_depth == captured` at any quiescent point.
//!
//! # Examples
//! ```no_run
//! use std::sync::Arc;
//!
//! use flowtap_core::{Engine, EngineConfig, MemorySink, ReplayBackend};
//!
//! let sink = MemorySink::default();
//! let backend = ReplayBackend::new("capture.pcapng");
//! let engine = Engine::new(EngineConfig::default(), Arc::new(backend), Box::new(sink.clone()));
//! engine.start("auto", None)?;
//! engine.stop()?;
//! println!("flows: {}", sink.flows().len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

mod catalog;
mod clock;
mod decode;
mod engine;
mod flow;
mod queue;
mod sink;
mod source;
mod stats;

pub use catalog::{AUTO_INTERFACE, InterfaceInfo, auto_select, interface_names};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decode::{DecodeError, RawFrame, decode_frame};
pub use engine::{ConfigError, Engine, EngineConfig, EngineError, EngineState};
pub use flow::{Endpoint, FlowKey, FlowState, FlowTracker};
pub use pcap_parser::Linktype;
pub use queue::FrameQueue;
pub use sink::{JsonLinesSink, MemorySink, NullSink, Sink, SinkError};
#[cfg(feature = "live")]
pub use source::{LiveBackend, LiveOptions};
pub use source::{
    CaptureBackend, CaptureError, PacketEvent, PacketSource, PcapFileSource, PcapngWriter,
    ReplayBackend, SourceError, SourceRead,
};
pub use stats::{CaptureStatistics, StatisticsSnapshot};

/// Transport protocol classification of a decoded packet.
///
/// # Examples
/// ```
/// use flowtap_core::TransportProtocol;
///
/// assert_eq!(TransportProtocol::Tcp.to_string(), "TCP");
/// let json = serde_json::to_string(&TransportProtocol::Other).unwrap();
/// assert_eq!(json, "\"OTHER\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "TCP",
            TransportProtocol::Udp => "UDP",
            TransportProtocol::Icmp => "ICMP",
            TransportProtocol::Other => "OTHER",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Active,
    Timeout,
    Closed,
}

/// Canonical record produced once per decoded IP frame.
///
/// # Examples
/// ```
/// use flowtap_core::{PacketRecord, TransportProtocol};
/// use time::OffsetDateTime;
///
/// let record = PacketRecord {
///     timestamp: OffsetDateTime::UNIX_EPOCH,
///     packet_size: 64,
///     interface: "eth0".to_string(),
///     src_mac: None,
///     dst_mac: None,
///     src_ip: "10.0.0.1".parse().unwrap(),
///     dst_ip: "10.0.0.2".parse().unwrap(),
///     ip_protocol: 6,
///     ttl: 64,
///     protocol_name: TransportProtocol::Tcp,
///     src_port: Some(1234),
///     dst_port: Some(80),
///     flags: "SYN".to_string(),
///     payload_size: 44,
/// };
/// assert_eq!(record.protocol_name.as_str(), "TCP");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Wall-clock arrival time of the frame.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Total captured frame length in bytes.
    pub packet_size: u64,
    /// Name of the capturing interface.
    pub interface: String,
    /// Link-layer source address, when the frame carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_mac: Option<String>,
    /// Link-layer destination address, when the frame carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_mac: Option<String>,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    /// IP protocol number (IPv4 protocol or final IPv6 next header).
    pub ip_protocol: u8,
    /// IPv4 TTL or IPv6 hop limit.
    pub ttl: u8,
    pub protocol_name: TransportProtocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
    /// TCP flag names joined by `,`; empty for other transports.
    pub flags: String,
    /// Bytes carried after the network-layer header.
    pub payload_size: u64,
}

/// Immutable summary of a flow once it left the `active` state.
///
/// # Examples
/// ```
/// use flowtap_core::{FlowSessionRecord, FlowStatus, TransportProtocol};
/// use time::OffsetDateTime;
///
/// let record = FlowSessionRecord {
///     flow_id: 1,
///     key: "TCP 10.0.0.1:1234 <-> 10.0.0.2:80".to_string(),
///     src_ip: "10.0.0.1".parse().unwrap(),
///     src_port: Some(1234),
///     dst_ip: "10.0.0.2".parse().unwrap(),
///     dst_port: Some(80),
///     ip_protocol: 6,
///     protocol: TransportProtocol::Tcp,
///     start_time: OffsetDateTime::UNIX_EPOCH,
///     last_seen: OffsetDateTime::UNIX_EPOCH,
///     end_time: OffsetDateTime::UNIX_EPOCH,
///     duration_secs: 0.0,
///     active_secs: 0.0,
///     packet_count: 1,
///     bytes: 64,
///     status: FlowStatus::Timeout,
/// };
/// assert_eq!(record.packet_count, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSessionRecord {
    /// Sequence number assigned when the flow was first seen.
    pub flow_id: u64,
    /// Human-readable rendering of the normalized flow key.
    pub key: String,
    /// Endpoint that sent the first observed packet.
    pub src_ip: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    pub dst_ip: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
    pub ip_protocol: u8,
    pub protocol: TransportProtocol,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    /// Instant the flow was evicted or closed.
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    /// `end_time - start_time` in seconds.
    pub duration_secs: f64,
    /// `last_seen - start_time` in seconds.
    pub active_secs: f64,
    pub packet_count: u64,
    pub bytes: u64,
    pub status: FlowStatus,
}
