#[cfg(feature = "live")]
mod live;
mod replay;

#[cfg(feature = "live")]
pub use live::{LiveBackend, LiveOptions};
pub use replay::{PcapFileSource, PcapngWriter, ReplayBackend};

use pcap_parser::Linktype;
use thiserror::Error;

use crate::catalog::InterfaceInfo;

/// Raw frame as delivered by a packet source.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub linktype: Linktype,
    pub data: Vec<u8>,
}

/// Outcome of one read attempt against a packet source.
#[derive(Debug)]
pub enum SourceRead {
    Packet(PacketEvent),
    /// The read timed out without a frame; callers re-check their stop flag.
    Idle,
    /// The source will never deliver another frame.
    End,
}

/// Blocking frame reader. Implementations must return within a bounded
/// interval (yielding `Idle` on timeout) so that stopping stays responsive.
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> Result<SourceRead, SourceError>;
}

/// Enumerates interfaces and opens packet sources on them.
pub trait CaptureBackend: Send + Sync {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError>;

    fn open(
        &self,
        interface: &str,
        filter: Option<&str>,
    ) -> Result<Box<dyn PacketSource>, CaptureError>;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PCAP parse error: {0}")]
    Pcap(String),
    #[error("capture read error: {0}")]
    Capture(String),
}

/// Failures raised while enumerating interfaces or opening a source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no capture interfaces available")]
    NoInterfaces,
    #[error("cannot open interface '{name}': {message}")]
    Interface { name: String, message: String },
    #[error("insufficient privileges to capture on '{name}': {message}")]
    Permission { name: String, message: String },
    #[error("invalid capture filter '{filter}': {message}")]
    Filter { filter: String, message: String },
}

impl CaptureError {
    /// Classify a backend open failure, separating privilege problems.
    pub(crate) fn open_failure(name: &str, message: String) -> Self {
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("permission") || lowered.contains("not permitted") {
            CaptureError::Permission {
                name: name.to_string(),
                message,
            }
        } else {
            CaptureError::Interface {
                name: name.to_string(),
                message,
            }
        }
    }
}
