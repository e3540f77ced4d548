//! Live capture through libpcap.

use pcap::{Active, Capture, Device};
use pcap_parser::Linktype;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::InterfaceInfo;
use crate::source::{CaptureBackend, CaptureError, PacketEvent, PacketSource, SourceError, SourceRead};

const DEFAULT_SNAPLEN: i32 = 65_535;
const DEFAULT_READ_TIMEOUT_MS: i32 = 100;

/// Options applied when opening a live capture handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveOptions {
    /// Maximum bytes captured per frame.
    pub snaplen: i32,
    pub promiscuous: bool,
    /// Deliver frames as soon as they arrive instead of batching.
    pub immediate_mode: bool,
    /// Kernel buffer size in bytes; `None` keeps the libpcap default.
    pub buffer_size: Option<i32>,
    /// Upper bound on a single blocking read, and thus on stop latency.
    pub read_timeout_ms: i32,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            snaplen: DEFAULT_SNAPLEN,
            promiscuous: true,
            immediate_mode: true,
            buffer_size: None,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

/// Backend capturing from network devices.
#[derive(Debug, Clone, Default)]
pub struct LiveBackend {
    options: LiveOptions,
}

impl LiveBackend {
    pub fn new(options: LiveOptions) -> Self {
        Self { options }
    }
}

impl CaptureBackend for LiveBackend {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError> {
        let devices = Device::list().map_err(|err| CaptureError::Interface {
            name: "*".to_string(),
            message: err.to_string(),
        })?;
        if devices.is_empty() {
            return Err(CaptureError::NoInterfaces);
        }
        Ok(devices.iter().map(InterfaceInfo::from).collect())
    }

    fn open(
        &self,
        interface: &str,
        filter: Option<&str>,
    ) -> Result<Box<dyn PacketSource>, CaptureError> {
        debug!(interface, ?filter, "opening live capture");
        let mut inactive = Capture::from_device(interface)
            .map_err(|err| CaptureError::open_failure(interface, err.to_string()))?
            .promisc(self.options.promiscuous)
            .snaplen(self.options.snaplen)
            .timeout(self.options.read_timeout_ms)
            .immediate_mode(self.options.immediate_mode);
        if let Some(size) = self.options.buffer_size {
            inactive = inactive.buffer_size(size);
        }

        let mut capture = inactive
            .open()
            .map_err(|err| CaptureError::open_failure(interface, err.to_string()))?;

        if let Some(expr) = filter {
            capture
                .filter(expr, true)
                .map_err(|err| CaptureError::Filter {
                    filter: expr.to_string(),
                    message: err.to_string(),
                })?;
        }

        let linktype = Linktype(capture.get_datalink().0);
        info!(interface, linktype = linktype.0, "live capture opened");
        Ok(Box::new(LiveSource { capture, linktype }))
    }
}

impl From<&Device> for InterfaceInfo {
    fn from(device: &Device) -> Self {
        InterfaceInfo {
            name: device.name.clone(),
            description: device.desc.clone(),
            is_up: device.flags.is_up(),
            is_loopback: device.flags.is_loopback(),
            addresses: device.addresses.iter().map(|address| address.addr).collect(),
        }
    }
}

struct LiveSource {
    capture: Capture<Active>,
    linktype: Linktype,
}

impl PacketSource for LiveSource {
    fn next_packet(&mut self) -> Result<SourceRead, SourceError> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(SourceRead::Packet(PacketEvent {
                linktype: self.linktype,
                data: packet.data.to_vec(),
            })),
            Err(pcap::Error::TimeoutExpired) => Ok(SourceRead::Idle),
            Err(pcap::Error::NoMorePackets) => Ok(SourceRead::End),
            Err(err) => Err(SourceError::Capture(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_READ_TIMEOUT_MS, LiveOptions};

    #[test]
    fn default_options_bound_the_read_timeout() {
        let options = LiveOptions::default();
        assert_eq!(options.read_timeout_ms, DEFAULT_READ_TIMEOUT_MS);
        assert!(options.promiscuous);
        assert!(options.buffer_size.is_none());
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: LiveOptions = serde_json::from_str(r#"{"snaplen": 128}"#).unwrap();
        assert_eq!(options.snaplen, 128);
        assert!(options.immediate_mode);
    }
}
