//! Capture-file replay source.
//!
//! Replays PCAP or PCAPNG files through the live pipeline. The file is
//! exposed as a single pseudo-interface so the engine can treat it exactly
//! like a network device; end of file marks the source as exhausted.

pub mod layout;
pub mod parser;
pub mod writer;

use std::path::PathBuf;

use tracing::warn;

use crate::catalog::InterfaceInfo;
use crate::source::{CaptureBackend, CaptureError, PacketSource};

pub use parser::PcapFileSource;
pub use writer::PcapngWriter;

/// Backend serving one capture file as an interface named after the file.
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    path: PathBuf,
}

impl ReplayBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn interface_name(&self) -> String {
        self.path.display().to_string()
    }
}

impl CaptureBackend for ReplayBackend {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError> {
        Ok(vec![InterfaceInfo {
            name: self.interface_name(),
            description: Some("capture file replay".to_string()),
            is_up: true,
            is_loopback: false,
            addresses: Vec::new(),
        }])
    }

    fn open(
        &self,
        interface: &str,
        filter: Option<&str>,
    ) -> Result<Box<dyn PacketSource>, CaptureError> {
        if interface != self.interface_name() {
            return Err(CaptureError::Interface {
                name: interface.to_string(),
                message: format!("replay backend only serves {}", self.path.display()),
            });
        }
        if let Some(filter) = filter {
            warn!(filter, "capture filters are not applied when replaying files");
        }
        let source = PcapFileSource::open(&self.path).map_err(|err| CaptureError::Interface {
            name: interface.to_string(),
            message: err.to_string(),
        })?;
        Ok(Box::new(source))
    }
}
