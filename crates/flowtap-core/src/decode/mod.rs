//! Frame decoding.
//!
//! Follows the same layering as the rest of the crate:
//! - `layout`: link-layer constants
//! - `reader`: link-type dispatch and header conventions (flags, addresses)
//! - `parser`: builds the canonical `PacketRecord`
//! - `error`: per-frame failures
//!
//! Decoding is pure: the only time-dependent field is copied from the frame.

pub mod error;
pub mod layout;
pub mod parser;
pub mod reader;

use std::sync::Arc;

use pcap_parser::Linktype;
use time::OffsetDateTime;

pub use error::DecodeError;
pub use parser::decode_frame;

/// Frame captured off an interface, stamped on arrival.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub captured_at: OffsetDateTime,
    pub interface: Arc<str>,
    pub linktype: Linktype,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
