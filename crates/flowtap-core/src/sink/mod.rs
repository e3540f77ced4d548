//! Persistence boundary.
//!
//! The consumer thread owns the sink exclusively, so implementations need
//! `Send` but not `Sync`. Failures are counted and logged by the caller and
//! never stop the pipeline.

mod jsonl;
mod memory;

pub use jsonl::JsonLinesSink;
pub use memory::{MemorySink, NullSink};

use thiserror::Error;

use crate::{FlowSessionRecord, PacketRecord};

/// Receiver of decoded packets and finished flows.
pub trait Sink: Send {
    fn persist_packet(&mut self, record: &PacketRecord) -> Result<(), SinkError>;

    fn persist_flow(&mut self, record: &FlowSessionRecord) -> Result<(), SinkError>;

    /// Push buffered output to its destination.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("record rejected: {0}")]
    Rejected(String),
}
