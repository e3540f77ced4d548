use std::sync::Arc;

use parking_lot::Mutex;

use crate::{FlowSessionRecord, PacketRecord};

use super::{Sink, SinkError};

/// In-memory collector. Clones share the same storage, so a caller can keep
/// one handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Collected>>,
}

#[derive(Debug, Default)]
struct Collected {
    packets: Vec<PacketRecord>,
    flows: Vec<FlowSessionRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets(&self) -> Vec<PacketRecord> {
        self.inner.lock().packets.clone()
    }

    pub fn flows(&self) -> Vec<FlowSessionRecord> {
        self.inner.lock().flows.clone()
    }
}

impl Sink for MemorySink {
    fn persist_packet(&mut self, record: &PacketRecord) -> Result<(), SinkError> {
        self.inner.lock().packets.push(record.clone());
        Ok(())
    }

    fn persist_flow(&mut self, record: &FlowSessionRecord) -> Result<(), SinkError> {
        self.inner.lock().flows.push(record.clone());
        Ok(())
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn persist_packet(&mut self, _record: &PacketRecord) -> Result<(), SinkError> {
        Ok(())
    }

    fn persist_flow(&mut self, _record: &FlowSessionRecord) -> Result<(), SinkError> {
        Ok(())
    }
}
