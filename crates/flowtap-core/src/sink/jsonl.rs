use std::io::{BufWriter, Write};

use serde::Serialize;

use crate::{FlowSessionRecord, PacketRecord};

use super::{Sink, SinkError};

type Output = BufWriter<Box<dyn Write + Send>>;

/// Writes one JSON object per line.
///
/// Packets and flows go to independent outputs; either may be absent, in
/// which case those records are discarded.
///
/// # Examples
/// ```
/// use flowtap_core::{JsonLinesSink, Sink};
///
/// let mut sink = JsonLinesSink::new(None, Some(Box::new(std::io::sink())));
/// sink.flush().unwrap();
/// ```
pub struct JsonLinesSink {
    packets: Option<Output>,
    flows: Option<Output>,
}

impl JsonLinesSink {
    pub fn new(
        packets: Option<Box<dyn Write + Send>>,
        flows: Option<Box<dyn Write + Send>>,
    ) -> Self {
        Self {
            packets: packets.map(BufWriter::new),
            flows: flows.map(BufWriter::new),
        }
    }
}

fn write_line<T: Serialize>(out: &mut Output, record: &T) -> Result<(), SinkError> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")?;
    Ok(())
}

impl Sink for JsonLinesSink {
    fn persist_packet(&mut self, record: &PacketRecord) -> Result<(), SinkError> {
        match self.packets.as_mut() {
            Some(out) => write_line(out, record),
            None => Ok(()),
        }
    }

    fn persist_flow(&mut self, record: &FlowSessionRecord) -> Result<(), SinkError> {
        match self.flows.as_mut() {
            Some(out) => write_line(out, record),
            None => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(out) = self.packets.as_mut() {
            out.flush()?;
        }
        if let Some(out) = self.flows.as_mut() {
            out.flush()?;
        }
        Ok(())
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
