use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Block, LegacyPcapReader, Linktype, PcapBlockOwned, PcapError, PcapNGReader};

use crate::source::{PacketEvent, PacketSource, SourceError, SourceRead};

use super::layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Pcap,
    PcapNg,
}

impl Format {
    fn sniff(magic: &[u8; 4]) -> Self {
        if *magic == layout::PCAPNG_MAGIC {
            Format::PcapNg
        } else {
            Format::Pcap
        }
    }

    fn label(self) -> &'static str {
        match self {
            Format::Pcap => "pcap",
            Format::PcapNg => "pcapng",
        }
    }
}

/// Packet source reading frames sequentially from a PCAP or PCAPNG stream.
///
/// Frames whose interface id has no description fall back to Ethernet.
pub struct PcapFileSource {
    reader: Box<dyn PcapReaderIterator + Send>,
    format: Format,
    /// Link type per interface id. A legacy file header fills slot 0.
    linktypes: Vec<Linktype>,
}

impl PcapFileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        Self::from_reader(File::open(path)?)
    }

    /// Read a capture from any byte stream; the leading magic picks the format.
    pub fn from_reader<R: Read + Send + 'static>(mut input: R) -> Result<Self, SourceError> {
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        let format = Format::sniff(&magic);
        let input = Cursor::new(magic).chain(input);

        let reader: Box<dyn PcapReaderIterator + Send> = match format {
            Format::PcapNg => Box::new(
                PcapNGReader::new(layout::PCAP_READER_BUFFER_SIZE, input)
                    .map_err(|err| parse_error(format, "header", err))?,
            ),
            Format::Pcap => Box::new(
                LegacyPcapReader::new(layout::PCAP_READER_BUFFER_SIZE, input)
                    .map_err(|err| parse_error(format, "header", err))?,
            ),
        };
        Ok(Self {
            reader,
            format,
            linktypes: Vec::new(),
        })
    }
}

impl PacketSource for PcapFileSource {
    fn next_packet(&mut self) -> Result<SourceRead, SourceError> {
        let format = self.format;
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let event = frame_from_block(&mut self.linktypes, block);
                    self.reader.consume(offset);
                    if let Some(event) = event {
                        return Ok(SourceRead::Packet(event));
                    }
                }
                Err(PcapError::Eof) => return Ok(SourceRead::End),
                Err(PcapError::Incomplete(_)) => {
                    self.reader
                        .refill()
                        .map_err(|err| parse_error(format, "refill", err))?;
                }
                Err(err) => return Err(parse_error(format, "block", err)),
            }
        }
    }
}

/// Record interface metadata and return the frame a block carries, if any.
fn frame_from_block(
    linktypes: &mut Vec<Linktype>,
    block: PcapBlockOwned<'_>,
) -> Option<PacketEvent> {
    let (if_id, data) = match block {
        PcapBlockOwned::LegacyHeader(header) => {
            *linktypes = vec![header.network];
            return None;
        }
        PcapBlockOwned::Legacy(packet) => (0, packet.data.to_vec()),
        // Interface ids restart with every section.
        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
            linktypes.clear();
            return None;
        }
        PcapBlockOwned::NG(Block::InterfaceDescription(intf)) => {
            linktypes.push(intf.linktype);
            return None;
        }
        PcapBlockOwned::NG(Block::EnhancedPacket(packet)) => {
            (packet.if_id, packet.packet_data().to_vec())
        }
        PcapBlockOwned::NG(Block::SimplePacket(packet)) => (0, packet.packet_data().to_vec()),
        _ => return None,
    };

    let linktype = usize::try_from(if_id)
        .ok()
        .and_then(|idx| linktypes.get(idx))
        .copied()
        .unwrap_or(Linktype::ETHERNET);
    Some(PacketEvent { linktype, data })
}

fn parse_error(format: Format, stage: &str, err: impl std::fmt::Display) -> SourceError {
    SourceError::Pcap(format!("{} {stage}: {err}", format.label()))
}
