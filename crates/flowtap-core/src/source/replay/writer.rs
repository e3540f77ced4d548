use std::io::{self, Write};

use pcap_parser::Linktype;

use super::layout;

/// Minimal PCAPNG writer: one section, one interface, enhanced packet blocks.
///
/// Blocks are written big-endian, which readers detect from the byte-order
/// magic of the section header.
///
/// # Examples
/// ```
/// use flowtap_core::PcapngWriter;
/// use pcap_parser::Linktype;
///
/// let mut writer = PcapngWriter::new(Vec::new(), Linktype::RAW).unwrap();
/// writer.write_packet(1_000_000, &[0x45, 0, 0, 20]).unwrap();
/// let bytes = writer.into_inner();
/// assert_eq!(&bytes[..4], &[0x0a, 0x0d, 0x0d, 0x0a]);
/// ```
pub struct PcapngWriter<W: Write> {
    out: W,
}

impl<W: Write> PcapngWriter<W> {
    /// Write the section header and a single interface description.
    pub fn new(mut out: W, linktype: Linktype) -> io::Result<Self> {
        write_block(&mut out, layout::SECTION_HEADER_BLOCK, &section_header_body())?;
        write_block(
            &mut out,
            layout::INTERFACE_DESCRIPTION_BLOCK,
            &interface_description_body(linktype),
        )?;
        Ok(Self { out })
    }

    /// Append one frame stamped `ts_us` microseconds after the epoch.
    pub fn write_packet(&mut self, ts_us: u64, data: &[u8]) -> io::Result<()> {
        write_block(
            &mut self.out,
            layout::ENHANCED_PACKET_BLOCK,
            &enhanced_packet_body(ts_us, data),
        )
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub(super) fn write_block<W: Write>(out: &mut W, block_type: u32, body: &[u8]) -> io::Result<()> {
    let total_len = (layout::BLOCK_OVERHEAD + body.len()) as u32;
    out.write_all(&block_type.to_be_bytes())?;
    out.write_all(&total_len.to_be_bytes())?;
    out.write_all(body)?;
    out.write_all(&total_len.to_be_bytes())
}

fn section_header_body() -> Vec<u8> {
    let mut body = Vec::with_capacity(16);
    body.extend_from_slice(&layout::BYTE_ORDER_MAGIC.to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    // Section length unknown.
    body.extend_from_slice(&(-1i64).to_be_bytes());
    body
}

fn interface_description_body(linktype: Linktype) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&(linktype.0 as u16).to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&layout::WRITER_SNAPLEN.to_be_bytes());
    body
}

fn enhanced_packet_body(ts_us: u64, data: &[u8]) -> Vec<u8> {
    let ts_high = (ts_us >> 32) as u32;
    let ts_low = ts_us as u32;
    let cap_len = data.len() as u32;
    let pad_len = (4 - (data.len() % 4)) % 4;

    let mut body = Vec::with_capacity(20 + data.len() + pad_len);
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&ts_high.to_be_bytes());
    body.extend_from_slice(&ts_low.to_be_bytes());
    body.extend_from_slice(&cap_len.to_be_bytes());
    body.extend_from_slice(&cap_len.to_be_bytes());
    body.extend_from_slice(data);
    body.resize(body.len() + pad_len, 0);
    body
}
