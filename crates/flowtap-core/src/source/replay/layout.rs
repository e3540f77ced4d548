pub const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

pub const PCAP_READER_BUFFER_SIZE: usize = 65_536;

pub const SECTION_HEADER_BLOCK: u32 = 0x0A0D_0D0A;
pub const INTERFACE_DESCRIPTION_BLOCK: u32 = 1;
pub const ENHANCED_PACKET_BLOCK: u32 = 6;
pub const BYTE_ORDER_MAGIC: u32 = 0x1A2B_3C4D;

/// Block type, leading length and trailing length.
pub const BLOCK_OVERHEAD: usize = 12;
pub const WRITER_SNAPLEN: u32 = 65_535;
