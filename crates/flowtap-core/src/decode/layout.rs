/// BSD loopback (DLT_NULL / DLT_LOOP) address-family header length.
pub const NULL_HEADER_LEN: usize = 4;

pub const MAC_LEN: usize = 6;
