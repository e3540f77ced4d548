use std::fmt;

use etherparse::{LaxSlicedPacket, LinkSlice, LinuxSllProtocolType, LinuxSllSlice, TcpSlice};
use pcap_parser::Linktype;

use super::error::DecodeError;
use super::layout;

/// Slice a frame according to its link type.
///
/// Slicing is lax: a frame whose IP header is intact but whose transport
/// header is cut short still yields its network layer. Returns `Ok(None)`
/// for link types the decoder does not understand.
pub fn slice_frame(
    linktype: Linktype,
    data: &[u8],
) -> Result<Option<LaxSlicedPacket<'_>>, DecodeError> {
    let sliced = match linktype {
        Linktype::ETHERNET => LaxSlicedPacket::from_ethernet(data).map_err(slice_error)?,
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => {
            LaxSlicedPacket::from_ip(data).map_err(slice_error)?
        }
        Linktype::LINUX_SLL => {
            let sll = LinuxSllSlice::from_slice(data).map_err(slice_error)?;
            match sll.protocol_type() {
                LinuxSllProtocolType::EtherType(ether_type) => {
                    LaxSlicedPacket::from_ether_type(ether_type, sll.payload_slice())
                }
                _ => return Ok(None),
            }
        }
        Linktype::NULL | Linktype::LOOP => {
            let inner = data
                .get(layout::NULL_HEADER_LEN..)
                .ok_or(DecodeError::TooShort {
                    needed: layout::NULL_HEADER_LEN,
                    actual: data.len(),
                })?;
            LaxSlicedPacket::from_ip(inner).map_err(slice_error)?
        }
        _ => return Ok(None),
    };
    Ok(Some(sliced))
}

fn slice_error(err: impl fmt::Display) -> DecodeError {
    DecodeError::Slice(err.to_string())
}

/// Ethernet source/destination addresses, when the frame has them.
pub fn link_addresses(link: Option<&LinkSlice<'_>>) -> (Option<String>, Option<String>) {
    match link {
        Some(LinkSlice::Ethernet2(eth)) => (
            Some(format_mac(&eth.source())),
            Some(format_mac(&eth.destination())),
        ),
        _ => (None, None),
    }
}

pub fn format_mac(mac: &[u8; layout::MAC_LEN]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// TCP flag names in header bit order, joined by `,`.
pub fn tcp_flags(tcp: &TcpSlice<'_>) -> String {
    let flags = [
        (tcp.fin(), "FIN"),
        (tcp.syn(), "SYN"),
        (tcp.rst(), "RST"),
        (tcp.psh(), "PSH"),
        (tcp.ack(), "ACK"),
        (tcp.urg(), "URG"),
        (tcp.ece(), "ECE"),
        (tcp.cwr(), "CWR"),
    ];
    flags
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(",")
}
