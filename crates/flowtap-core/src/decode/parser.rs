use std::net::IpAddr;

use etherparse::{LaxNetSlice, TransportSlice};

use crate::{PacketRecord, TransportProtocol};

use super::RawFrame;
use super::error::DecodeError;
use super::reader::{link_addresses, slice_frame, tcp_flags};

/// Decode a captured frame into a `PacketRecord`.
///
/// Returns `Ok(None)` for frames without an IPv4/IPv6 header (ARP, LLDP,
/// unknown link types); these are skipped rather than treated as errors.
/// A readable IP header with a truncated or malformed transport header
/// still yields a record, tagged `OTHER` and without ports.
///
/// # Examples
/// ```
/// use std::sync::Arc;
///
/// use etherparse::PacketBuilder;
/// use flowtap_core::{RawFrame, decode_frame};
/// use pcap_parser::Linktype;
/// use time::OffsetDateTime;
///
/// let builder = PacketBuilder::ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64).udp(5353, 53);
/// let mut data = Vec::new();
/// builder.write(&mut data, &[0u8; 4]).unwrap();
///
/// let frame = RawFrame {
///     captured_at: OffsetDateTime::UNIX_EPOCH,
///     interface: Arc::from("eth0"),
///     linktype: Linktype::RAW,
///     data,
/// };
/// let record = decode_frame(&frame).unwrap().unwrap();
/// assert_eq!(record.dst_port, Some(53));
/// ```
pub fn decode_frame(frame: &RawFrame) -> Result<Option<PacketRecord>, DecodeError> {
    let Some(sliced) = slice_frame(frame.linktype, &frame.data)? else {
        return Ok(None);
    };
    let Some(net) = sliced.net.as_ref() else {
        // An IP ethertype whose header is unreadable, as opposed to a non-IP frame.
        return match sliced.stop_err {
            Some((err, _)) => Err(DecodeError::Slice(err.to_string())),
            None => Ok(None),
        };
    };

    let (src_ip, dst_ip, ttl) = match net {
        LaxNetSlice::Ipv4(ipv4) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
            ipv4.header().ttl(),
        ),
        LaxNetSlice::Ipv6(ipv6) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
            ipv6.header().hop_limit(),
        ),
    };
    let (ip_protocol, payload_size) = match net.ip_payload_ref() {
        Some(payload) => (payload.ip_number.0, payload.payload.len() as u64),
        None => (0, 0),
    };

    let (protocol_name, src_port, dst_port, flags) = match sliced.transport.as_ref() {
        Some(TransportSlice::Tcp(tcp)) => (
            TransportProtocol::Tcp,
            Some(tcp.source_port()),
            Some(tcp.destination_port()),
            tcp_flags(tcp),
        ),
        Some(TransportSlice::Udp(udp)) => (
            TransportProtocol::Udp,
            Some(udp.source_port()),
            Some(udp.destination_port()),
            String::new(),
        ),
        Some(TransportSlice::Icmpv4(_)) | Some(TransportSlice::Icmpv6(_)) => {
            (TransportProtocol::Icmp, None, None, String::new())
        }
        _ => (TransportProtocol::Other, None, None, String::new()),
    };

    let (src_mac, dst_mac) = link_addresses(sliced.link.as_ref());

    Ok(Some(PacketRecord {
        timestamp: frame.captured_at,
        packet_size: frame.data.len() as u64,
        interface: frame.interface.to_string(),
        src_mac,
        dst_mac,
        src_ip,
        dst_ip,
        ip_protocol,
        ttl,
        protocol_name,
        src_port,
        dst_port,
        flags,
        payload_size,
    }))
}
