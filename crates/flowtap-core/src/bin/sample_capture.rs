use std::env;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use etherparse::PacketBuilder;
use flowtap_core::PcapngWriter;
use pcap_parser::Linktype;

const CLIENT_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const SERVER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];
const CLIENT_IP: [u8; 4] = [192, 168, 1, 10];
const SERVER_IP: [u8; 4] = [192, 168, 1, 20];
const RESOLVER_IP: [u8; 4] = [192, 168, 1, 1];
const LINK_LOCAL_IP: [u8; 16] = [0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
const MDNS_GROUP_IP: [u8; 16] = [0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xfb];
const ETHERTYPE_ARP: [u8; 2] = [0x08, 0x06];
const FRAME_SPACING_US: u64 = 250_000;

macro_rules! frame {
    ($builder:expr, $payload:expr $(,)?) => {{
        let builder = $builder;
        let payload: &[u8] = $payload;
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder
            .write(&mut frame, payload)
            .map_err(|err| format!("failed to build frame: {err}"))?;
        frame
    }};
}

fn main() -> Result<(), String> {
    let path = env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample.pcapng"));

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed to create {}: {}", parent.display(), err))?;
    }
    let file = File::create(&path)
        .map_err(|err| format!("failed to create {}: {}", path.display(), err))?;
    let mut writer = PcapngWriter::new(BufWriter::new(file), Linktype::ETHERNET)
        .map_err(|err| format!("failed to write {}: {}", path.display(), err))?;

    let frames = sample_frames()?;
    for (idx, frame) in frames.iter().enumerate() {
        writer
            .write_packet(idx as u64 * FRAME_SPACING_US, frame)
            .map_err(|err| format!("failed to write {}: {}", path.display(), err))?;
    }

    println!("wrote {} frames to {}", frames.len(), path.display());
    Ok(())
}

/// A short TCP exchange, a DNS lookup, a ping, an ARP request and an IPv6
/// datagram.
fn sample_frames() -> Result<Vec<Vec<u8>>, String> {
    let client = || PacketBuilder::ethernet2(CLIENT_MAC, SERVER_MAC);
    let server = || PacketBuilder::ethernet2(SERVER_MAC, CLIENT_MAC);

    let frames = vec![
        frame!(
            client().ipv4(CLIENT_IP, SERVER_IP, 64).tcp(49152, 80, 1000, 64240).syn(),
            &[],
        ),
        frame!(
            server()
                .ipv4(SERVER_IP, CLIENT_IP, 64)
                .tcp(80, 49152, 5000, 65160)
                .syn()
                .ack(1001),
            &[],
        ),
        frame!(
            client()
                .ipv4(CLIENT_IP, SERVER_IP, 64)
                .tcp(49152, 80, 1001, 64240)
                .ack(5001)
                .psh(),
            b"GET / HTTP/1.1\r\nHost: example\r\n\r\n",
        ),
        frame!(
            client().ipv4(CLIENT_IP, RESOLVER_IP, 64).udp(53000, 53),
            &[0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        ),
        frame!(
            server()
                .ipv4(RESOLVER_IP, CLIENT_IP, 64)
                .udp(53, 53000),
            &[0x12, 0x34, 0x81, 0x80, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00],
        ),
        frame!(
            client().ipv4(CLIENT_IP, SERVER_IP, 64).icmpv4_echo_request(7, 1),
            &[0u8; 32],
        ),
        arp_request(),
        frame!(
            client()
                .ipv6(LINK_LOCAL_IP, MDNS_GROUP_IP, 255)
                .udp(5353, 5353),
            &[0u8; 12],
        ),
    ];
    Ok(frames)
}

fn arp_request() -> Vec<u8> {
    let mut frame = Vec::with_capacity(42);
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(&CLIENT_MAC);
    frame.extend_from_slice(&ETHERTYPE_ARP);
    // Ethernet/IPv4, request.
    frame.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01]);
    frame.extend_from_slice(&CLIENT_MAC);
    frame.extend_from_slice(&CLIENT_IP);
    frame.extend_from_slice(&[0u8; 6]);
    frame.extend_from_slice(&SERVER_IP);
    frame
}
