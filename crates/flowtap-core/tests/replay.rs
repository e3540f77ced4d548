use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use etherparse::PacketBuilder;
use flowtap_core::{
    CaptureBackend, CaptureError, Engine, EngineConfig, EngineError, FlowStatus, MemorySink,
    PacketSource, PcapFileSource, PcapngWriter, ReplayBackend, SourceError, SourceRead,
    TransportProtocol,
};
use pcap_parser::Linktype;

fn udp_frame(src_port: u16, dst_port: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [10, 11, 12, 13, 14, 15])
        .ipv4([192, 168, 1, 10], [192, 168, 1, 20], 64)
        .udp(src_port, dst_port);
    let mut packet = Vec::new();
    builder.write(&mut packet, b"flowtap").unwrap();
    packet
}

fn write_capture(path: &Path, frames: &[Vec<u8>]) {
    let file = File::create(path).unwrap();
    let mut writer = PcapngWriter::new(file, Linktype::ETHERNET).unwrap();
    for (idx, frame) in frames.iter().enumerate() {
        writer.write_packet(idx as u64 * 1_000_000, frame).unwrap();
    }
}

#[test]
fn pcap_source_reads_every_packet() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.pcapng");
    write_capture(&path, &[udp_frame(5000, 53), udp_frame(53, 5000)]);

    let mut source = PcapFileSource::open(&path).unwrap();
    let mut packets = 0;
    loop {
        match source.next_packet().unwrap() {
            SourceRead::Packet(event) => {
                assert_eq!(event.linktype, Linktype::ETHERNET);
                packets += 1;
            }
            SourceRead::Idle => {}
            SourceRead::End => break,
        }
    }

    assert_eq!(packets, 2);
}

#[test]
fn pcap_source_rejects_truncated_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.pcapng");
    fs::write(&path, [0x0a, 0x0d, 0x0d]).unwrap();

    let err = match PcapFileSource::open(&path) {
        Ok(_) => panic!("expected truncated file to be rejected"),
        Err(err) => err,
    };

    assert!(matches!(err, SourceError::Io(_)));
}

#[test]
fn replay_backend_exposes_file_as_single_interface() {
    let backend = ReplayBackend::new("/tmp/capture.pcapng");
    let interfaces = backend.interfaces().unwrap();

    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].name, "/tmp/capture.pcapng");
    assert!(interfaces[0].is_up);
    assert!(!interfaces[0].is_loopback);

    let err = match backend.open("eth0", None) {
        Ok(_) => panic!("expected foreign interface to be rejected"),
        Err(err) => err,
    };
    assert!(matches!(err, CaptureError::Interface { .. }));
}

#[test]
fn replay_missing_file_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ReplayBackend::new(dir.path().join("missing.pcapng"));
    let engine = Engine::new(
        EngineConfig::default(),
        Arc::new(backend),
        Box::new(MemorySink::new()),
    );

    let err = engine.start("auto", None).unwrap_err();
    assert!(matches!(err, EngineError::Capture(CaptureError::Interface { .. })));
}

#[test]
fn replay_runs_capture_file_through_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.pcapng");
    write_capture(
        &path,
        &[udp_frame(5000, 53), udp_frame(53, 5000), udp_frame(6000, 123)],
    );

    let sink = MemorySink::new();
    let config = EngineConfig {
        poll_interval_ms: 5,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, Arc::new(ReplayBackend::new(&path)), Box::new(sink.clone()));

    let interface = engine.start("auto", None).unwrap();
    assert_eq!(interface, path.display().to_string());

    let deadline = Instant::now() + Duration::from_secs(5);
    while !engine.is_source_exhausted() {
        assert!(Instant::now() < deadline, "replay never finished");
        thread::sleep(Duration::from_millis(5));
    }
    engine.stop().unwrap();

    let packets = sink.packets();
    assert_eq!(packets.len(), 3);
    assert!(packets.iter().all(|p| p.protocol_name == TransportProtocol::Udp));
    assert_eq!(packets[0].interface, interface);

    let flows = sink.flows();
    assert_eq!(flows.len(), 2);
    assert_eq!(flows[0].packet_count, 2);
    assert_eq!(flows[1].dst_port, Some(123));
    assert!(flows.iter().all(|flow| flow.status == FlowStatus::Closed));
}
