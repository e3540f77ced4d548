use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use etherparse::PacketBuilder;
use flowtap_core::{
    CaptureBackend, CaptureError, Engine, EngineConfig, EngineError, EngineState, FlowStatus,
    FlowSessionRecord, InterfaceInfo, ManualClock, MemorySink, PacketEvent, PacketRecord,
    PacketSource, Sink, SinkError, SourceError, SourceRead, TransportProtocol,
};
use parking_lot::Mutex;
use pcap_parser::Linktype;
use time::OffsetDateTime;

/// What the scripted source does once its frames run out.
#[derive(Clone, Copy)]
enum AfterFrames {
    End,
    Idle,
}

struct ScriptedSource {
    frames: VecDeque<Vec<u8>>,
    after: AfterFrames,
    stall: Option<Duration>,
}

impl PacketSource for ScriptedSource {
    fn next_packet(&mut self) -> Result<SourceRead, SourceError> {
        if let Some(stall) = self.stall.take() {
            thread::sleep(stall);
        }
        if let Some(data) = self.frames.pop_front() {
            return Ok(SourceRead::Packet(PacketEvent {
                linktype: Linktype::ETHERNET,
                data,
            }));
        }
        match self.after {
            AfterFrames::End => Ok(SourceRead::End),
            AfterFrames::Idle => {
                thread::sleep(Duration::from_millis(2));
                Ok(SourceRead::Idle)
            }
        }
    }
}

struct ScriptedBackend {
    interfaces: Vec<InterfaceInfo>,
    frames: Mutex<Vec<Vec<u8>>>,
    after: AfterFrames,
    stall: Option<Duration>,
}

impl ScriptedBackend {
    fn new(frames: Vec<Vec<u8>>, after: AfterFrames) -> Self {
        Self {
            interfaces: vec![iface("lo", true, true), iface("eth0", true, false)],
            frames: Mutex::new(frames),
            after,
            stall: None,
        }
    }

    fn stalling(stall: Duration) -> Self {
        Self {
            stall: Some(stall),
            ..Self::new(Vec::new(), AfterFrames::Idle)
        }
    }
}

impl CaptureBackend for ScriptedBackend {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError> {
        Ok(self.interfaces.clone())
    }

    fn open(
        &self,
        interface: &str,
        _filter: Option<&str>,
    ) -> Result<Box<dyn PacketSource>, CaptureError> {
        if !self.interfaces.iter().any(|iface| iface.name == interface) {
            return Err(CaptureError::Interface {
                name: interface.to_string(),
                message: "No such device exists".to_string(),
            });
        }
        Ok(Box::new(ScriptedSource {
            frames: std::mem::take(&mut *self.frames.lock()).into(),
            after: self.after,
            stall: self.stall,
        }))
    }
}

/// Rejects the first few records of each kind, then stores the rest.
struct FlakySink {
    inner: MemorySink,
    reject_packets: usize,
    reject_flows: usize,
}

impl Sink for FlakySink {
    fn persist_packet(&mut self, record: &PacketRecord) -> Result<(), SinkError> {
        if self.reject_packets > 0 {
            self.reject_packets -= 1;
            return Err(SinkError::Rejected("disk full".to_string()));
        }
        self.inner.persist_packet(record)
    }

    fn persist_flow(&mut self, record: &FlowSessionRecord) -> Result<(), SinkError> {
        if self.reject_flows > 0 {
            self.reject_flows -= 1;
            return Err(SinkError::Rejected("disk full".to_string()));
        }
        self.inner.persist_flow(record)
    }
}

fn iface(name: &str, is_up: bool, is_loopback: bool) -> InterfaceInfo {
    InterfaceInfo {
        name: name.to_string(),
        description: None,
        is_up,
        is_loopback,
        addresses: Vec::new(),
    }
}

fn tcp_frame(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
        .ipv4(src, dst, 64)
        .tcp(sport, dport, 0, 1024)
        .syn();
    let mut packet = Vec::with_capacity(builder.size(10));
    builder.write(&mut packet, &[0u8; 10]).unwrap();
    packet
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        sweep_interval_ms: 10,
        poll_interval_ms: 5,
        shutdown_grace_ms: 2_000,
        ..EngineConfig::default()
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn start_on_unknown_interface_fails_and_stays_stopped() {
    let backend = ScriptedBackend::new(Vec::new(), AfterFrames::Idle);
    let engine = Engine::new(fast_config(), Arc::new(backend), Box::new(MemorySink::new()));

    let err = engine.start("does-not-exist0", None).unwrap_err();

    assert!(matches!(
        err,
        EngineError::Capture(CaptureError::Interface { ref name, .. }) if name == "does-not-exist0"
    ));
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(!engine.statistics().running);
    engine.stop().unwrap();
}

#[test]
fn out_of_range_config_fails_start_without_spawning() {
    let backend = ScriptedBackend::new(Vec::new(), AfterFrames::Idle);
    let config = EngineConfig {
        flow_timeout_secs: 1_000_000_000_000,
        ..fast_config()
    };
    let engine = Engine::new(config, Arc::new(backend), Box::new(MemorySink::new()));

    let err = engine.start("eth0", None).unwrap_err();

    assert!(matches!(err, EngineError::Config(ref cfg) if cfg.field == "flow_timeout_secs"));
    assert_eq!(engine.state(), EngineState::Stopped);
    engine.stop().unwrap();
}

#[test]
fn auto_picks_first_up_non_loopback_interface() {
    let backend = ScriptedBackend::new(Vec::new(), AfterFrames::Idle);
    let engine = Engine::new(fast_config(), Arc::new(backend), Box::new(MemorySink::new()));

    let name = engine.start("auto", None).unwrap();
    assert_eq!(name, "eth0");
    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(engine.list_interfaces().unwrap(), vec!["lo", "eth0"]);

    engine.stop().unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn second_start_reports_already_running() {
    let backend = ScriptedBackend::new(Vec::new(), AfterFrames::Idle);
    let engine = Engine::new(fast_config(), Arc::new(backend), Box::new(MemorySink::new()));

    engine.start("eth0", None).unwrap();
    let err = engine.start("eth0", None).unwrap_err();

    assert!(matches!(err, EngineError::AlreadyRunning));
    assert_eq!(engine.state(), EngineState::Running);
    engine.stop().unwrap();
}

#[test]
fn stop_drains_queue_and_closes_remaining_flows() {
    let frames = vec![
        tcp_frame([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80),
        tcp_frame([10, 0, 0, 2], 80, [10, 0, 0, 1], 1234),
        tcp_frame([10, 0, 0, 3], 5555, [10, 0, 0, 2], 443),
    ];
    let backend = ScriptedBackend::new(frames, AfterFrames::End);
    let sink = MemorySink::new();
    let engine = Engine::new(fast_config(), Arc::new(backend), Box::new(sink.clone()));

    engine.start("eth0", None).unwrap();
    wait_until("source exhaustion", || engine.is_source_exhausted());
    engine.stop().unwrap();

    let stats = engine.statistics();
    assert_eq!(stats.captured, 3);
    assert_eq!(stats.dropped + stats.processed + stats.queue_depth as u64, stats.captured);
    assert_eq!(stats.active_flows, 0);
    assert!(!stats.running);

    assert_eq!(sink.packets().len(), 3);
    let flows = sink.flows();
    assert_eq!(flows.len(), 2);
    assert!(flows.iter().all(|flow| flow.status == FlowStatus::Closed));
    let first = &flows[0];
    assert_eq!(first.packet_count, 2);
    assert_eq!(first.protocol, TransportProtocol::Tcp);
    assert_eq!(first.src_port, Some(1234));
}

#[test]
fn idle_flow_is_evicted_after_timeout() {
    let clock = Arc::new(ManualClock::new(
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
    ));
    let frames = vec![tcp_frame([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80)];
    let backend = ScriptedBackend::new(frames, AfterFrames::Idle);
    let sink = MemorySink::new();
    let engine = Engine::new(fast_config(), Arc::new(backend), Box::new(sink.clone()))
        .with_clock(clock.clone());

    engine.start("eth0", None).unwrap();
    wait_until("first packet", || engine.statistics().processed == 1);
    assert_eq!(engine.statistics().active_flows, 1);

    clock.advance(Duration::from_secs(301));
    wait_until("eviction", || !sink.flows().is_empty());

    let flows = sink.flows();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].status, FlowStatus::Timeout);
    assert_eq!(flows[0].packet_count, 1);
    assert!(flows[0].duration_secs >= 300.0);
    assert_eq!(engine.statistics().active_flows, 0);

    engine.stop().unwrap();
    assert_eq!(sink.flows().len(), 1);
}

#[test]
fn undecodable_frames_are_counted_not_fatal() {
    let frames = vec![
        vec![0u8; 5],
        tcp_frame([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80),
    ];
    let backend = ScriptedBackend::new(frames, AfterFrames::End);
    let sink = MemorySink::new();
    let engine = Engine::new(fast_config(), Arc::new(backend), Box::new(sink.clone()));

    engine.start("eth0", None).unwrap();
    wait_until("source exhaustion", || engine.is_source_exhausted());
    engine.stop().unwrap();

    let stats = engine.statistics();
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.processed, 2);
    assert_eq!(sink.packets().len(), 1);
}

#[test]
fn stuck_worker_is_reported_as_shutdown_timeout() {
    let backend = ScriptedBackend::stalling(Duration::from_millis(400));
    let config = EngineConfig {
        shutdown_grace_ms: 20,
        ..fast_config()
    };
    let engine = Engine::new(config, Arc::new(backend), Box::new(MemorySink::new()));

    engine.start("eth0", None).unwrap();
    let err = engine.stop().unwrap_err();

    match err {
        EngineError::ShutdownTimeout { workers } => {
            assert!(workers.contains(&"flowtap-capture"));
        }
        other => panic!("expected shutdown timeout, got {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Stopping);
    assert!(matches!(
        engine.start("eth0", None),
        Err(EngineError::ShutdownPending)
    ));

    thread::sleep(Duration::from_millis(600));
    engine.stop().unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn statistics_are_available_before_first_start() {
    let backend = ScriptedBackend::new(Vec::new(), AfterFrames::Idle);
    let engine = Engine::new(fast_config(), Arc::new(backend), Box::new(MemorySink::new()));

    let stats = engine.statistics();
    assert_eq!(stats.captured, 0);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.packets_per_second, 0.0);
    assert!(stats.started_at.is_none());
    assert!(!stats.running);
}

#[test]
fn restart_resets_counters_and_keeps_sink() {
    let frames = vec![tcp_frame([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80)];
    let backend = ScriptedBackend::new(frames, AfterFrames::End);
    let sink = MemorySink::new();
    let engine = Engine::new(fast_config(), Arc::new(backend), Box::new(sink.clone()));

    engine.start("eth0", None).unwrap();
    wait_until("source exhaustion", || engine.is_source_exhausted());
    engine.stop().unwrap();
    assert_eq!(engine.statistics().captured, 1);

    // The scripted frames were consumed by the first run.
    engine.start("eth0", None).unwrap();
    wait_until("source exhaustion", || engine.is_source_exhausted());
    engine.stop().unwrap();

    assert_eq!(engine.statistics().captured, 0);
    assert_eq!(sink.flows().len(), 1);
}

#[test]
fn sink_failures_are_counted_and_capture_continues() {
    let frames = vec![
        tcp_frame([10, 0, 0, 1], 1234, [10, 0, 0, 2], 80),
        tcp_frame([10, 0, 0, 2], 80, [10, 0, 0, 1], 1234),
        tcp_frame([10, 0, 0, 3], 5555, [10, 0, 0, 2], 443),
    ];
    let backend = ScriptedBackend::new(frames, AfterFrames::End);
    let stored = MemorySink::new();
    let sink = FlakySink {
        inner: stored.clone(),
        reject_packets: 1,
        reject_flows: 1,
    };
    let engine = Engine::new(fast_config(), Arc::new(backend), Box::new(sink));

    engine.start("eth0", None).unwrap();
    wait_until("source exhaustion", || engine.is_source_exhausted());
    engine.stop().unwrap();

    let stats = engine.statistics();
    assert_eq!(stats.sink_errors, 2);
    assert_eq!(stats.processed, 3);
    assert_eq!(stored.packets().len(), 2);
    let flows = stored.flows();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].dst_port, Some(443));
}

#[test]
fn counters_never_decrease_while_running() {
    let frames = (0..2_000u16)
        .map(|idx| tcp_frame([10, 0, 0, 1], 1_024 + idx, [10, 0, 0, 2], 80))
        .collect();
    let backend = ScriptedBackend::new(frames, AfterFrames::Idle);
    let config = EngineConfig {
        queue_capacity: 64,
        ..fast_config()
    };
    let engine = Engine::new(config, Arc::new(backend), Box::new(MemorySink::new()));

    engine.start("eth0", None).unwrap();
    let mut previous = engine.statistics();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let current = engine.statistics();
        assert!(current.running);
        assert!(current.captured >= previous.captured);
        assert!(current.processed >= previous.processed);
        assert!(current.dropped >= previous.dropped);
        assert!(current.bytes_captured >= previous.bytes_captured);
        previous = current;

        if previous.captured == 2_000 && previous.processed + previous.dropped == 2_000 {
            break;
        }
        assert!(Instant::now() < deadline, "timed out waiting for the queue to drain");
        thread::yield_now();
    }

    engine.stop().unwrap();
    let stats = engine.statistics();
    assert_eq!(stats.captured, 2_000);
    assert_eq!(stats.dropped + stats.processed, stats.captured);
}
