use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use time::OffsetDateTime;
use tracing::{debug, info, trace, warn};

use crate::FlowSessionRecord;
use crate::clock::{Clock, saturating_add};
use crate::decode::{RawFrame, decode_frame};
use crate::flow::FlowTracker;
use crate::sink::{Sink, SinkError};
use crate::stats::CaptureStatistics;

pub(super) const THREAD_NAME: &str = "flowtap-flows";

/// Decode and track loop. The only writer of the flow table.
///
/// Runs until every sender of the queue is gone and the queue is empty,
/// then closes the remaining flows and hands the sink back to the caller.
pub(super) struct Consumer {
    pub rx: Receiver<RawFrame>,
    pub tracker: FlowTracker,
    pub sink: Box<dyn Sink>,
    pub clock: Arc<dyn Clock>,
    pub stats: Arc<CaptureStatistics>,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
    pub persist_packets: bool,
}

impl Consumer {
    pub fn spawn(self) -> io::Result<JoinHandle<Box<dyn Sink>>> {
        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) -> Box<dyn Sink> {
        debug!(event.name = "consumer.started", "flow tracking loop started");
        let mut next_sweep = saturating_add(self.clock.now(), self.sweep_interval);

        loop {
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(frame) => self.process(&frame),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = self.clock.now();
            if now >= next_sweep {
                self.sweep(now);
                next_sweep = saturating_add(now, self.sweep_interval);
            }
        }

        self.finish()
    }

    fn process(&mut self, frame: &RawFrame) {
        self.stats.record_processed();
        let record = match decode_frame(frame) {
            Ok(Some(record)) => record,
            Ok(None) => {
                trace!(linktype = frame.linktype.0, len = frame.len(), "skipping non-IP frame");
                return;
            }
            Err(err) => {
                self.stats.record_decode_error();
                debug!(event.name = "consumer.decode_failed", error = %err, len = frame.len(), "dropping undecodable frame");
                return;
            }
        };

        if self.persist_packets {
            if let Err(err) = self.sink.persist_packet(&record) {
                self.sink_failed("packet", &err);
            }
        }
        self.tracker.ingest(&record);
        self.stats.set_active_flows(self.tracker.len());
    }

    fn sweep(&mut self, now: OffsetDateTime) {
        let expired = self.tracker.sweep(now);
        self.emit(&expired);
        self.stats.set_active_flows(self.tracker.len());
    }

    fn emit(&mut self, sessions: &[FlowSessionRecord]) {
        for session in sessions {
            if let Err(err) = self.sink.persist_flow(session) {
                self.sink_failed("flow", &err);
            }
        }
    }

    fn sink_failed(&self, kind: &str, err: &SinkError) {
        self.stats.record_sink_error();
        warn!(event.name = "consumer.sink_failed", record = kind, error = %err, "sink rejected record");
    }

    fn finish(mut self) -> Box<dyn Sink> {
        let now = self.clock.now();
        self.sweep(now);
        let closed = self.tracker.close_all(now);
        self.emit(&closed);
        self.stats.set_active_flows(0);
        if let Err(err) = self.sink.flush() {
            self.sink_failed("flush", &err);
        }
        info!(
            event.name = "consumer.stopped",
            closed_flows = closed.len(),
            "flow tracking loop drained and stopped"
        );
        self.sink
    }
}
