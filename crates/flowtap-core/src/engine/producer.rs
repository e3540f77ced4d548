use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::decode::RawFrame;
use crate::queue::FrameQueue;
use crate::source::{PacketSource, SourceRead};

pub(super) const THREAD_NAME: &str = "flowtap-capture";

/// Capture loop: reads frames off the source and offers them to the queue.
///
/// Dropping the producer drops the queue's only sender, which lets the
/// consumer drain what is left and exit.
pub(super) struct Producer {
    pub source: Box<dyn PacketSource>,
    pub queue: FrameQueue,
    pub interface: Arc<str>,
    pub clock: Arc<dyn Clock>,
    pub running: Arc<AtomicBool>,
    pub exhausted: Arc<AtomicBool>,
}

impl Producer {
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        info!(
            event.name = "producer.started",
            interface = %self.interface,
            capacity = self.queue.capacity(),
            "capture loop started"
        );
        let mut overflowing = false;

        while self.running.load(Ordering::Acquire) {
            match self.source.next_packet() {
                Ok(SourceRead::Packet(event)) => {
                    let frame = RawFrame {
                        captured_at: self.clock.now(),
                        interface: Arc::clone(&self.interface),
                        linktype: event.linktype,
                        data: event.data,
                    };
                    let accepted = self.queue.offer(frame);
                    if !accepted && !overflowing {
                        warn!(
                            event.name = "producer.queue_full",
                            capacity = self.queue.capacity(),
                            "capture queue full, dropping frames"
                        );
                    } else if accepted && overflowing {
                        debug!(event.name = "producer.queue_recovered", "capture queue accepting frames again");
                    }
                    overflowing = !accepted;
                }
                Ok(SourceRead::Idle) => {}
                Ok(SourceRead::End) => {
                    info!(event.name = "producer.source_exhausted", "capture source has no more frames");
                    self.exhausted.store(true, Ordering::Release);
                    break;
                }
                Err(err) => {
                    error!(
                        event.name = "producer.read_failed",
                        error = %err,
                        "capture read failed, stopping capture loop"
                    );
                    self.exhausted.store(true, Ordering::Release);
                    break;
                }
            }
        }

        debug!(event.name = "producer.stopped", "capture loop exited");
    }
}
