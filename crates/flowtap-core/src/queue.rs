use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::decode::RawFrame;
use crate::stats::CaptureStatistics;

/// Producer handle of the bounded capture queue.
///
/// `offer` never blocks: when the queue is full the frame is discarded and
/// counted as dropped. Every offered frame counts as captured, so
/// `captured == dropped + processed + depth` once the consumer has caught up.
///
/// # Examples
/// ```
/// use std::sync::Arc;
///
/// use flowtap_core::{CaptureStatistics, FrameQueue, RawFrame};
/// use pcap_parser::Linktype;
/// use time::OffsetDateTime;
///
/// let stats = Arc::new(CaptureStatistics::new());
/// let (queue, rx) = FrameQueue::bounded(1, Arc::clone(&stats));
/// let frame = RawFrame {
///     captured_at: OffsetDateTime::UNIX_EPOCH,
///     interface: Arc::from("eth0"),
///     linktype: Linktype::ETHERNET,
///     data: vec![0u8; 60],
/// };
/// assert!(queue.offer(frame.clone()));
/// assert!(!queue.offer(frame));
/// assert_eq!(stats.dropped(), 1);
/// assert_eq!(rx.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct FrameQueue {
    tx: Sender<RawFrame>,
    stats: Arc<CaptureStatistics>,
}

impl FrameQueue {
    pub fn bounded(capacity: usize, stats: Arc<CaptureStatistics>) -> (Self, Receiver<RawFrame>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx, stats }, rx)
    }

    /// Enqueue a frame. Returns `false` if it was dropped.
    pub fn offer(&self, frame: RawFrame) -> bool {
        self.stats.record_captured(frame.len());
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.record_dropped();
                false
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.tx.len()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}
