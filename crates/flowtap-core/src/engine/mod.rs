//! Capture lifecycle.
//!
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`. Start and stop
//! are serialized through one control lock; state and statistics reads never
//! take it, so they stay cheap while a stop is waiting on workers.

mod config;
mod consumer;
mod producer;

pub use config::{ConfigError, EngineConfig};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::catalog::{AUTO_INTERFACE, InterfaceInfo, auto_select, interface_names};
use crate::clock::{Clock, SystemClock};
use crate::decode::RawFrame;
use crate::flow::FlowTracker;
use crate::queue::FrameQueue;
use crate::sink::Sink;
use crate::source::{CaptureBackend, CaptureError};
use crate::stats::{CaptureStatistics, StatisticsSnapshot};

use consumer::Consumer;
use producer::Producer;

const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Stopped => "stopped",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("capture is already running")]
    AlreadyRunning,
    #[error("previous capture has not shut down; call stop again")]
    ShutdownPending,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("workers still running after the shutdown grace period: {}", workers.join(", "))]
    ShutdownTimeout { workers: Vec<&'static str> },
    #[error("worker '{worker}' panicked")]
    WorkerPanicked { worker: &'static str },
    #[error("sink was lost by a previous run")]
    SinkUnavailable,
}

struct Workers {
    running: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<Box<dyn Sink>>>,
}

impl Workers {
    fn pending(&self) -> Vec<&'static str> {
        let mut pending = Vec::new();
        if self.producer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            pending.push(producer::THREAD_NAME);
        }
        if self.consumer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            pending.push(consumer::THREAD_NAME);
        }
        pending
    }
}

struct Control {
    sink: Option<Box<dyn Sink>>,
    workers: Option<Workers>,
}

/// Owns the capture pipeline and exposes the control surface.
///
/// The engine is `Sync`; share it behind an `Arc` to call `stop` or
/// `statistics` from another thread.
pub struct Engine {
    config: EngineConfig,
    backend: Arc<dyn CaptureBackend>,
    clock: Arc<dyn Clock>,
    stats: Arc<CaptureStatistics>,
    state: RwLock<EngineState>,
    control: Mutex<Control>,
    depth_rx: RwLock<Option<Receiver<RawFrame>>>,
    exhausted: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(config: EngineConfig, backend: Arc<dyn CaptureBackend>, sink: Box<dyn Sink>) -> Self {
        Self {
            config,
            backend,
            clock: Arc::new(SystemClock),
            stats: Arc::new(CaptureStatistics::new()),
            state: RwLock::new(EngineState::Stopped),
            control: Mutex::new(Control {
                sink: Some(sink),
                workers: None,
            }),
            depth_rx: RwLock::new(None),
            exhausted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the wall clock used for stamping, eviction and elapsed time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn list_interfaces(&self) -> Result<Vec<String>, CaptureError> {
        interface_names(&self.backend.interfaces()?)
    }

    pub fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError> {
        self.backend.interfaces()
    }

    /// True once the capture source reported end of input or a read failure.
    pub fn is_source_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        let depth = self.depth_rx.read().as_ref().map_or(0, |rx| rx.len());
        let mut snapshot = self.stats.snapshot(self.clock.now(), depth);
        snapshot.running = self.state() == EngineState::Running;
        snapshot
    }

    /// Open the capture source and spawn both workers.
    ///
    /// Returns the resolved interface name. On failure no worker is left
    /// behind and the engine stays `Stopped`.
    pub fn start(&self, interface: &str, filter: Option<&str>) -> Result<String, EngineError> {
        let mut control = self.control.lock();
        match self.state() {
            EngineState::Stopped => {}
            EngineState::Stopping => return Err(EngineError::ShutdownPending),
            EngineState::Starting | EngineState::Running => {
                warn!(event.name = "engine.already_running", "start requested while capture is running");
                return Err(EngineError::AlreadyRunning);
            }
        }

        self.set_state(EngineState::Starting);
        match self.launch(&mut control, interface, filter) {
            Ok(name) => {
                self.set_state(EngineState::Running);
                info!(
                    event.name = "engine.started",
                    interface = %name,
                    filter = filter.unwrap_or(""),
                    "capture started"
                );
                Ok(name)
            }
            Err(err) => {
                self.set_state(EngineState::Stopped);
                Err(err)
            }
        }
    }

    fn launch(
        &self,
        control: &mut Control,
        interface: &str,
        filter: Option<&str>,
    ) -> Result<String, EngineError> {
        self.config.validate()?;
        let name = self.resolve_interface(interface)?;
        let source = self.backend.open(&name, filter)?;
        let sink = control.sink.take().ok_or(EngineError::SinkUnavailable)?;

        self.stats.reset(self.clock.now());
        self.exhausted.store(false, Ordering::Release);
        let running = Arc::new(AtomicBool::new(true));
        let (queue, rx) = FrameQueue::bounded(self.config.queue_capacity, Arc::clone(&self.stats));

        let consumer = Consumer {
            rx: rx.clone(),
            tracker: FlowTracker::new(self.config.flow_timeout()),
            sink,
            clock: Arc::clone(&self.clock),
            stats: Arc::clone(&self.stats),
            poll_interval: self.config.poll_interval(),
            sweep_interval: self.config.sweep_interval(),
            persist_packets: self.config.persist_packets,
        }
        .spawn()
        .map_err(EngineError::Spawn)?;

        let producer = Producer {
            source,
            queue,
            interface: Arc::from(name.as_str()),
            clock: Arc::clone(&self.clock),
            running: Arc::clone(&running),
            exhausted: Arc::clone(&self.exhausted),
        }
        .spawn();
        let producer = match producer {
            Ok(handle) => handle,
            Err(err) => {
                // The failed spawn dropped the only sender, so the consumer
                // drains and hands the sink back.
                if let Ok(sink) = consumer.join() {
                    control.sink = Some(sink);
                }
                self.stats.mark_stopped(self.clock.now());
                return Err(EngineError::Spawn(err));
            }
        };

        *self.depth_rx.write() = Some(rx);
        control.workers = Some(Workers {
            running,
            producer: Some(producer),
            consumer: Some(consumer),
        });
        Ok(name)
    }

    fn resolve_interface(&self, requested: &str) -> Result<String, CaptureError> {
        if requested != AUTO_INTERFACE {
            return Ok(requested.to_string());
        }
        let interfaces = self.backend.interfaces()?;
        let chosen = auto_select(&interfaces)?;
        debug!(event.name = "engine.auto_selected", interface = %chosen.name, "resolved auto interface");
        Ok(chosen.name.clone())
    }

    /// Signal both workers, wait for the queue to drain, and join them.
    ///
    /// Fails with `ShutdownTimeout` if a worker outlives the grace period;
    /// the engine then stays `Stopping` and `stop` may be called again.
    pub fn stop(&self) -> Result<(), EngineError> {
        let mut guard = self.control.lock();
        let control = &mut *guard;
        let Some(workers) = control.workers.as_mut() else {
            debug!(event.name = "engine.stop_ignored", "stop requested while already stopped");
            return Ok(());
        };

        self.set_state(EngineState::Stopping);
        workers.running.store(false, Ordering::Release);

        let deadline = Instant::now().checked_add(self.config.shutdown_grace());
        loop {
            let pending = workers.pending();
            if pending.is_empty() {
                break;
            }
            if deadline.is_none_or(|deadline| Instant::now() >= deadline) {
                error!(
                    event.name = "engine.shutdown_timeout",
                    workers = ?pending,
                    "workers did not exit within the grace period"
                );
                return Err(EngineError::ShutdownTimeout { workers: pending });
            }
            thread::sleep(JOIN_POLL);
        }

        let mut panicked = None;
        if let Some(handle) = workers.producer.take() {
            if handle.join().is_err() {
                panicked = Some(producer::THREAD_NAME);
            }
        }
        if let Some(handle) = workers.consumer.take() {
            match handle.join() {
                Ok(sink) => control.sink = Some(sink),
                Err(_) => panicked = Some(consumer::THREAD_NAME),
            }
        }

        control.workers = None;
        *self.depth_rx.write() = None;
        self.stats.mark_stopped(self.clock.now());
        self.set_state(EngineState::Stopped);

        if let Some(worker) = panicked {
            error!(event.name = "engine.worker_panicked", worker, "worker panicked during capture");
            return Err(EngineError::WorkerPanicked { worker });
        }
        let stats = self.stats.snapshot(self.clock.now(), 0);
        info!(
            event.name = "engine.stopped",
            captured = stats.captured,
            processed = stats.processed,
            dropped = stats.dropped,
            "capture stopped"
        );
        Ok(())
    }

    fn set_state(&self, state: EngineState) {
        let mut current = self.state.write();
        let previous = *current;
        if previous != state {
            debug!(event.name = "engine.state", from = %previous, to = %state, "state transition");
            *current = state;
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.control.get_mut().workers.is_some() {
            if let Err(err) = self.stop() {
                error!(event.name = "engine.drop_stop_failed", error = %err, "capture did not stop cleanly");
            }
        }
    }
}
