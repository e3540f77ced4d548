use std::collections::HashMap;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::debug;

use crate::clock::saturating_add;
use crate::{FlowSessionRecord, FlowStatus, PacketRecord, TransportProtocol};

use super::expiry::{Deadline, ExpiryQueue};
use super::key::{Endpoint, FlowKey};

/// Mutable aggregate of an active flow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    pub flow_id: u64,
    pub key: FlowKey,
    /// Sender of the first observed packet.
    pub src: Endpoint,
    pub dst: Endpoint,
    pub protocol: TransportProtocol,
    pub start_time: OffsetDateTime,
    pub last_seen: OffsetDateTime,
    pub packet_count: u64,
    pub bytes: u64,
    pub status: FlowStatus,
}

impl FlowState {
    fn new(flow_id: u64, key: FlowKey, record: &PacketRecord) -> Self {
        Self {
            flow_id,
            key,
            src: Endpoint {
                ip: record.src_ip,
                port: record.src_port,
            },
            dst: Endpoint {
                ip: record.dst_ip,
                port: record.dst_port,
            },
            protocol: record.protocol_name,
            start_time: record.timestamp,
            last_seen: record.timestamp,
            packet_count: 1,
            bytes: record.packet_size,
            status: FlowStatus::Active,
        }
    }

    fn update(&mut self, record: &PacketRecord) {
        if record.timestamp > self.last_seen {
            self.last_seen = record.timestamp;
        }
        self.packet_count += 1;
        self.bytes += record.packet_size;
    }

    pub fn deadline(&self, timeout: Duration) -> OffsetDateTime {
        saturating_add(self.last_seen, timeout)
    }

    fn into_session(self, end_time: OffsetDateTime, status: FlowStatus) -> FlowSessionRecord {
        let end_time = end_time.max(self.last_seen);
        FlowSessionRecord {
            flow_id: self.flow_id,
            key: format!("{} {} <-> {}", self.protocol, self.key.lower, self.key.upper),
            src_ip: self.src.ip,
            src_port: self.src.port,
            dst_ip: self.dst.ip,
            dst_port: self.dst.port,
            ip_protocol: self.key.ip_protocol,
            protocol: self.protocol,
            start_time: self.start_time,
            last_seen: self.last_seen,
            end_time,
            duration_secs: (end_time - self.start_time).as_seconds_f64(),
            active_secs: (self.last_seen - self.start_time).as_seconds_f64(),
            packet_count: self.packet_count,
            bytes: self.bytes,
            status,
        }
    }
}

/// Active-flow table with deadline-ordered idle eviction.
///
/// # Examples
/// ```
/// use std::time::Duration;
///
/// use flowtap_core::FlowTracker;
///
/// let tracker = FlowTracker::new(Duration::from_secs(300));
/// assert!(tracker.is_empty());
/// ```
#[derive(Debug)]
pub struct FlowTracker {
    flows: HashMap<FlowKey, FlowState>,
    expiry: ExpiryQueue,
    timeout: Duration,
    next_flow_id: u64,
}

impl FlowTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            flows: HashMap::new(),
            expiry: ExpiryQueue::default(),
            timeout,
            next_flow_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowState> {
        self.flows.get(key)
    }

    /// Fold a packet into its flow, creating the flow on first sight.
    pub fn ingest(&mut self, record: &PacketRecord) -> FlowKey {
        let key = FlowKey::from_record(record);
        if let Some(state) = self.flows.get_mut(&key) {
            state.update(record);
            return key;
        }

        let flow_id = self.next_flow_id;
        self.next_flow_id += 1;
        let state = FlowState::new(flow_id, key, record);
        self.expiry.schedule(Deadline {
            at: state.deadline(self.timeout),
            flow_id,
            key,
        });
        self.flows.insert(key, state);
        key
    }

    /// Evict every flow idle for longer than the timeout at `now`.
    ///
    /// Only entries whose scheduled deadline has passed are examined.
    pub fn sweep(&mut self, now: OffsetDateTime) -> Vec<FlowSessionRecord> {
        let mut expired = Vec::new();
        while let Some(entry) = self.expiry.pop_due(now) {
            let deadline = match self.flows.get(&entry.key) {
                Some(state) if state.flow_id == entry.flow_id => state.deadline(self.timeout),
                _ => continue,
            };
            if deadline < now {
                if let Some(state) = self.flows.remove(&entry.key) {
                    expired.push(state.into_session(now, FlowStatus::Timeout));
                }
            } else {
                self.expiry.schedule(Deadline {
                    at: deadline,
                    ..entry
                });
            }
        }
        if !expired.is_empty() {
            debug!(
                evicted = expired.len(),
                active = self.flows.len(),
                "idle flows evicted"
            );
        }
        expired
    }

    /// Terminate one flow explicitly.
    pub fn close(&mut self, key: &FlowKey, now: OffsetDateTime) -> Option<FlowSessionRecord> {
        self.flows
            .remove(key)
            .map(|state| state.into_session(now, FlowStatus::Closed))
    }

    /// Terminate every remaining flow, oldest first.
    pub fn close_all(&mut self, now: OffsetDateTime) -> Vec<FlowSessionRecord> {
        self.expiry.clear();
        let mut states: Vec<FlowState> = self.flows.drain().map(|(_, state)| state).collect();
        states.sort_by_key(|state| state.flow_id);
        states
            .into_iter()
            .map(|state| state.into_session(now, FlowStatus::Closed))
            .collect()
    }
}
