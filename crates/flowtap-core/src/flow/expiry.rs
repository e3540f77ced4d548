use std::cmp::Reverse;
use std::collections::BinaryHeap;

use time::OffsetDateTime;

use super::key::FlowKey;

/// Scheduled idle deadline for one flow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) struct Deadline {
    pub at: OffsetDateTime,
    pub flow_id: u64,
    pub key: FlowKey,
}

/// Min-heap of flow deadlines, earliest first.
///
/// Entries are lazy: a flow refreshed after scheduling keeps its old entry,
/// and the sweep re-schedules it when that entry comes due. Each live flow
/// therefore owns at most one entry.
#[derive(Debug, Default)]
pub(super) struct ExpiryQueue {
    heap: BinaryHeap<Reverse<Deadline>>,
}

impl ExpiryQueue {
    pub fn schedule(&mut self, deadline: Deadline) {
        self.heap.push(Reverse(deadline));
    }

    /// Pop the earliest entry if its deadline lies strictly before `now`.
    pub fn pop_due(&mut self, now: OffsetDateTime) -> Option<Deadline> {
        match self.heap.peek() {
            Some(Reverse(next)) if next.at < now => self.heap.pop().map(|Reverse(entry)| entry),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{Deadline, ExpiryQueue};
    use crate::flow::key::{Endpoint, FlowKey};
    use time::OffsetDateTime;

    fn key(port: u16) -> FlowKey {
        let a = Endpoint {
            ip: "10.0.0.1".parse().unwrap(),
            port: Some(port),
        };
        let b = Endpoint {
            ip: "10.0.0.2".parse().unwrap(),
            port: Some(80),
        };
        FlowKey::new(a, b, 6)
    }

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    #[test]
    fn pops_earliest_due_entries_only() {
        let mut queue = ExpiryQueue::default();
        queue.schedule(Deadline {
            at: at(30),
            flow_id: 2,
            key: key(2),
        });
        queue.schedule(Deadline {
            at: at(10),
            flow_id: 1,
            key: key(1),
        });

        assert!(queue.pop_due(at(10)).is_none());
        let first = queue.pop_due(at(31)).unwrap();
        assert_eq!(first.flow_id, 1);
        let second = queue.pop_due(at(31)).unwrap();
        assert_eq!(second.flow_id, 2);
        assert!(queue.pop_due(at(31)).is_none());
        assert_eq!(queue.len(), 0);
    }
}
