use std::collections::VecDeque;

use dap_bridge_core::Notification;
use serde::Serialize;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferedNotification {
    pub seq: u64,
    #[serde(flatten)]
    pub notification: Notification,
}

/// Bounded ring of adapter notifications; the oldest entry is evicted first.
#[derive(Debug)]
pub struct NotificationBuffer {
    entries: VecDeque<BufferedNotification>,
    capacity: usize,
    next_seq: u64,
    evicted: u64,
}

impl NotificationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
            next_seq: 1,
            evicted: 0,
        }
    }

    pub fn push(&mut self, notification: Notification) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(BufferedNotification { seq, notification });
        seq
    }

    /// Entries with `seq > after`, oldest first, optionally limited to one session.
    pub fn since(&self, after: u64, session_id: Option<&str>, limit: usize) -> Vec<BufferedNotification> {
        self.entries
            .iter()
            .filter(|entry| entry.seq > after)
            .filter(|entry| match session_id {
                Some(id) => entry.notification.params.get("sessionId").and_then(|v| v.as_str()) == Some(id),
                None => true,
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn latest_seq(&self) -> u64 {
        self.next_seq - 1
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
