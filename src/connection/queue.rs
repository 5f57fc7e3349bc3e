//! Offline Message Queue
//!
//! FIFO buffer for messages sent while disconnected. When full, the oldest
//! message is evicted to make room for the new one.

use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;

use crate::transport::AckCallback;

/// Outbound message waiting for a connection
pub struct PendingMessage {
    pub event: String,
    pub data: Value,
    pub ack: Option<AckCallback>,
}

impl fmt::Debug for PendingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingMessage")
            .field("event", &self.event)
            .field("data", &self.data)
            .field("ack", &self.ack.is_some())
            .finish()
    }
}

/// Bounded FIFO of pending messages
#[derive(Debug)]
pub struct MessageQueue {
    items: VecDeque<PendingMessage>,
    /// 0 means unbounded
    capacity: usize,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Append a message; returns the evicted message when the queue was full
    pub fn push(&mut self, message: PendingMessage) -> Option<PendingMessage> {
        let evicted = if self.capacity > 0 && self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(message);
        evicted
    }

    /// Take every message in enqueue order, leaving the queue empty
    pub fn drain(&mut self) -> Vec<PendingMessage> {
        self.items.drain(..).collect()
    }

    /// Change the bound, evicting the oldest entries that no longer fit
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        self.capacity = capacity;
        let mut evicted = 0;
        while capacity > 0 && self.items.len() > capacity {
            self.items.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(event: &str) -> PendingMessage {
        PendingMessage {
            event: event.to_string(),
            data: json!({}),
            ack: None,
        }
    }

    #[test]
    fn test_drain_preserves_order() {
        let mut queue = MessageQueue::new(0);
        queue.push(message("a"));
        queue.push(message("b"));
        queue.push(message("c"));

        let drained: Vec<String> = queue.drain().into_iter().map(|m| m.event).collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let mut queue = MessageQueue::new(2);
        assert!(queue.push(message("a")).is_none());
        assert!(queue.push(message("b")).is_none());

        let evicted = queue.push(message("c")).unwrap();
        assert_eq!(evicted.event, "a");
        assert_eq!(queue.len(), 2);

        let drained: Vec<String> = queue.drain().into_iter().map(|m| m.event).collect();
        assert_eq!(drained, vec!["b", "c"]);
    }

    #[test]
    fn test_shrinking_capacity_evicts() {
        let mut queue = MessageQueue::new(0);
        for event in ["a", "b", "c", "d"] {
            queue.push(message(event));
        }
        assert_eq!(queue.set_capacity(2), 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.capacity(), 2);
    }

    #[test]
    fn test_debug_hides_callback() {
        let pending = PendingMessage {
            event: "join_scan".to_string(),
            data: json!({"scan_id": "s1"}),
            ack: Some(Box::new(|_| {})),
        };
        let rendered = format!("{:?}", pending);
        assert!(rendered.contains("join_scan"));
        assert!(rendered.contains("ack: true"));
    }
}
