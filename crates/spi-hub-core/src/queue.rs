//! Per-device transmit queue with deduplication.

use std::collections::VecDeque;

/// One outbound message waiting to be delivered to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// 0 means "no deduplication".
    pub dedupe_id: u16,
    pub channel_id: u8,
    pub payload: Vec<u8>,
}

/// FIFO of outbound messages for one device, with same-`dedupe_id`
/// collapsing: a non-zero `dedupe_id` already present in the queue has its
/// payload and channel replaced in place rather than growing the queue.
#[derive(Debug, Default)]
pub struct DeviceQueue {
    entries: VecDeque<QueueEntry>,
}

impl DeviceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message. If `dedupe_id != 0` and an entry with the same
    /// `dedupe_id` is already queued, its `channel_id` and `payload` are
    /// overwritten in place and the queue's length does not change.
    pub fn enqueue(&mut self, dedupe_id: u16, channel_id: u8, payload: Vec<u8>) {
        if dedupe_id != 0 {
            if let Some(existing) = self.entries.iter_mut().find(|e| e.dedupe_id == dedupe_id) {
                existing.channel_id = channel_id;
                existing.payload = payload;
                return;
            }
        }
        self.entries.push_back(QueueEntry {
            dedupe_id,
            channel_id,
            payload,
        });
    }

    /// Remove and return the oldest entry, if any.
    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_replaces_in_place_preserving_position() {
        let mut q = DeviceQueue::new();
        q.enqueue(7, 1, b"A".to_vec());
        q.enqueue(7, 2, b"B".to_vec());
        assert_eq!(q.len(), 1);
        let e = q.pop_front().unwrap();
        assert_eq!(e.channel_id, 2);
        assert_eq!(e.payload, b"B");
    }

    #[test]
    fn dedupe_replace_preserves_position_among_other_entries() {
        let mut q = DeviceQueue::new();
        q.enqueue(1, 0, b"first".to_vec());
        q.enqueue(7, 0, b"A".to_vec());
        q.enqueue(2, 0, b"third".to_vec());
        q.enqueue(7, 0, b"B".to_vec());

        assert_eq!(q.len(), 3);
        assert_eq!(q.pop_front().unwrap().payload, b"first");
        assert_eq!(q.pop_front().unwrap().payload, b"B");
        assert_eq!(q.pop_front().unwrap().payload, b"third");
    }

    #[test]
    fn zero_dedupe_id_never_collapses() {
        let mut q = DeviceQueue::new();
        q.enqueue(0, 1, b"a".to_vec());
        q.enqueue(0, 2, b"b".to_vec());
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_front().unwrap().payload, b"a");
        assert_eq!(q.pop_front().unwrap().payload, b"b");
    }

    #[test]
    fn pop_front_on_empty_queue_is_none() {
        let mut q = DeviceQueue::new();
        assert_eq!(q.pop_front(), None);
    }
}
