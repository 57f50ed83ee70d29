use std::collections::VecDeque;

use super::protocol::CallRequest;

/// Calls waiting for the channel to become ready.
///
/// Only calls are queued. Membership changes live in the channel's room set,
/// which is replayed in full on every transition to ready, so they can never
/// be lost to overflow.
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    calls: VecDeque<CallRequest>,
    capacity: usize,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            calls: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append `call`; when full, the oldest queued call is evicted and
    /// returned so its caller can be failed.
    pub(crate) fn push(&mut self, call: CallRequest) -> Option<CallRequest> {
        let evicted = if self.calls.len() >= self.capacity {
            self.calls.pop_front()
        } else {
            None
        };
        self.calls.push_back(call);
        evicted
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = CallRequest> + '_ {
        self.calls.drain(..)
    }

    /// Keep only calls matching `keep`; used to shed calls that already
    /// settled (timed out or cancelled) while waiting.
    pub(crate) fn retain(&mut self, keep: impl FnMut(&CallRequest) -> bool) {
        self.calls.retain(keep);
    }

    pub(crate) fn clear(&mut self) {
        self.calls.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: u64) -> CallRequest {
        CallRequest {
            id,
            method: "get tip".into(),
            params: Vec::new(),
        }
    }

    #[test]
    fn drains_in_fifo_order() {
        let mut queue = OutboundQueue::new(4);
        for id in 1..=3 {
            assert!(queue.push(call(id)).is_none());
        }
        let ids: Vec<_> = queue.drain().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut queue = OutboundQueue::new(2);
        queue.push(call(1));
        queue.push(call(2));
        let evicted = queue.push(call(3)).expect("full queue must evict");
        assert_eq!(evicted.id, 1);
        let ids: Vec<_> = queue.drain().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn retain_sheds_settled_calls() {
        let mut queue = OutboundQueue::new(4);
        for id in 1..=4 {
            queue.push(call(id));
        }
        queue.retain(|c| c.id % 2 == 0);
        assert!(queue.push(call(5)).is_none());
        let ids: Vec<_> = queue.drain().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 4, 5]);
    }
}
