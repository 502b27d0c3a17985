//! Bounded ordered buffer of envelopes between processors.

use std::collections::VecDeque;

use crate::record::Envelope;

/// Default edge capacity; sources and sinks take theirs from
/// [`RuntimeConfig`](crate::config::RuntimeConfig).
pub const DEFAULT_CAPACITY: usize = 1024;

/// FIFO of envelopes with a high-water mark.
///
/// The bound is enforced at the pull side: a processor refuses to pull from
/// its upstream while `is_full`, so overflow is impossible by construction.
/// `push` itself never fails, which lets fan-out operators finish the input
/// they already accepted.
#[derive(Debug)]
pub struct EventQueue<K, V> {
    items: VecDeque<Envelope<K, V>>,
    capacity: usize,
}

impl<K, V> EventQueue<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, ev: Envelope<K, V>) {
        self.items.push_back(ev);
    }

    pub fn pop(&mut self) -> Option<Envelope<K, V>> {
        self.items.pop_front()
    }

    /// Pop the front envelope iff its event time is `<= now`. Pure commit
    /// markers carry no time and are always ready.
    pub fn pop_if_at_or_before(&mut self, now: i64) -> Option<Envelope<K, V>> {
        let ready = self
            .items
            .front()
            .is_some_and(|ev| ev.event_time().unwrap_or(i64::MIN) <= now);
        if ready { self.items.pop_front() } else { None }
    }

    /// Event time of the front envelope; `None` when empty. Pure markers
    /// report `i64::MIN` so they never hold the queue back.
    #[must_use]
    pub fn next_event_time(&self) -> Option<i64> {
        self.items
            .front()
            .map(|ev| ev.event_time().unwrap_or(i64::MIN))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<K, V> Default for EventQueue<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::CommitChain;
    use crate::record::Record;

    fn ev(t: i64) -> Envelope<&'static str, i32> {
        Envelope::from_record(Record::new("k", Some(1), t))
    }

    #[test]
    fn pop_respects_event_time_gate() {
        let mut q = EventQueue::new();
        q.push(ev(10));
        q.push(ev(20));

        assert!(q.pop_if_at_or_before(5).is_none());
        assert_eq!(q.next_event_time(), Some(10));
        assert!(q.pop_if_at_or_before(10).is_some());
        assert!(q.pop_if_at_or_before(15).is_none());
        assert!(q.pop_if_at_or_before(25).is_some());
        assert!(q.is_empty());
    }

    #[test]
    fn marker_only_envelopes_are_always_ready() {
        let chain = CommitChain::new();
        let mut q: EventQueue<&str, i32> = EventQueue::new();
        q.push(Envelope::marker_only(chain.create(0)));
        assert_eq!(q.next_event_time(), Some(i64::MIN));
        assert!(q.pop_if_at_or_before(i64::MIN).is_some());
    }

    #[test]
    fn capacity_is_a_high_water_mark() {
        let mut q = EventQueue::with_capacity(2);
        assert!(!q.is_full());
        q.push(ev(1));
        q.push(ev(2));
        assert!(q.is_full());
        // push still works; the bound is enforced by the puller
        q.push(ev(3));
        assert_eq!(q.len(), 3);
        q.pop();
        q.pop();
        assert!(!q.is_full());
    }
}
