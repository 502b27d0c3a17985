//! Test doubles for operator unit tests.

use rill_log::StartOffset;

use crate::error::Result;
use crate::metrics::{Metric, short_type_name};
use crate::processor::{Processor, StreamSource};
use crate::queue::EventQueue;
use crate::record::Envelope;
use crate::topology::AppContext;

/// A source preloaded with a fixed list of envelopes.
pub(crate) struct FixedSource<K, V> {
    out: EventQueue<K, V>,
    partition: i32,
}

impl<K, V> FixedSource<K, V> {
    pub(crate) fn new(envelopes: Vec<Envelope<K, V>>) -> Self {
        let mut out = EventQueue::with_capacity(envelopes.len().max(1) * 2);
        for ev in envelopes {
            out.push(ev);
        }
        Self { out, partition: 0 }
    }

    pub(crate) fn push(&mut self, ev: Envelope<K, V>) {
        self.out.push(ev);
    }
}

impl<K, V> Processor for FixedSource<K, V> {
    fn kind(&self) -> &'static str {
        "fixed_source"
    }

    fn key_type_name(&self) -> String {
        short_type_name::<K>()
    }

    fn value_type_name(&self) -> String {
        short_type_name::<V>()
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    fn start(&mut self, _offset: StartOffset) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn process(&mut self, _now: i64) -> usize {
        0
    }

    fn eof(&self) -> bool {
        self.out.is_empty()
    }

    fn queue_size(&self) -> usize {
        self.out.len()
    }

    fn next_event_time(&self) -> Option<i64> {
        self.out.next_event_time()
    }

    fn commit(&mut self, _flush: bool) -> Result<()> {
        Ok(())
    }

    fn for_each_metric(&self, _f: &mut dyn FnMut(&Metric)) {}

    fn init_metrics(&mut self, _ctx: &AppContext) {}
}

impl<K, V> StreamSource<K, V> for FixedSource<K, V> {
    fn poll_output(&mut self, now: i64) -> Option<Envelope<K, V>> {
        self.out.pop_if_at_or_before(now)
    }
}
