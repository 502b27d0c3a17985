//! Value transform and fan-out operators.

use std::sync::Arc;

use rill_log::StartOffset;

use crate::error::Result;
use crate::metrics::{Metric, short_type_name};
use crate::processor::{Processor, StreamSource, stamp_metrics};
use crate::queue::EventQueue;
use crate::record::{Envelope, Record};
use crate::topology::AppContext;

/// Replaces each record's value with `f(key, value)`; the key, event time,
/// marker and partition hash are preserved. Tombstones stay tombstones.
pub struct MapValues<K, V, V2, U, F> {
    upstream: U,
    f: F,
    out: EventQueue<K, V2>,
    in_count: Metric,
    _input: std::marker::PhantomData<fn() -> V>,
}

impl<K, V, V2, U, F> MapValues<K, V, V2, U, F>
where
    K: Clone,
    U: StreamSource<K, V>,
    F: FnMut(&K, &V) -> V2,
{
    pub fn new(upstream: U, f: F) -> Self {
        Self {
            upstream,
            f,
            out: EventQueue::new(),
            in_count: Metric::counter("in_count"),
            _input: std::marker::PhantomData,
        }
    }
}

impl<K, V, V2, U, F> Processor for MapValues<K, V, V2, U, F>
where
    K: Clone,
    U: StreamSource<K, V>,
    F: FnMut(&K, &V) -> V2,
{
    fn kind(&self) -> &'static str {
        "map_values"
    }

    fn key_type_name(&self) -> String {
        short_type_name::<K>()
    }

    fn value_type_name(&self) -> String {
        short_type_name::<V2>()
    }

    fn partition(&self) -> i32 {
        self.upstream.partition()
    }

    fn start(&mut self, offset: StartOffset) -> Result<()> {
        self.upstream.start(offset)
    }

    fn close(&mut self) {
        self.upstream.close();
    }

    fn process(&mut self, now: i64) -> usize {
        self.upstream.process(now);
        let mut handled = 0;
        while !self.out.is_full() {
            let Some(ev) = self.upstream.poll_output(now) else {
                break;
            };
            handled += 1;
            self.in_count.inc();
            let mapped = match ev.record() {
                None => None,
                Some(r) => {
                    let value = r.value().map(|v| (self.f)(r.key(), v));
                    Some(Arc::new(Record::new(r.key().clone(), value, r.event_time())))
                }
            };
            self.out.push(Envelope::new(
                mapped,
                ev.marker().cloned(),
                ev.partition_hash(),
            ));
        }
        handled
    }

    fn eof(&self) -> bool {
        self.out.is_empty() && self.upstream.eof()
    }

    fn queue_size(&self) -> usize {
        self.out.len()
    }

    fn next_event_time(&self) -> Option<i64> {
        self.out.next_event_time()
    }

    fn commit(&mut self, flush: bool) -> Result<()> {
        self.upstream.commit(flush)
    }

    fn punctuate(&mut self, now: i64) {
        self.upstream.punctuate(now);
    }

    fn for_each_metric(&self, f: &mut dyn FnMut(&Metric)) {
        f(&self.in_count);
        self.upstream.for_each_metric(f);
    }

    fn init_metrics(&mut self, ctx: &AppContext) {
        stamp_metrics(
            &[&self.in_count],
            ctx,
            self.kind(),
            &self.key_type_name(),
            &self.value_type_name(),
            self.partition(),
        );
        self.upstream.init_metrics(ctx);
    }
}

impl<K, V, V2, U, F> StreamSource<K, V2> for MapValues<K, V, V2, U, F>
where
    K: Clone,
    U: StreamSource<K, V>,
    F: FnMut(&K, &V) -> V2,
{
    fn poll_output(&mut self, now: i64) -> Option<Envelope<K, V2>> {
        self.out.pop_if_at_or_before(now)
    }
}

/// Collects the records a [`FlatMap`] callback emits.
pub struct Emitter<K2, V2> {
    records: Vec<Record<K2, V2>>,
}

impl<K2, V2> Emitter<K2, V2> {
    fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn emit(&mut self, record: Record<K2, V2>) {
        self.records.push(record);
    }
}

/// Turns one record into zero or more, possibly re-keyed.
///
/// Every emitted record carries a clone of the input envelope's marker, so
/// the source offset completes only after all derived records complete.
pub struct FlatMap<K, V, K2, V2, U, F> {
    upstream: U,
    f: F,
    out: EventQueue<K2, V2>,
    in_count: Metric,
    _input: std::marker::PhantomData<fn() -> (K, V)>,
}

impl<K, V, K2, V2, U, F> FlatMap<K, V, K2, V2, U, F>
where
    U: StreamSource<K, V>,
    F: FnMut(&Record<K, V>, &mut Emitter<K2, V2>),
{
    pub fn new(upstream: U, f: F) -> Self {
        Self {
            upstream,
            f,
            out: EventQueue::new(),
            in_count: Metric::counter("in_count"),
            _input: std::marker::PhantomData,
        }
    }
}

impl<K, V, K2, V2, U, F> Processor for FlatMap<K, V, K2, V2, U, F>
where
    U: StreamSource<K, V>,
    F: FnMut(&Record<K, V>, &mut Emitter<K2, V2>),
{
    fn kind(&self) -> &'static str {
        "flat_map"
    }

    fn key_type_name(&self) -> String {
        short_type_name::<K2>()
    }

    fn value_type_name(&self) -> String {
        short_type_name::<V2>()
    }

    fn partition(&self) -> i32 {
        self.upstream.partition()
    }

    fn start(&mut self, offset: StartOffset) -> Result<()> {
        self.upstream.start(offset)
    }

    fn close(&mut self) {
        self.upstream.close();
    }

    fn process(&mut self, now: i64) -> usize {
        self.upstream.process(now);
        let mut handled = 0;
        // the fan-out of one input may overshoot the high-water mark; the
        // pull gate still bounds the queue to full + one input's emissions
        while !self.out.is_full() {
            let Some(ev) = self.upstream.poll_output(now) else {
                break;
            };
            handled += 1;
            let Some(record) = ev.record() else {
                self.out
                    .push(Envelope::new(None, ev.marker().cloned(), ev.partition_hash()));
                continue;
            };
            self.in_count.inc();
            let mut emitter = Emitter::new();
            (self.f)(record, &mut emitter);
            let marker = ev.marker().cloned();
            for rec in emitter.records {
                self.out
                    .push(Envelope::new(Some(Arc::new(rec)), marker.clone(), None));
            }
        }
        handled
    }

    fn eof(&self) -> bool {
        self.out.is_empty() && self.upstream.eof()
    }

    fn queue_size(&self) -> usize {
        self.out.len()
    }

    fn next_event_time(&self) -> Option<i64> {
        self.out.next_event_time()
    }

    fn commit(&mut self, flush: bool) -> Result<()> {
        self.upstream.commit(flush)
    }

    fn punctuate(&mut self, now: i64) {
        self.upstream.punctuate(now);
    }

    fn for_each_metric(&self, f: &mut dyn FnMut(&Metric)) {
        f(&self.in_count);
        self.upstream.for_each_metric(f);
    }

    fn init_metrics(&mut self, ctx: &AppContext) {
        stamp_metrics(
            &[&self.in_count],
            ctx,
            self.kind(),
            &self.key_type_name(),
            &self.value_type_name(),
            self.partition(),
        );
        self.upstream.init_metrics(ctx);
    }
}

impl<K, V, K2, V2, U, F> StreamSource<K2, V2> for FlatMap<K, V, K2, V2, U, F>
where
    U: StreamSource<K, V>,
    F: FnMut(&Record<K, V>, &mut Emitter<K2, V2>),
{
    fn poll_output(&mut self, now: i64) -> Option<Envelope<K2, V2>> {
        self.out.pop_if_at_or_before(now)
    }
}
