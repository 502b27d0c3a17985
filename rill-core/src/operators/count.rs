//! Count-by-key aggregation with event-time punctuation.

use std::sync::Arc;

use rill_log::StartOffset;

use crate::error::{Error, Result};
use crate::metrics::{Metric, short_type_name};
use crate::processor::{MaterializedSource, Processor, StreamSource, stamp_metrics};
use crate::queue::EventQueue;
use crate::record::{Envelope, Record};
use crate::stores::{NO_OFFSET, StateStore};
use crate::topology::AppContext;

/// Counts records per key, emitting the whole aggregate every
/// `punctuate_interval_ms` of *event time*.
///
/// The record value is ignored and tombstones do not count. Emission is
/// driven purely by event time moving past a window boundary, so a pause
/// in the input emits nothing, and one very late record cannot re-emit an
/// earlier window. Emitted records are stamped with the window's start.
pub struct CountByKey<K, VI, U, S> {
    upstream: U,
    store: S,
    out: EventQueue<K, i64>,
    punctuate_interval_ms: i64,
    next_punctuate: Option<i64>,
    dirty: bool,
    in_count: Metric,
    fatal: Option<String>,
    _input: std::marker::PhantomData<fn() -> VI>,
}

impl<K, VI, U, S> CountByKey<K, VI, U, S>
where
    K: Clone,
    U: StreamSource<K, VI>,
    S: StateStore<K, i64>,
{
    pub fn new(upstream: U, store: S, punctuate_interval_ms: i64) -> Self {
        Self {
            upstream,
            store,
            out: EventQueue::new(),
            punctuate_interval_ms: punctuate_interval_ms.max(1),
            next_punctuate: None,
            dirty: false,
            in_count: Metric::counter("in_count"),
            fatal: None,
            _input: std::marker::PhantomData,
        }
    }

    fn emit_window(&mut self, timestamp: i64) {
        if !self.dirty {
            return;
        }
        let out = &mut self.out;
        self.store.for_each(&mut |r| {
            out.push(Envelope::new(
                Some(Arc::new(Record::new(
                    r.key().clone(),
                    r.value().copied(),
                    timestamp,
                ))),
                None,
                None,
            ));
        });
        self.dirty = false;
    }
}

impl<K, VI, U, S> Processor for CountByKey<K, VI, U, S>
where
    K: Clone,
    U: StreamSource<K, VI>,
    S: StateStore<K, i64>,
{
    fn kind(&self) -> &'static str {
        "count_by_key"
    }

    fn key_type_name(&self) -> String {
        short_type_name::<K>()
    }

    fn value_type_name(&self) -> String {
        short_type_name::<i64>()
    }

    fn partition(&self) -> i32 {
        self.upstream.partition()
    }

    fn start(&mut self, offset: StartOffset) -> Result<()> {
        self.fatal = None;
        self.out.clear();
        self.next_punctuate = None;
        self.dirty = false;
        match offset {
            StartOffset::Beginning => {
                self.store.clear()?;
                self.upstream.start(StartOffset::Beginning)
            }
            other => {
                let stored = self.store.offset();
                if stored >= 0 {
                    self.upstream.start(StartOffset::At(stored + 1))
                } else {
                    self.upstream.start(other)
                }
            }
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.store.close() {
            tracing::warn!(error = %e, "store close failed");
        }
        self.upstream.close();
    }

    fn process(&mut self, now: i64) -> usize {
        if self.fatal.is_some() {
            return 0;
        }
        self.upstream.process(now);
        let mut handled = 0;
        while !self.out.is_full() {
            let Some(ev) = self.upstream.poll_output(now) else {
                break;
            };
            handled += 1;
            let Some(record) = ev.record() else {
                continue;
            };
            if record.is_tombstone() {
                continue;
            }
            let offset = ev.offset().unwrap_or(NO_OFFSET);
            if offset >= 0 && offset <= self.store.offset() {
                continue; // replay after resume
            }
            let t = record.event_time();
            match self.next_punctuate {
                None => self.next_punctuate = Some(t + self.punctuate_interval_ms),
                Some(next) if t >= next => {
                    self.emit_window(next - self.punctuate_interval_ms);
                    self.next_punctuate = Some(t + self.punctuate_interval_ms);
                }
                Some(_) => {}
            }
            let key = record.key().clone();
            if let Err(e) = self.store.insert(Record::new(key, Some(1), t), offset) {
                tracing::error!(error = %e, "counter store failure");
                self.fatal = Some(e.to_string());
                return handled;
            }
            self.dirty = true;
            self.in_count.inc();
        }
        handled
    }

    fn eof(&self) -> bool {
        self.fatal.is_some() || (self.out.is_empty() && self.upstream.eof())
    }

    fn queue_size(&self) -> usize {
        self.out.len()
    }

    fn next_event_time(&self) -> Option<i64> {
        self.out.next_event_time()
    }

    fn commit(&mut self, flush: bool) -> Result<()> {
        if let Some(msg) = &self.fatal {
            return Err(Error::Store(crate::stores::StoreError::Corrupt(
                msg.clone(),
            )));
        }
        self.store.commit(flush)?;
        self.upstream.commit(flush)
    }

    fn punctuate(&mut self, now: i64) {
        self.upstream.punctuate(now);
        if let Some(next) = self.next_punctuate {
            self.emit_window(next - self.punctuate_interval_ms);
        }
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

impl<K, VI, U, S> StreamSource<K, i64> for CountByKey<K, VI, U, S>
where
    K: Clone,
    U: StreamSource<K, VI>,
    S: StateStore<K, i64>,
{
    fn poll_output(&mut self, now: i64) -> Option<Envelope<K, i64>> {
        self.out.pop_if_at_or_before(now)
    }
}

impl<K, VI, U, S> MaterializedSource<K, i64> for CountByKey<K, VI, U, S>
where
    K: Clone,
    U: StreamSource<K, VI>,
    S: StateStore<K, i64>,
{
    fn get(&self, key: &K) -> Option<Record<K, i64>> {
        self.store.get(key)
    }

    fn for_each_entry(&self, f: &mut dyn FnMut(&Record<K, i64>)) {
        self.store.for_each(f);
    }

    fn entry_count(&self) -> usize {
        self.store.len()
    }
}
