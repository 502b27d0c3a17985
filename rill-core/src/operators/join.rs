//! Stream↔table and table↔table joins on equal keys.
//!
//! Stream joins drain and commit the table side before touching the stream
//! queue, so each stream record joins against a table snapshot consistent
//! with the tick's `now`. Table updates themselves never emit from a stream
//! join. Table↔table joins emit once per change on either side, left side
//! drained first within a tick.

use std::sync::Arc;

use rill_log::StartOffset;

use crate::commit::CommitMarker;
use crate::error::Result;
use crate::metrics::{Metric, short_type_name};
use crate::processor::{MaterializedSource, Processor, StreamSource, stamp_metrics};
use crate::queue::EventQueue;
use crate::record::{Envelope, Record};
use crate::topology::AppContext;

/// Drain a stream join's table side up to `now` and record its progress.
fn absorb_table<K, V, T: MaterializedSource<K, V>>(table: &mut T, now: i64) {
    table.process(now);
    let mut changed = false;
    while table.poll_output(now).is_some() {
        changed = true;
    }
    if changed
        && let Err(e) = table.commit(false)
    {
        tracing::warn!(error = %e, "table-side commit failed");
    }
}

/// The pieces of a table change an emission is built from.
struct Change<K> {
    key: K,
    event_time: i64,
    marker: Option<CommitMarker>,
    partition_hash: Option<u32>,
}

fn change_of<K: Clone, V>(ev: &Envelope<K, V>) -> Option<Change<K>> {
    let record = ev.record()?;
    Some(Change {
        key: record.key().clone(),
        event_time: record.event_time(),
        marker: ev.marker().cloned(),
        partition_hash: ev.partition_hash(),
    })
}

/// For each stream record with a non-null value, emit
/// `(left, Option<right>)` against the table's latest state.
pub struct StreamLeftJoin<K, VL, VR, UL, T> {
    stream: UL,
    table: T,
    out: EventQueue<K, (VL, Option<VR>)>,
    in_count: Metric,
}

/// Like [`StreamLeftJoin`], but emits `(left, right)` only when the table
/// has a live value for the key.
pub struct StreamInnerJoin<K, VL, VR, UL, T> {
    stream: UL,
    table: T,
    out: EventQueue<K, (VL, VR)>,
    in_count: Metric,
}

macro_rules! stream_join_processor {
    ($name:ident, $kind:literal, $out_v:ty) => {
        impl<K, VL, VR, UL, T> $name<K, VL, VR, UL, T>
        where
            K: Clone,
            VL: Clone,
            VR: Clone,
            UL: StreamSource<K, VL>,
            T: MaterializedSource<K, VR>,
        {
            pub fn new(stream: UL, table: T) -> Self {
                Self {
                    stream,
                    table,
                    out: EventQueue::new(),
                    in_count: Metric::counter("in_count"),
                }
            }
        }

        impl<K, VL, VR, UL, T> Processor for $name<K, VL, VR, UL, T>
        where
            K: Clone,
            VL: Clone,
            VR: Clone,
            UL: StreamSource<K, VL>,
            T: MaterializedSource<K, VR>,
        {
            fn kind(&self) -> &'static str {
                $kind
            }

            fn key_type_name(&self) -> String {
                short_type_name::<K>()
            }

            fn value_type_name(&self) -> String {
                short_type_name::<$out_v>()
            }

            fn partition(&self) -> i32 {
                self.stream.partition()
            }

            fn start(&mut self, offset: StartOffset) -> Result<()> {
                self.stream.start(offset)?;
                self.table.start(offset)
            }

            fn close(&mut self) {
                self.table.close();
                self.stream.close();
            }

            fn process(&mut self, now: i64) -> usize {
                absorb_table(&mut self.table, now);
                self.stream.process(now);
                let mut handled = 0;
                while !self.out.is_full() {
                    let Some(ev) = self.stream.poll_output(now) else {
                        break;
                    };
                    handled += 1;
                    self.join_one(&ev);
                }
                handled
            }

            fn eof(&self) -> bool {
                self.out.is_empty() && self.stream.eof() && self.table.eof()
            }

            fn queue_size(&self) -> usize {
                self.out.len()
            }

            fn next_event_time(&self) -> Option<i64> {
                self.out.next_event_time()
            }

            fn commit(&mut self, flush: bool) -> Result<()> {
                self.table.commit(flush)?;
                self.stream.commit(flush)
            }

            fn punctuate(&mut self, now: i64) {
                self.stream.punctuate(now);
                self.table.punctuate(now);
            }

            fn for_each_metric(&self, f: &mut dyn FnMut(&Metric)) {
                f(&self.in_count);
                self.stream.for_each_metric(f);
                self.table.for_each_metric(f);
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
                self.stream.init_metrics(ctx);
                self.table.init_metrics(ctx);
            }
        }

        impl<K, VL, VR, UL, T> StreamSource<K, $out_v> for $name<K, VL, VR, UL, T>
        where
            K: Clone,
            VL: Clone,
            VR: Clone,
            UL: StreamSource<K, VL>,
            T: MaterializedSource<K, VR>,
        {
            fn poll_output(&mut self, now: i64) -> Option<Envelope<K, $out_v>> {
                self.out.pop_if_at_or_before(now)
            }
        }
    };
}

stream_join_processor!(StreamLeftJoin, "stream_left_join", (VL, Option<VR>));
stream_join_processor!(StreamInnerJoin, "stream_inner_join", (VL, VR));

impl<K, VL, VR, UL, T> StreamLeftJoin<K, VL, VR, UL, T>
where
    K: Clone,
    VL: Clone,
    VR: Clone,
    UL: StreamSource<K, VL>,
    T: MaterializedSource<K, VR>,
{
    fn join_one(&mut self, ev: &Envelope<K, VL>) {
        // null stream values emit nothing; the marker completes by drop
        let Some(record) = ev.record() else {
            return;
        };
        let Some(left) = record.value() else {
            return;
        };
        self.in_count.inc();
        let right = self.table.get(record.key()).and_then(Record::into_value);
        let joined = Record::new(
            record.key().clone(),
            Some((left.clone(), right)),
            record.event_time(),
        );
        self.out.push(Envelope::new(
            Some(Arc::new(joined)),
            ev.marker().cloned(),
            ev.partition_hash(),
        ));
    }
}

impl<K, VL, VR, UL, T> StreamInnerJoin<K, VL, VR, UL, T>
where
    K: Clone,
    VL: Clone,
    VR: Clone,
    UL: StreamSource<K, VL>,
    T: MaterializedSource<K, VR>,
{
    fn join_one(&mut self, ev: &Envelope<K, VL>) {
        let Some(record) = ev.record() else {
            return;
        };
        let Some(left) = record.value() else {
            return;
        };
        self.in_count.inc();
        let Some(right) = self.table.get(record.key()).and_then(Record::into_value) else {
            return;
        };
        let joined = Record::new(
            record.key().clone(),
            Some((left.clone(), right)),
            record.event_time(),
        );
        self.out.push(Envelope::new(
            Some(Arc::new(joined)),
            ev.marker().cloned(),
            ev.partition_hash(),
        ));
    }
}

/// Emits `(left, Option<right>)` on every change of either table while the
/// left side exists, a tombstone once it does not.
pub struct KtableLeftJoin<K, VL, VR, TL, TR> {
    left: TL,
    right: TR,
    out: EventQueue<K, (VL, Option<VR>)>,
    in_count: Metric,
}

/// Emits `(left, right)` while both sides exist, a tombstone otherwise.
pub struct KtableInnerJoin<K, VL, VR, TL, TR> {
    left: TL,
    right: TR,
    out: EventQueue<K, (VL, VR)>,
    in_count: Metric,
}

/// Emits `(Option<left>, Option<right>)` while either side exists, a
/// tombstone once both are gone.
pub struct KtableOuterJoin<K, VL, VR, TL, TR> {
    left: TL,
    right: TR,
    out: EventQueue<K, (Option<VL>, Option<VR>)>,
    in_count: Metric,
}

macro_rules! table_join_processor {
    ($name:ident, $kind:literal, $out_v:ty) => {
        impl<K, VL, VR, TL, TR> $name<K, VL, VR, TL, TR>
        where
            K: Clone,
            VL: Clone,
            VR: Clone,
            TL: MaterializedSource<K, VL>,
            TR: MaterializedSource<K, VR>,
        {
            pub fn new(left: TL, right: TR) -> Self {
                Self {
                    left,
                    right,
                    out: EventQueue::new(),
                    in_count: Metric::counter("in_count"),
                }
            }
        }

        impl<K, VL, VR, TL, TR> Processor for $name<K, VL, VR, TL, TR>
        where
            K: Clone,
            VL: Clone,
            VR: Clone,
            TL: MaterializedSource<K, VL>,
            TR: MaterializedSource<K, VR>,
        {
            fn kind(&self) -> &'static str {
                $kind
            }

            fn key_type_name(&self) -> String {
                short_type_name::<K>()
            }

            fn value_type_name(&self) -> String {
                short_type_name::<$out_v>()
            }

            fn partition(&self) -> i32 {
                self.left.partition()
            }

            fn start(&mut self, offset: StartOffset) -> Result<()> {
                self.left.start(offset)?;
                self.right.start(offset)
            }

            fn close(&mut self) {
                self.right.close();
                self.left.close();
            }

            fn process(&mut self, now: i64) -> usize {
                self.left.process(now);
                self.right.process(now);
                let mut handled = 0;
                // left changes first; one change, one emission
                while !self.out.is_full() {
                    let Some(ev) = self.left.poll_output(now) else {
                        break;
                    };
                    handled += 1;
                    if let Some(change) = change_of(&ev) {
                        self.react(change);
                    }
                }
                while !self.out.is_full() {
                    let Some(ev) = self.right.poll_output(now) else {
                        break;
                    };
                    handled += 1;
                    if let Some(change) = change_of(&ev) {
                        self.react(change);
                    }
                }
                handled
            }

            fn eof(&self) -> bool {
                self.out.is_empty() && self.left.eof() && self.right.eof()
            }

            fn queue_size(&self) -> usize {
                self.out.len()
            }

            fn next_event_time(&self) -> Option<i64> {
                self.out.next_event_time()
            }

            fn commit(&mut self, flush: bool) -> Result<()> {
                self.left.commit(flush)?;
                self.right.commit(flush)
            }

            fn punctuate(&mut self, now: i64) {
                self.left.punctuate(now);
                self.right.punctuate(now);
            }

            fn for_each_metric(&self, f: &mut dyn FnMut(&Metric)) {
                f(&self.in_count);
                self.left.for_each_metric(f);
                self.right.for_each_metric(f);
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
                self.left.init_metrics(ctx);
                self.right.init_metrics(ctx);
            }
        }

        impl<K, VL, VR, TL, TR> StreamSource<K, $out_v> for $name<K, VL, VR, TL, TR>
        where
            K: Clone,
            VL: Clone,
            VR: Clone,
            TL: MaterializedSource<K, VL>,
            TR: MaterializedSource<K, VR>,
        {
            fn poll_output(&mut self, now: i64) -> Option<Envelope<K, $out_v>> {
                self.out.pop_if_at_or_before(now)
            }
        }
    };
}

table_join_processor!(KtableLeftJoin, "ktable_left_join", (VL, Option<VR>));
table_join_processor!(KtableInnerJoin, "ktable_inner_join", (VL, VR));
table_join_processor!(KtableOuterJoin, "ktable_outer_join", (Option<VL>, Option<VR>));

impl<K, VL, VR, TL, TR> KtableLeftJoin<K, VL, VR, TL, TR>
where
    K: Clone,
    VL: Clone,
    VR: Clone,
    TL: MaterializedSource<K, VL>,
    TR: MaterializedSource<K, VR>,
{
    fn react(&mut self, change: Change<K>) {
        self.in_count.inc();
        let left = self.left.get(&change.key).and_then(Record::into_value);
        let right = self.right.get(&change.key).and_then(Record::into_value);
        let value = left.map(|l| (l, right));
        self.out.push(Envelope::new(
            Some(Arc::new(Record::new(change.key, value, change.event_time))),
            change.marker,
            change.partition_hash,
        ));
    }
}

impl<K, VL, VR, TL, TR> KtableInnerJoin<K, VL, VR, TL, TR>
where
    K: Clone,
    VL: Clone,
    VR: Clone,
    TL: MaterializedSource<K, VL>,
    TR: MaterializedSource<K, VR>,
{
    fn react(&mut self, change: Change<K>) {
        self.in_count.inc();
        let left = self.left.get(&change.key).and_then(Record::into_value);
        let right = self.right.get(&change.key).and_then(Record::into_value);
        let value = match (left, right) {
            (Some(l), Some(r)) => Some((l, r)),
            _ => None,
        };
        self.out.push(Envelope::new(
            Some(Arc::new(Record::new(change.key, value, change.event_time))),
            change.marker,
            change.partition_hash,
        ));
    }
}

impl<K, VL, VR, TL, TR> KtableOuterJoin<K, VL, VR, TL, TR>
where
    K: Clone,
    VL: Clone,
    VR: Clone,
    TL: MaterializedSource<K, VL>,
    TR: MaterializedSource<K, VR>,
{
    fn react(&mut self, change: Change<K>) {
        self.in_count.inc();
        let left = self.left.get(&change.key).and_then(Record::into_value);
        let right = self.right.get(&change.key).and_then(Record::into_value);
        let value = if left.is_some() || right.is_some() {
            Some((left, right))
        } else {
            None
        };
        self.out.push(Envelope::new(
            Some(Arc::new(Record::new(change.key, value, change.event_time))),
            change.marker,
            change.partition_hash,
        ));
    }
}
