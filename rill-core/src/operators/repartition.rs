//! Repartition by a routing table.

use rill_log::StartOffset;

use crate::codec::Codec;
use crate::error::Result;
use crate::hash::partition_hash;
use crate::metrics::{Metric, short_type_name};
use crate::processor::{MaterializedSource, Processor, StreamSource, stamp_metrics};
use crate::queue::EventQueue;
use crate::record::{Envelope, Record};
use crate::topology::AppContext;

/// Reassigns each record's target partition by hashing the routing value
/// `table.get(key)` instead of the key itself. The payload and marker stay
/// untouched; only the envelope's cached partition hash is overwritten.
/// Records without a live route are dropped and counted.
pub struct Repartition<K, V, K2, U, T, C> {
    upstream: U,
    table: T,
    route_codec: C,
    out: EventQueue<K, V>,
    route_miss: Metric,
    _route: std::marker::PhantomData<fn() -> K2>,
}

impl<K, V, K2, U, T, C> Repartition<K, V, K2, U, T, C>
where
    K: Clone,
    K2: Clone,
    U: StreamSource<K, V>,
    T: MaterializedSource<K, K2>,
    C: Codec<K2>,
{
    pub fn new(upstream: U, table: T, route_codec: C) -> Self {
        Self {
            upstream,
            table,
            route_codec,
            out: EventQueue::new(),
            route_miss: Metric::counter("route_miss"),
            _route: std::marker::PhantomData,
        }
    }

    fn route_hash(&mut self, key: &K) -> Option<u32> {
        let route = self.table.get(key).and_then(Record::into_value)?;
        let mut bytes = Vec::new();
        if let Err(e) = self.route_codec.encode(&route, &mut bytes) {
            tracing::warn!(error = %e, "routing value encode failed");
            return None;
        }
        Some(partition_hash(&bytes))
    }
}

impl<K, V, K2, U, T, C> Processor for Repartition<K, V, K2, U, T, C>
where
    K: Clone,
    K2: Clone,
    U: StreamSource<K, V>,
    T: MaterializedSource<K, K2>,
    C: Codec<K2>,
{
    fn kind(&self) -> &'static str {
        "repartition"
    }

    fn key_type_name(&self) -> String {
        short_type_name::<K>()
    }

    fn value_type_name(&self) -> String {
        short_type_name::<V>()
    }

    fn partition(&self) -> i32 {
        self.upstream.partition()
    }

    fn start(&mut self, offset: StartOffset) -> Result<()> {
        self.upstream.start(offset)?;
        self.table.start(offset)
    }

    fn close(&mut self) {
        self.table.close();
        self.upstream.close();
    }

    fn process(&mut self, now: i64) -> usize {
        // routing table first, so routes are current for this tick
        self.table.process(now);
        while self.table.poll_output(now).is_some() {}
        if let Err(e) = self.table.commit(false) {
            tracing::warn!(error = %e, "routing table commit failed");
        }

        self.upstream.process(now);
        let mut handled = 0;
        while !self.out.is_full() {
            let Some(mut ev) = self.upstream.poll_output(now) else {
                break;
            };
            handled += 1;
            let Some(key) = ev.record().map(|r| r.key().clone()) else {
                self.out.push(ev); // pure markers flow through
                continue;
            };
            match self.route_hash(&key) {
                Some(hash) => {
                    ev.set_partition_hash(hash);
                    self.out.push(ev);
                }
                None => {
                    self.route_miss.inc();
                }
            }
        }
        handled
    }

    fn eof(&self) -> bool {
        self.out.is_empty() && self.upstream.eof() && self.table.eof()
    }

    fn queue_size(&self) -> usize {
        self.out.len()
    }

    fn next_event_time(&self) -> Option<i64> {
        self.out.next_event_time()
    }

    fn commit(&mut self, flush: bool) -> Result<()> {
        self.table.commit(flush)?;
        self.upstream.commit(flush)
    }

    fn punctuate(&mut self, now: i64) {
        self.upstream.punctuate(now);
        self.table.punctuate(now);
    }

    fn for_each_metric(&self, f: &mut dyn FnMut(&Metric)) {
        f(&self.route_miss);
        self.upstream.for_each_metric(f);
        self.table.for_each_metric(f);
    }

    fn init_metrics(&mut self, ctx: &AppContext) {
        stamp_metrics(
            &[&self.route_miss],
            ctx,
            self.kind(),
            &self.key_type_name(),
            &self.value_type_name(),
            self.partition(),
        );
        self.upstream.init_metrics(ctx);
        self.table.init_metrics(ctx);
    }
}

impl<K, V, K2, U, T, C> StreamSource<K, V> for Repartition<K, V, K2, U, T, C>
where
    K: Clone,
    K2: Clone,
    U: StreamSource<K, V>,
    T: MaterializedSource<K, K2>,
    C: Codec<K2>,
{
    fn poll_output(&mut self, now: i64) -> Option<Envelope<K, V>> {
        self.out.pop_if_at_or_before(now)
    }
}
