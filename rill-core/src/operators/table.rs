//! Materialized table.

use rill_log::StartOffset;

use crate::error::{Error, Result};
use crate::metrics::{Metric, short_type_name};
use crate::processor::{MaterializedSource, Processor, StreamSource, stamp_metrics};
use crate::queue::EventQueue;
use crate::record::{Envelope, Record};
use crate::stores::{NO_OFFSET, StateStore};
use crate::topology::AppContext;

/// Mirrors an update stream into a keyed state store, then forwards the
/// envelopes downstream.
///
/// On `start(Beginning)` the store is wiped; any other start resumes at the
/// store's persisted offset, and already-applied offsets replay downstream
/// without touching the store again.
///
/// A store failure is fatal: the table stops processing, reports EOF and
/// surfaces the error from `commit`, which closes the owning topology.
pub struct Ktable<K, V, U, S> {
    upstream: U,
    store: S,
    out: EventQueue<K, V>,
    applied: Metric,
    fatal: Option<String>,
}

impl<K, V, U, S> Ktable<K, V, U, S>
where
    K: Clone,
    V: Clone,
    U: StreamSource<K, V>,
    S: StateStore<K, V>,
{
    pub fn new(upstream: U, store: S) -> Self {
        Self {
            upstream,
            store,
            out: EventQueue::new(),
            applied: Metric::counter("applied"),
            fatal: None,
        }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    fn fail(&mut self, e: &dyn std::fmt::Display) {
        tracing::error!(error = %e, "state store failure, table is dead");
        self.fatal = Some(e.to_string());
    }
}

impl<K, V, U, S> Processor for Ktable<K, V, U, S>
where
    K: Clone,
    V: Clone,
    U: StreamSource<K, V>,
    S: StateStore<K, V>,
{
    fn kind(&self) -> &'static str {
        "ktable"
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
        self.fatal = None;
        self.out.clear();
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
            if let Some(record) = ev.record() {
                let offset = ev.offset().unwrap_or(NO_OFFSET);
                let replay = offset >= 0 && offset <= self.store.offset();
                if !replay {
                    let record = record.as_ref().clone();
                    if let Err(e) = self.store.insert(record, offset) {
                        self.fail(&e);
                        return handled;
                    }
                    self.applied.inc();
                }
            }
            self.out.push(ev);
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
    }

    fn for_each_metric(&self, f: &mut dyn FnMut(&Metric)) {
        f(&self.applied);
        self.upstream.for_each_metric(f);
    }

    fn init_metrics(&mut self, ctx: &AppContext) {
        stamp_metrics(
            &[&self.applied],
            ctx,
            self.kind(),
            &self.key_type_name(),
            &self.value_type_name(),
            self.partition(),
        );
        self.upstream.init_metrics(ctx);
    }
}

impl<K, V, U, S> StreamSource<K, V> for Ktable<K, V, U, S>
where
    K: Clone,
    V: Clone,
    U: StreamSource<K, V>,
    S: StateStore<K, V>,
{
    fn poll_output(&mut self, now: i64) -> Option<Envelope<K, V>> {
        self.out.pop_if_at_or_before(now)
    }
}

impl<K, V, U, S> MaterializedSource<K, V> for Ktable<K, V, U, S>
where
    K: Clone,
    V: Clone,
    U: StreamSource<K, V>,
    S: StateStore<K, V>,
{
    fn get(&self, key: &K) -> Option<Record<K, V>> {
        self.store.get(key)
    }

    fn for_each_entry(&self, f: &mut dyn FnMut(&Record<K, V>)) {
        self.store.for_each(f);
    }

    fn entry_count(&self) -> usize {
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TextCodec;
    use crate::commit::CommitChain;
    use crate::stores::MemKv;
    use crate::testutil::FixedSource;

    type TestTable = Ktable<
        String,
        String,
        FixedSource<String, String>,
        MemKv<String, String, TextCodec, TextCodec>,
    >;

    fn table_over(evs: Vec<Envelope<String, String>>) -> TestTable {
        Ktable::new(
            FixedSource::new(evs),
            MemKv::in_memory(TextCodec, TextCodec),
        )
    }

    fn upsert(k: &str, v: &str, t: i64) -> Envelope<String, String> {
        Envelope::from_record(Record::new(k.to_string(), Some(v.to_string()), t))
    }

    #[test]
    fn applies_updates_and_serves_gets() {
        let mut table = table_over(vec![
            upsert("1", "a@x", 10),
            upsert("2", "b@y", 20),
            upsert("1", "a@z", 30),
        ]);
        table.process(100);

        assert_eq!(
            table
                .get(&"1".to_string())
                .unwrap()
                .value()
                .map(String::as_str),
            Some("a@z")
        );
        assert_eq!(table.entry_count(), 2);
    }

    #[test]
    fn tombstones_remove_and_get_returns_none() {
        let mut table = table_over(vec![
            upsert("k", "v", 10),
            Envelope::from_record(Record::tombstone("k".to_string(), 20)),
        ]);
        table.process(100);
        assert!(table.get(&"k".to_string()).is_none());
    }

    #[test]
    fn forwards_updates_downstream() {
        let mut table = table_over(vec![upsert("k", "v", 10)]);
        table.process(100);
        let ev = table.poll_output(100).unwrap();
        assert_eq!(ev.record().unwrap().value().map(String::as_str), Some("v"));
        assert!(table.poll_output(100).is_none());
    }

    #[test]
    fn start_from_beginning_wipes_the_store() {
        let mut table = table_over(vec![upsert("k", "v", 10)]);
        table.process(100);
        assert_eq!(table.entry_count(), 1);
        table.start(StartOffset::Beginning).unwrap();
        assert_eq!(table.entry_count(), 0);
    }

    #[test]
    fn persistent_table_resumes_from_its_store_offset() {
        use crate::stores::OrderedKv;

        let dir = tempfile::tempdir().unwrap();
        {
            let store = OrderedKv::open(dir.path(), TextCodec, TextCodec).unwrap();
            let source = FixedSource::new(vec![]);
            let mut table = Ktable::new(source, store);
            // apply offsets 0 and 1, then persist
            for (i, (k, v)) in [("a", "1"), ("b", "2")].iter().enumerate() {
                table
                    .store
                    .insert(
                        Record::new(k.to_string(), Some(v.to_string()), 10 + i as i64),
                        i as i64,
                    )
                    .unwrap();
            }
            table.commit(true).unwrap();
        }

        let store =
            OrderedKv::<String, String, _, _>::open(dir.path(), TextCodec, TextCodec).unwrap();
        assert_eq!(store.offset(), 1);
        let source = FixedSource::new(vec![]);
        let mut table = Ktable::new(source, store);
        table.start(StartOffset::Stored).unwrap();
        assert_eq!(table.entry_count(), 2);
        assert_eq!(
            table
                .get(&"b".to_string())
                .unwrap()
                .value()
                .map(String::as_str),
            Some("2")
        );
    }

    #[test]
    fn replayed_offsets_forward_but_do_not_reapply() {
        let chain = CommitChain::new();
        let mut source = FixedSource::new(vec![]);
        source.push(Envelope::with_marker(
            Record::new("k".to_string(), Some("old".to_string()), 1),
            chain.create(5),
        ));
        let mut store = MemKv::in_memory(TextCodec, TextCodec);
        store
            .insert(Record::new("k".to_string(), Some("current".to_string()), 9), 7)
            .unwrap();
        let mut table = Ktable::new(source, store);

        table.process(100);
        // offset 5 <= stored offset 7: downstream sees it, the store does not
        assert!(table.poll_output(100).is_some());
        assert_eq!(
            table
                .get(&"k".to_string())
                .unwrap()
                .value()
                .map(String::as_str),
            Some("current")
        );
    }
}
