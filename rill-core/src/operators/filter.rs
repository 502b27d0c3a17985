//! Predicate filter.

use rill_log::StartOffset;

use crate::error::Result;
use crate::metrics::{Metric, short_type_name};
use crate::processor::{Processor, StreamSource, stamp_metrics};
use crate::queue::EventQueue;
use crate::record::{Envelope, Record};
use crate::topology::AppContext;

/// Forwards records the predicate accepts; pure commit markers pass
/// through untouched.
pub struct Filter<K, V, U, F> {
    upstream: U,
    predicate: F,
    out: EventQueue<K, V>,
    predicate_false: Metric,
}

impl<K, V, U, F> Filter<K, V, U, F>
where
    U: StreamSource<K, V>,
    F: FnMut(&Record<K, V>) -> bool,
{
    pub fn new(upstream: U, predicate: F) -> Self {
        Self {
            upstream,
            predicate,
            out: EventQueue::new(),
            predicate_false: Metric::counter("predicate_false"),
        }
    }
}

impl<K, V, U, F> Processor for Filter<K, V, U, F>
where
    U: StreamSource<K, V>,
    F: FnMut(&Record<K, V>) -> bool,
{
    fn kind(&self) -> &'static str {
        "filter"
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
            let keep = match ev.record() {
                None => true,
                Some(r) => (self.predicate)(r),
            };
            if keep {
                self.out.push(ev);
            } else {
                self.predicate_false.inc();
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
        f(&self.predicate_false);
        self.upstream.for_each_metric(f);
    }

    fn init_metrics(&mut self, ctx: &AppContext) {
        stamp_metrics(
            &[&self.predicate_false],
            ctx,
            self.kind(),
            &self.key_type_name(),
            &self.value_type_name(),
            self.partition(),
        );
        self.upstream.init_metrics(ctx);
    }
}

impl<K, V, U, F> StreamSource<K, V> for Filter<K, V, U, F>
where
    U: StreamSource<K, V>,
    F: FnMut(&Record<K, V>) -> bool,
{
    fn poll_output(&mut self, now: i64) -> Option<Envelope<K, V>> {
        self.out.pop_if_at_or_before(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::CommitChain;
    use crate::testutil::FixedSource;

    #[test]
    fn drops_records_failing_the_predicate() {
        let source = FixedSource::new(vec![
            Envelope::from_record(Record::new("a", Some(1), 1)),
            Envelope::from_record(Record::new("b", Some(2), 2)),
            Envelope::from_record(Record::new("c", Some(3), 3)),
        ]);
        let mut filter = Filter::new(source, |r: &Record<&str, i32>| {
            r.value().is_some_and(|v| v % 2 == 1)
        });

        filter.process(100);
        let mut keys = Vec::new();
        while let Some(ev) = filter.poll_output(100) {
            keys.push(*ev.record().unwrap().key());
        }
        assert_eq!(keys, vec!["a", "c"]);

        let mut dropped = 0;
        filter.for_each_metric(&mut |m| {
            if m.name() == "predicate_false" {
                dropped = m.get();
            }
        });
        assert_eq!(dropped, 1);
    }

    #[test]
    fn pure_markers_pass_through() {
        let chain = CommitChain::new();
        let source = FixedSource::new(vec![Envelope::<&str, i32>::marker_only(chain.create(0))]);
        let mut filter = Filter::new(source, |_: &Record<&str, i32>| false);

        filter.process(100);
        let ev = filter.poll_output(100).unwrap();
        assert!(ev.record().is_none());
        assert_eq!(ev.offset(), Some(0));
    }

    #[test]
    fn dropped_record_completes_its_marker() {
        let chain = CommitChain::new();
        let source = FixedSource::new(vec![Envelope::with_marker(
            Record::new("a", Some(2), 1),
            chain.create(0),
        )]);
        let mut filter = Filter::new(source, |r: &Record<&str, i32>| {
            r.value().is_some_and(|v| v % 2 == 1)
        });

        filter.process(100);
        assert!(filter.poll_output(100).is_none());
        assert_eq!(chain.last_good_offset(), 0);
    }
}
