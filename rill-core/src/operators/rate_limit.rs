//! Keyed event-time rate limiter.

use std::hash::Hash;
use std::time::Duration;

use rill_log::StartOffset;

use crate::error::Result;
use crate::metrics::{Metric, short_type_name};
use crate::processor::{Processor, StreamSource, stamp_metrics};
use crate::queue::EventQueue;
use crate::record::Envelope;
use crate::stores::TokenBucket;
use crate::topology::AppContext;

/// Drops records that exceed a per-key rate of `capacity` tokens per
/// `window`. Judged by event time, so replays behave the same as live
/// traffic; within one key the surviving records are the first ones (FIFO).
pub struct RateLimiter<K, V, U> {
    upstream: U,
    bucket: TokenBucket<K>,
    out: EventQueue<K, V>,
    rate_dropped: Metric,
}

impl<K, V, U> RateLimiter<K, V, U>
where
    K: Hash + Eq + Clone,
    U: StreamSource<K, V>,
{
    pub fn new(upstream: U, window: Duration, capacity: usize) -> Self {
        Self {
            upstream,
            bucket: TokenBucket::new(window, capacity),
            out: EventQueue::new(),
            rate_dropped: Metric::counter("rate_dropped"),
        }
    }
}

impl<K, V, U> Processor for RateLimiter<K, V, U>
where
    K: Hash + Eq + Clone,
    U: StreamSource<K, V>,
{
    fn kind(&self) -> &'static str {
        "rate_limiter"
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
        if offset == StartOffset::Beginning {
            self.bucket.clear();
        }
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
                Some(r) => self.bucket.consume(r.key(), r.event_time()),
            };
            if keep {
                self.out.push(ev);
            } else {
                self.rate_dropped.inc();
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
        f(&self.rate_dropped);
        self.upstream.for_each_metric(f);
    }

    fn init_metrics(&mut self, ctx: &AppContext) {
        stamp_metrics(
            &[&self.rate_dropped],
            ctx,
            self.kind(),
            &self.key_type_name(),
            &self.value_type_name(),
            self.partition(),
        );
        self.upstream.init_metrics(ctx);
    }
}

impl<K, V, U> StreamSource<K, V> for RateLimiter<K, V, U>
where
    K: Hash + Eq + Clone,
    U: StreamSource<K, V>,
{
    fn poll_output(&mut self, now: i64) -> Option<Envelope<K, V>> {
        self.out.pop_if_at_or_before(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::testutil::FixedSource;

    #[test]
    fn keeps_the_first_records_per_key() {
        let t0 = 1_000;
        let evs = vec![
            Envelope::from_record(Record::new("a", Some(1), t0)),
            Envelope::from_record(Record::new("a", Some(2), t0)),
            Envelope::from_record(Record::new("a", Some(3), t0)),
            Envelope::from_record(Record::new("b", Some(4), t0)),
        ];
        let mut limiter =
            RateLimiter::new(FixedSource::new(evs), Duration::from_secs(1), 2);

        limiter.process(t0);
        let mut kept = Vec::new();
        while let Some(ev) = limiter.poll_output(t0) {
            kept.push(*ev.record().unwrap().value().unwrap());
        }
        // key "a" exceeds its budget of 2; key "b" is untouched
        assert_eq!(kept, vec![1, 2, 4]);

        let mut dropped = 0;
        limiter.for_each_metric(&mut |m| {
            if m.name() == "rate_dropped" {
                dropped = m.get();
            }
        });
        assert_eq!(dropped, 1);
    }

    #[test]
    fn budget_refills_with_event_time() {
        let t0 = 1_000;
        let evs = vec![
            Envelope::from_record(Record::new("a", Some(1), t0)),
            Envelope::from_record(Record::new("a", Some(2), t0)),
            Envelope::from_record(Record::new("a", Some(3), t0 + 1_000)),
        ];
        let mut limiter =
            RateLimiter::new(FixedSource::new(evs), Duration::from_millis(500), 1);

        limiter.process(t0 + 1_000);
        let mut kept = Vec::new();
        while let Some(ev) = limiter.poll_output(t0 + 1_000) {
            kept.push(*ev.record().unwrap().value().unwrap());
        }
        assert_eq!(kept, vec![1, 3]);
    }
}
