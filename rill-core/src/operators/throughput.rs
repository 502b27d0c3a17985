//! Processing-time throughput limiter.

use std::time::Duration;

use rill_log::StartOffset;

use crate::error::Result;
use crate::metrics::{Metric, short_type_name};
use crate::processor::{Processor, StreamSource, stamp_metrics};
use crate::queue::EventQueue;
use crate::record::Envelope;
use crate::stores::TokenBucket;
use crate::topology::AppContext;

/// Gates forwarding on a single token bucket (capacity 1, refill
/// `rate_per_sec`). When no token is available the envelope stays queued
/// and downstream sees nothing, so nothing is ever dropped - just delayed.
pub struct ThroughputLimiter<K, V, U> {
    upstream: U,
    bucket: TokenBucket<()>,
    pending: EventQueue<K, V>,
    out_count: Metric,
}

impl<K, V, U> ThroughputLimiter<K, V, U>
where
    U: StreamSource<K, V>,
{
    pub fn new(upstream: U, rate_per_sec: f64) -> Self {
        let fill_ms = (1000.0 / rate_per_sec.max(f64::MIN_POSITIVE)).ceil() as u64;
        Self {
            upstream,
            bucket: TokenBucket::new(Duration::from_millis(fill_ms.max(1)), 1),
            pending: EventQueue::new(),
            out_count: Metric::counter("out_count"),
        }
    }
}

impl<K, V, U> Processor for ThroughputLimiter<K, V, U>
where
    U: StreamSource<K, V>,
{
    fn kind(&self) -> &'static str {
        "throughput_limiter"
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
        while !self.pending.is_full() {
            let Some(ev) = self.upstream.poll_output(now) else {
                break;
            };
            handled += 1;
            self.pending.push(ev);
        }
        handled
    }

    fn eof(&self) -> bool {
        self.pending.is_empty() && self.upstream.eof()
    }

    fn queue_size(&self) -> usize {
        self.pending.len()
    }

    fn next_event_time(&self) -> Option<i64> {
        self.pending.next_event_time()
    }

    fn commit(&mut self, flush: bool) -> Result<()> {
        self.upstream.commit(flush)
    }

    fn punctuate(&mut self, now: i64) {
        self.upstream.punctuate(now);
    }

    fn for_each_metric(&self, f: &mut dyn FnMut(&Metric)) {
        f(&self.out_count);
        self.upstream.for_each_metric(f);
    }

    fn init_metrics(&mut self, ctx: &AppContext) {
        stamp_metrics(
            &[&self.out_count],
            ctx,
            self.kind(),
            &self.key_type_name(),
            &self.value_type_name(),
            self.partition(),
        );
        self.upstream.init_metrics(ctx);
    }
}

impl<K, V, U> StreamSource<K, V> for ThroughputLimiter<K, V, U>
where
    U: StreamSource<K, V>,
{
    fn poll_output(&mut self, now: i64) -> Option<Envelope<K, V>> {
        // rate limiting is by processing time: `now` both gates the event
        // and ages the bucket
        let ready = self
            .pending
            .next_event_time()
            .is_some_and(|t| t <= now);
        if ready && self.bucket.consume(&(), now) {
            self.out_count.inc();
            self.pending.pop()
        } else {
            None
        }
    }
}
