//! Identity operator, kept for topology surgery.

use rill_log::StartOffset;

use crate::error::Result;
use crate::metrics::{Metric, short_type_name};
use crate::processor::{Processor, StreamSource};
use crate::queue::EventQueue;
use crate::record::Envelope;
use crate::topology::AppContext;

/// Forwards everything unchanged.
pub struct Pipe<K, V, U> {
    upstream: U,
    out: EventQueue<K, V>,
}

impl<K, V, U> Pipe<K, V, U>
where
    U: StreamSource<K, V>,
{
    pub fn new(upstream: U) -> Self {
        Self {
            upstream,
            out: EventQueue::new(),
        }
    }
}

impl<K, V, U> Processor for Pipe<K, V, U>
where
    U: StreamSource<K, V>,
{
    fn kind(&self) -> &'static str {
        "pipe"
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
            self.out.push(ev);
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
        self.upstream.for_each_metric(f);
    }

    fn init_metrics(&mut self, ctx: &AppContext) {
        self.upstream.init_metrics(ctx);
    }
}

impl<K, V, U> StreamSource<K, V> for Pipe<K, V, U>
where
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
    fn forwards_unchanged() {
        let source = FixedSource::new(vec![
            Envelope::from_record(Record::new("a", Some(1), 1)),
            Envelope::from_record(Record::new("b", Some(2), 2)),
        ]);
        let mut pipe = Pipe::new(source);
        assert_eq!(pipe.process(100), 2);
        assert_eq!(pipe.queue_size(), 2);
        assert_eq!(
            *pipe.poll_output(100).unwrap().record().unwrap().key(),
            "a"
        );
        assert_eq!(
            *pipe.poll_output(100).unwrap().record().unwrap().key(),
            "b"
        );
        assert!(pipe.eof());
    }
}
