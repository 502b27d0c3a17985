//! Partition source: external log messages in, envelopes out.

use rill_log::{LogConsumer, LogMessage, StartOffset};

use crate::codec::{Codec, CodecError};
use crate::commit::CommitChain;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::metrics::{Metric, short_type_name};
use crate::processor::{Processor, StreamSource, stamp_metrics};
use crate::queue::EventQueue;
use crate::record::{Envelope, Record};
use crate::topology::AppContext;

/// Converts one partition of an external log into a stream of envelopes,
/// allocating a commit marker per fetched offset.
///
/// A message that fails to decode is counted and skipped; its marker is
/// created and immediately released so the chain advances past the offset
/// (the message is consumed, just unusable).
pub struct LogSource<K, V, KC, VC> {
    consumer: Box<dyn LogConsumer>,
    key_codec: KC,
    value_codec: VC,
    chain: CommitChain,
    out: EventQueue<K, V>,
    topic: String,
    partition: i32,
    started: bool,
    in_count: Metric,
    decode_errors: Metric,
    chain_size: Metric,
    lag: Metric,
}

impl<K, V, KC, VC> LogSource<K, V, KC, VC>
where
    KC: Codec<K>,
    VC: Codec<V>,
{
    pub fn new(
        consumer: Box<dyn LogConsumer>,
        key_codec: KC,
        value_codec: VC,
        config: &RuntimeConfig,
    ) -> Self {
        let topic = consumer.topic().to_string();
        let partition = consumer.partition();
        Self {
            consumer,
            key_codec,
            value_codec,
            chain: CommitChain::new(),
            out: EventQueue::with_capacity(config.queue_capacity),
            topic,
            partition,
            started: false,
            in_count: Metric::counter("in_count"),
            decode_errors: Metric::counter("decode_errors"),
            chain_size: Metric::gauge("commit_chain_size"),
            lag: Metric::gauge("lag"),
        }
    }

    /// The commit chain owned by this source; sinks complete its markers.
    #[must_use]
    pub fn commit_chain(&self) -> &CommitChain {
        &self.chain
    }

    fn decode(&self, msg: &LogMessage) -> std::result::Result<Record<K, V>, CodecError> {
        let key = self.key_codec.decode_all(&msg.key)?;
        let value = match &msg.value {
            Some(bytes) => Some(self.value_codec.decode_all(bytes)?),
            None => None,
        };
        let event_time = msg.event_time.unwrap_or_else(crate::now_ms);
        Ok(Record::new(key, value, event_time))
    }
}

impl<K, V, KC, VC> Processor for LogSource<K, V, KC, VC>
where
    KC: Codec<K>,
    VC: Codec<V>,
{
    fn kind(&self) -> &'static str {
        "log_source"
    }

    fn name(&self) -> String {
        format!("log_source({})", self.topic)
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

    fn start(&mut self, offset: StartOffset) -> Result<()> {
        self.chain = CommitChain::new();
        self.out.clear();
        self.consumer.start(offset)?;
        self.started = true;
        Ok(())
    }

    fn close(&mut self) {
        if !self.started {
            return;
        }
        if let Err(e) = self.commit(true) {
            tracing::warn!(topic = %self.topic, error = %e, "final commit failed");
        }
        self.consumer.stop();
        self.started = false;
    }

    fn process(&mut self, now: i64) -> usize {
        if !self.started {
            return 0;
        }
        let mut handled = 0;
        while !self.out.is_full() {
            let Some(msg) = self.consumer.poll() else {
                break;
            };
            handled += 1;
            if let Some(t) = msg.event_time {
                self.lag.set(now - t);
            }
            match self.decode(&msg) {
                Ok(record) => {
                    let marker = self.chain.create(msg.offset);
                    self.out.push(Envelope::with_marker(record, marker));
                    self.in_count.inc();
                }
                Err(e) => {
                    self.decode_errors.inc();
                    tracing::warn!(
                        topic = %self.topic,
                        partition = self.partition,
                        offset = msg.offset,
                        error = %e,
                        "decode failed, skipping record"
                    );
                    // consumed but unusable: complete the offset right away
                    drop(self.chain.create(msg.offset));
                }
            }
        }
        self.chain_size.set(self.chain.len() as i64);
        handled
    }

    fn eof(&self) -> bool {
        !self.started || (self.out.is_empty() && self.consumer.eof())
    }

    fn queue_size(&self) -> usize {
        self.out.len()
    }

    fn next_event_time(&self) -> Option<i64> {
        self.out.next_event_time()
    }

    fn commit(&mut self, flush: bool) -> Result<()> {
        let last_good = self.chain.last_good_offset();
        if last_good >= 0 {
            self.consumer.commit(last_good + 1, flush)?;
        }
        Ok(())
    }

    fn for_each_metric(&self, f: &mut dyn FnMut(&Metric)) {
        f(&self.in_count);
        f(&self.decode_errors);
        f(&self.chain_size);
        f(&self.lag);
    }

    fn init_metrics(&mut self, ctx: &AppContext) {
        stamp_metrics(
            &[
                &self.in_count,
                &self.decode_errors,
                &self.chain_size,
                &self.lag,
            ],
            ctx,
            self.kind(),
            &self.key_type_name(),
            &self.value_type_name(),
            self.partition,
        );
    }
}

impl<K, V, KC, VC> StreamSource<K, V> for LogSource<K, V, KC, VC>
where
    KC: Codec<K>,
    VC: Codec<V>,
{
    fn poll_output(&mut self, now: i64) -> Option<Envelope<K, V>> {
        self.out.pop_if_at_or_before(now)
    }
}
