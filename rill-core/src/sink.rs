//! Partition and topic sinks.
//!
//! A sink owns its upstream chain and a producer. It retains each
//! envelope's marker inside the producer's delivery callback, so the commit
//! chain only advances once the external log has acknowledged the record.
//! Backpressure: while the producer has too many records in flight, the
//! sink refuses to pull, and the pressure propagates up to the source.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use rill_log::{DeliveryCallback, LogProducer, StartOffset};

use crate::codec::Codec;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::hash::partition_hash;
use crate::metrics::{Metric, short_type_name};
use crate::processor::{Processor, StreamSource, stamp_metrics};
use crate::record::{Envelope, Record};
use crate::topology::AppContext;

/// How a topic sink picks a partition when the envelope does not dictate
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partitioner {
    /// MurmurHash2 of the encoded key.
    KeyHash,
    /// Rotate over partitions; the choice for void-key topics.
    RoundRobin,
}

/// Sink writing every record to one fixed partition.
pub struct LogSink<K, V, U, KC, VC> {
    upstream: U,
    producer: Box<dyn LogProducer>,
    key_codec: KC,
    value_codec: VC,
    partition: i32,
    max_outstanding: usize,
    flush_timeout: Duration,
    out_count: Metric,
    encode_errors: Metric,
    delivery_errors: Arc<Metric>,
    _types: std::marker::PhantomData<fn() -> (K, V)>,
}

impl<K, V, U, KC, VC> LogSink<K, V, U, KC, VC>
where
    U: StreamSource<K, V>,
    KC: Codec<K>,
    VC: Codec<V>,
{
    pub fn new(
        upstream: U,
        producer: Box<dyn LogProducer>,
        key_codec: KC,
        value_codec: VC,
        config: &RuntimeConfig,
    ) -> Self {
        let partition = upstream.partition();
        Self {
            upstream,
            producer,
            key_codec,
            value_codec,
            partition,
            max_outstanding: config.max_outstanding,
            flush_timeout: config.flush_timeout,
            out_count: Metric::counter("out_count"),
            encode_errors: Metric::counter("encode_errors"),
            delivery_errors: Arc::new(Metric::counter("delivery_errors")),
            _types: std::marker::PhantomData,
        }
    }

    fn forward(&mut self, ev: Envelope<K, V>, partition: i32) {
        let Some(record) = ev.record() else {
            return; // pure marker: dropping it is the completion
        };
        let Some((key_bytes, value_bytes)) = encode_payload(
            record,
            &self.key_codec,
            &self.value_codec,
            &self.encode_errors,
        ) else {
            return;
        };
        let marker = ev.marker().cloned();
        let errors = self.delivery_errors.clone();
        let on_delivery: DeliveryCallback = Box::new(move |ec| {
            if ec != 0 {
                errors.inc();
                if let Some(m) = &marker {
                    m.fail(ec);
                }
            }
        });
        match self.producer.produce(
            partition,
            key_bytes,
            value_bytes,
            record.event_time(),
            on_delivery,
        ) {
            Ok(()) => self.out_count.inc(),
            Err(e) => {
                tracing::warn!(topic = %self.producer.topic(), error = %e, "produce failed");
            }
        }
    }
}

/// Encode a record's key and value; a failure on either side counts and
/// drops the record so the chain keeps moving.
fn encode_payload<K, V, KC, VC>(
    record: &Record<K, V>,
    key_codec: &KC,
    value_codec: &VC,
    encode_errors: &Metric,
) -> Option<(Vec<u8>, Option<Vec<u8>>)>
where
    KC: Codec<K>,
    VC: Codec<V>,
{
    let mut key_bytes = Vec::new();
    if let Err(e) = key_codec.encode(record.key(), &mut key_bytes) {
        encode_errors.inc();
        tracing::warn!(error = %e, "key encode failed, dropping record");
        return None;
    }
    let value_bytes = match record.value() {
        Some(v) => {
            let mut bytes = Vec::new();
            if let Err(e) = value_codec.encode(v, &mut bytes) {
                encode_errors.inc();
                tracing::warn!(error = %e, "value encode failed, dropping record");
                return None;
            }
            Some(bytes)
        }
        None => None,
    };
    Some((key_bytes, value_bytes))
}

impl<K, V, U, KC, VC> Processor for LogSink<K, V, U, KC, VC>
where
    U: StreamSource<K, V>,
    KC: Codec<K>,
    VC: Codec<V>,
{
    fn kind(&self) -> &'static str {
        "log_sink"
    }

    fn name(&self) -> String {
        format!("log_sink({})", self.producer.topic())
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
        self.upstream.start(offset)
    }

    fn close(&mut self) {
        if let Err(e) = self.producer.flush(self.flush_timeout) {
            tracing::warn!(topic = %self.producer.topic(), error = %e, "flush on close failed");
        }
        self.upstream.close();
    }

    fn process(&mut self, now: i64) -> usize {
        if self.producer.outstanding() >= self.max_outstanding {
            return 0;
        }
        self.upstream.process(now);
        let mut handled = 0;
        while self.producer.outstanding() < self.max_outstanding {
            let Some(ev) = self.upstream.poll_output(now) else {
                break;
            };
            handled += 1;
            self.forward(ev, self.partition);
        }
        handled
    }

    fn eof(&self) -> bool {
        self.upstream.eof()
    }

    fn queue_size(&self) -> usize {
        self.producer.outstanding()
    }

    fn next_event_time(&self) -> Option<i64> {
        self.upstream.next_event_time()
    }

    fn commit(&mut self, flush: bool) -> Result<()> {
        self.upstream.commit(flush)
    }

    fn punctuate(&mut self, now: i64) {
        self.upstream.punctuate(now);
    }

    fn flush(&mut self) -> Result<()> {
        crate::processor::drain(self);
        self.punctuate(crate::now_ms());
        crate::processor::drain(self);
        self.producer.flush(self.flush_timeout).map_err(crate::error::Error::Log)?;
        self.commit(true)
    }

    fn for_each_metric(&self, f: &mut dyn FnMut(&Metric)) {
        f(&self.out_count);
        f(&self.encode_errors);
        f(&self.delivery_errors);
        self.upstream.for_each_metric(f);
    }

    fn init_metrics(&mut self, ctx: &AppContext) {
        stamp_metrics(
            &[&self.out_count, &self.encode_errors, &*self.delivery_errors],
            ctx,
            self.kind(),
            &self.key_type_name(),
            &self.value_type_name(),
            self.partition,
        );
        self.upstream.init_metrics(ctx);
    }
}

/// Topic-level sink fanning records out across the topic's partitions.
///
/// Partition choice: an explicit partition hash on the envelope wins;
/// otherwise the hash of the encoded key (or a round-robin counter for
/// void-key topics). The computed hash is cached back onto the envelope so
/// ordering stays stable across repartitioning.
pub struct TopicSink<K, V, U, KC, VC> {
    upstream: U,
    producer: Box<dyn LogProducer>,
    key_codec: KC,
    value_codec: VC,
    partitioner: Partitioner,
    round_robin: u32,
    max_outstanding: usize,
    flush_timeout: Duration,
    out_count: Metric,
    encode_errors: Metric,
    delivery_errors: Arc<Metric>,
    _types: std::marker::PhantomData<fn() -> (K, V)>,
}

impl<K, V, U, KC, VC> TopicSink<K, V, U, KC, VC>
where
    U: StreamSource<K, V>,
    KC: Codec<K>,
    VC: Codec<V>,
{
    pub fn new(
        upstream: U,
        producer: Box<dyn LogProducer>,
        key_codec: KC,
        value_codec: VC,
        partitioner: Partitioner,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            upstream,
            producer,
            key_codec,
            value_codec,
            partitioner,
            round_robin: 0,
            max_outstanding: config.max_outstanding,
            flush_timeout: config.flush_timeout,
            out_count: Metric::counter("out_count"),
            encode_errors: Metric::counter("encode_errors"),
            delivery_errors: Arc::new(Metric::counter("delivery_errors")),
            _types: std::marker::PhantomData,
        }
    }

    fn forward(&mut self, mut ev: Envelope<K, V>) {
        let Some(record) = ev.record().cloned() else {
            return;
        };
        let Some((key_bytes, value_bytes)) = encode_payload(
            &record,
            &self.key_codec,
            &self.value_codec,
            &self.encode_errors,
        ) else {
            return;
        };
        let hash = match ev.partition_hash() {
            Some(h) => h,
            None => {
                let h = match self.partitioner {
                    Partitioner::KeyHash => partition_hash(&key_bytes),
                    Partitioner::RoundRobin => {
                        let h = self.round_robin;
                        self.round_robin = self.round_robin.wrapping_add(1);
                        h
                    }
                };
                ev.set_partition_hash(h);
                h
            }
        };
        let partition = (hash % self.producer.partition_count() as u32) as i32;

        let marker = ev.marker().cloned();
        let errors = self.delivery_errors.clone();
        let on_delivery: DeliveryCallback = Box::new(move |ec| {
            if ec != 0 {
                errors.inc();
                if let Some(m) = &marker {
                    m.fail(ec);
                }
            }
        });
        match self.producer.produce(
            partition,
            key_bytes,
            value_bytes,
            record.event_time(),
            on_delivery,
        ) {
            Ok(()) => self.out_count.inc(),
            Err(e) => {
                tracing::warn!(topic = %self.producer.topic(), error = %e, "produce failed");
            }
        }
    }
}

impl<K, V, U, KC, VC> Processor for TopicSink<K, V, U, KC, VC>
where
    U: StreamSource<K, V>,
    KC: Codec<K>,
    VC: Codec<V>,
{
    fn kind(&self) -> &'static str {
        "topic_sink"
    }

    fn name(&self) -> String {
        format!("topic_sink({})", self.producer.topic())
    }

    fn key_type_name(&self) -> String {
        short_type_name::<K>()
    }

    fn value_type_name(&self) -> String {
        short_type_name::<V>()
    }

    fn partition(&self) -> i32 {
        // fans out across partitions; reports the upstream's pin
        self.upstream.partition()
    }

    fn start(&mut self, offset: StartOffset) -> Result<()> {
        self.upstream.start(offset)
    }

    fn close(&mut self) {
        if let Err(e) = self.producer.flush(self.flush_timeout) {
            tracing::warn!(topic = %self.producer.topic(), error = %e, "flush on close failed");
        }
        self.upstream.close();
    }

    fn process(&mut self, now: i64) -> usize {
        if self.producer.outstanding() >= self.max_outstanding {
            return 0;
        }
        self.upstream.process(now);
        let mut handled = 0;
        while self.producer.outstanding() < self.max_outstanding {
            let Some(ev) = self.upstream.poll_output(now) else {
                break;
            };
            handled += 1;
            self.forward(ev);
        }
        handled
    }

    fn eof(&self) -> bool {
        self.upstream.eof()
    }

    fn queue_size(&self) -> usize {
        self.producer.outstanding()
    }

    fn next_event_time(&self) -> Option<i64> {
        self.upstream.next_event_time()
    }

    fn commit(&mut self, flush: bool) -> Result<()> {
        self.upstream.commit(flush)
    }

    fn punctuate(&mut self, now: i64) {
        self.upstream.punctuate(now);
    }

    fn flush(&mut self) -> Result<()> {
        crate::processor::drain(self);
        self.punctuate(crate::now_ms());
        crate::processor::drain(self);
        self.producer.flush(self.flush_timeout).map_err(crate::error::Error::Log)?;
        self.commit(true)
    }

    fn for_each_metric(&self, f: &mut dyn FnMut(&Metric)) {
        f(&self.out_count);
        f(&self.encode_errors);
        f(&self.delivery_errors);
        self.upstream.for_each_metric(f);
    }

    fn init_metrics(&mut self, ctx: &AppContext) {
        stamp_metrics(
            &[&self.out_count, &self.encode_errors, &*self.delivery_errors],
            ctx,
            self.kind(),
            &self.key_type_name(),
            &self.value_type_name(),
            self.partition(),
        );
        self.upstream.init_metrics(ctx);
    }
}

/// Sink rendering records as text lines, one per record.
pub struct TextSink<K, V, U, KC, VC, W> {
    upstream: U,
    writer: W,
    key_codec: KC,
    value_codec: VC,
    out_count: Metric,
    _types: std::marker::PhantomData<fn() -> (K, V)>,
}

impl<K, V, U, KC, VC, W> TextSink<K, V, U, KC, VC, W>
where
    U: StreamSource<K, V>,
    KC: Codec<K>,
    VC: Codec<V>,
    W: Write,
{
    pub fn new(upstream: U, writer: W, key_codec: KC, value_codec: VC) -> Self {
        Self {
            upstream,
            writer,
            key_codec,
            value_codec,
            out_count: Metric::counter("out_count"),
            _types: std::marker::PhantomData,
        }
    }

    #[must_use]
    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn write_record(&mut self, record: &Record<K, V>) {
        let mut line = format!("ts: {}  ", record.event_time()).into_bytes();
        let mut key_bytes = Vec::new();
        if self.key_codec.encode(record.key(), &mut key_bytes).is_ok() {
            line.extend_from_slice(&key_bytes);
        }
        line.push(b':');
        match record.value() {
            Some(v) => {
                let mut value_bytes = Vec::new();
                if self.value_codec.encode(v, &mut value_bytes).is_ok() {
                    line.extend_from_slice(&value_bytes);
                }
            }
            None => line.extend_from_slice(b"<null>"),
        }
        line.push(b'\n');
        if let Err(e) = self.writer.write_all(&line) {
            tracing::warn!(error = %e, "text sink write failed");
        }
    }
}

impl<K, V, U, KC, VC, W> Processor for TextSink<K, V, U, KC, VC, W>
where
    U: StreamSource<K, V>,
    KC: Codec<K>,
    VC: Codec<V>,
    W: Write,
{
    fn kind(&self) -> &'static str {
        "text_sink"
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
        let _ = self.writer.flush();
        self.upstream.close();
    }

    fn process(&mut self, now: i64) -> usize {
        self.upstream.process(now);
        let mut handled = 0;
        while let Some(ev) = self.upstream.poll_output(now) {
            handled += 1;
            if let Some(record) = ev.record() {
                let record = record.clone();
                self.write_record(&record);
                self.out_count.inc();
            }
        }
        handled
    }

    fn eof(&self) -> bool {
        self.upstream.eof()
    }

    fn queue_size(&self) -> usize {
        0
    }

    fn next_event_time(&self) -> Option<i64> {
        self.upstream.next_event_time()
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

/// Sink gathering records into memory; the assertion end of most tests.
pub struct CollectSink<K, V, U> {
    upstream: U,
    records: Vec<Record<K, V>>,
}

impl<K, V, U> CollectSink<K, V, U>
where
    K: Clone,
    V: Clone,
    U: StreamSource<K, V>,
{
    pub fn new(upstream: U) -> Self {
        Self {
            upstream,
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn records(&self) -> &[Record<K, V>] {
        &self.records
    }

    pub fn take_records(&mut self) -> Vec<Record<K, V>> {
        std::mem::take(&mut self.records)
    }
}

impl<K, V, U> Processor for CollectSink<K, V, U>
where
    K: Clone,
    V: Clone,
    U: StreamSource<K, V>,
{
    fn kind(&self) -> &'static str {
        "collect_sink"
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
        while let Some(ev) = self.upstream.poll_output(now) {
            handled += 1;
            if let Some(record) = ev.record() {
                self.records.push(record.as_ref().clone());
            }
        }
        handled
    }

    fn eof(&self) -> bool {
        self.upstream.eof()
    }

    fn queue_size(&self) -> usize {
        0
    }

    fn next_event_time(&self) -> Option<i64> {
        self.upstream.next_event_time()
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
