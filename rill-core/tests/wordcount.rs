//! End-to-end word count: log -> flat_map -> count_by_key -> collect.

use rill_core::operators::{CountByKey, Emitter, FlatMap};
use rill_core::stores::MemCounter;
use rill_core::{
    CollectSink, LogSource, Processor, Record, RuntimeConfig, StartOffset, TextCodec,
};
use rill_log::MemoryBroker;

#[test]
fn word_count_over_the_log() {
    let broker = MemoryBroker::new();
    broker.create_topic("lines", 1);
    let t0 = 1_700_000_000_000;
    for (line, t) in [
        ("hello world", t0),
        ("hello", t0 + 1),
        ("world world", t0 + 2),
    ] {
        broker
            .append("lines", 0, Vec::new(), Some(line.as_bytes().to_vec()), t)
            .unwrap();
    }

    let source: LogSource<(), String, TextCodec, TextCodec> = LogSource::new(
        Box::new(broker.consumer("wc", "lines", 0).unwrap()),
        TextCodec,
        TextCodec,
        &RuntimeConfig::default(),
    );
    let words = FlatMap::new(
        source,
        |r: &Record<(), String>, out: &mut Emitter<String, ()>| {
            if let Some(line) = r.value() {
                for word in line.split_whitespace() {
                    out.emit(Record::new(word.to_string(), Some(()), r.event_time()));
                }
            }
        },
    );
    let counts = CountByKey::new(words, MemCounter::in_memory(TextCodec), 1_000);
    let mut sink = CollectSink::new(counts);

    sink.start(StartOffset::Beginning).unwrap();
    sink.flush().unwrap();

    let mut out: Vec<_> = sink
        .take_records()
        .into_iter()
        .map(|r| (r.key().clone(), *r.value().unwrap(), r.event_time()))
        .collect();
    out.sort();
    assert_eq!(
        out,
        vec![
            ("hello".to_string(), 2, t0),
            ("world".to_string(), 3, t0),
        ]
    );

    // every source offset completed, so the consumer position moved past all
    // three lines
    assert_eq!(broker.stored_offset("wc", "lines", 0), Some(3));
}

#[test]
fn word_count_punctuates_on_event_time_boundaries() {
    let broker = MemoryBroker::new();
    broker.create_topic("lines", 1);
    let t0 = 1_700_000_000_000;
    // two windows: words at t0.., then one record a full second later
    broker
        .append("lines", 0, Vec::new(), Some(b"alpha beta".to_vec()), t0)
        .unwrap();
    broker
        .append("lines", 0, Vec::new(), Some(b"alpha".to_vec()), t0 + 1_000)
        .unwrap();

    let source: LogSource<(), String, TextCodec, TextCodec> = LogSource::new(
        Box::new(broker.consumer("wc", "lines", 0).unwrap()),
        TextCodec,
        TextCodec,
        &RuntimeConfig::default(),
    );
    let words = FlatMap::new(
        source,
        |r: &Record<(), String>, out: &mut Emitter<String, ()>| {
            if let Some(line) = r.value() {
                for word in line.split_whitespace() {
                    out.emit(Record::new(word.to_string(), Some(()), r.event_time()));
                }
            }
        },
    );
    let counts = CountByKey::new(words, MemCounter::in_memory(TextCodec), 1_000);
    let mut sink = CollectSink::new(counts);

    sink.start(StartOffset::Beginning).unwrap();
    // everything below t0 + 1s flows in without triggering a punctuation
    sink.process(t0 + 999);
    assert!(sink.records().is_empty());

    // the second line crosses the boundary: the first window emits, stamped
    // at its start
    sink.process(t0 + 1_000);
    let mut first_window: Vec<_> = sink
        .take_records()
        .into_iter()
        .map(|r| (r.key().clone(), *r.value().unwrap(), r.event_time()))
        .collect();
    first_window.sort();
    assert_eq!(
        first_window,
        vec![
            ("alpha".to_string(), 1, t0),
            ("beta".to_string(), 1, t0),
        ]
    );
}
