//! Stream-table enrichment and table-table tombstone propagation over the
//! in-process broker.

use rill_core::codec::TextCodec;
use rill_core::operators::{Ktable, KtableOuterJoin, StreamInnerJoin, StreamLeftJoin};
use rill_core::stores::MemKv;
use rill_core::{CollectSink, LogSource, Processor, RuntimeConfig, StartOffset};
use rill_log::MemoryBroker;

type Source = LogSource<i32, String, TextCodec, TextCodec>;
type Table = Ktable<i32, String, Source, MemKv<i32, String, TextCodec, TextCodec>>;

fn source(broker: &MemoryBroker, group: &str, topic: &str) -> Source {
    LogSource::new(
        Box::new(broker.consumer(group, topic, 0).unwrap()),
        TextCodec,
        TextCodec,
        &RuntimeConfig::default(),
    )
}

fn table(broker: &MemoryBroker, group: &str, topic: &str) -> Table {
    Ktable::new(
        source(broker, group, topic),
        MemKv::in_memory(TextCodec, TextCodec),
    )
}

fn append(broker: &MemoryBroker, topic: &str, key: i32, value: Option<&str>, t: i64) {
    broker
        .append(
            topic,
            0,
            key.to_string().into_bytes(),
            value.map(|v| v.as_bytes().to_vec()),
            t,
        )
        .unwrap();
}

fn seed_enrichment(broker: &MemoryBroker) {
    broker.create_topic("users", 1);
    broker.create_topic("views", 1);
    append(broker, "users", 1, Some("a@x"), 1);
    append(broker, "users", 2, Some("b@y"), 2);
    append(broker, "views", 1, Some("/home"), 10);
    append(broker, "views", 2, Some("/profile"), 11);
    append(broker, "views", 3, Some("/root"), 12);
}

#[test]
fn stream_left_join_enriches_views_with_users() {
    let broker = MemoryBroker::new();
    seed_enrichment(&broker);

    let join = StreamLeftJoin::new(
        source(&broker, "enrich", "views"),
        table(&broker, "enrich", "users"),
    );
    let mut sink = CollectSink::new(join);
    sink.start(StartOffset::Beginning).unwrap();
    sink.flush().unwrap();

    let out: Vec<_> = sink
        .take_records()
        .into_iter()
        .map(|r| (*r.key(), r.value().unwrap().clone(), r.event_time()))
        .collect();
    assert_eq!(
        out,
        vec![
            (1, ("/home".to_string(), Some("a@x".to_string())), 10),
            (2, ("/profile".to_string(), Some("b@y".to_string())), 11),
            (3, ("/root".to_string(), None), 12),
        ]
    );
}

#[test]
fn stream_inner_join_drops_unmatched_views() {
    let broker = MemoryBroker::new();
    seed_enrichment(&broker);

    let join = StreamInnerJoin::new(
        source(&broker, "enrich", "views"),
        table(&broker, "enrich", "users"),
    );
    let mut sink = CollectSink::new(join);
    sink.start(StartOffset::Beginning).unwrap();
    sink.flush().unwrap();

    let keys: Vec<_> = sink.take_records().iter().map(|r| *r.key()).collect();
    assert_eq!(keys, vec![1, 2]);
}

#[test]
fn outer_join_propagates_tombstones() {
    let broker = MemoryBroker::new();
    broker.create_topic("left", 1);
    broker.create_topic("right", 1);
    append(&broker, "left", 1, Some("L1"), 1);
    append(&broker, "right", 1, Some("R1"), 2);
    append(&broker, "right", 2, Some("R2"), 3);
    // later: right key 1 dies, then left key 1
    append(&broker, "right", 1, None, 10);
    append(&broker, "left", 1, None, 20);

    let join = KtableOuterJoin::new(
        table(&broker, "oj", "left"),
        table(&broker, "oj", "right"),
    );
    let mut sink = CollectSink::new(join);
    sink.start(StartOffset::Beginning).unwrap();

    // phase 1: initial rows only
    for _ in 0..4 {
        sink.process(3);
    }
    let initial = sink.take_records().len();
    assert_eq!(initial, 3);

    // phase 2: right key 1 tombstoned, left side survives
    for _ in 0..4 {
        sink.process(10);
    }
    let phase2 = sink.take_records();
    assert_eq!(phase2.len(), 1);
    assert_eq!(*phase2[0].key(), 1);
    assert_eq!(
        phase2[0].value(),
        Some(&(Some("L1".to_string()), None::<String>))
    );

    // phase 3: left key 1 tombstoned too, the join emits a tombstone
    for _ in 0..4 {
        sink.process(20);
    }
    let phase3 = sink.take_records();
    assert_eq!(phase3.len(), 1);
    assert_eq!(*phase3[0].key(), 1);
    assert!(phase3[0].is_tombstone());
}
