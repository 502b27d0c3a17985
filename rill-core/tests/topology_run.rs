//! Topology-level flows: graph ownership, metric tagging, topic fan-out
//! and repartitioning.

use rill_core::codec::TextCodec;
use rill_core::operators::{Filter, Ktable, Repartition};
use rill_core::stores::MemKv;
use rill_core::{
    LogSink, LogSource, Partitioner, Processor, Record, RuntimeConfig, StartOffset, TopicSink,
    TopologyBuilder,
};
use rill_log::MemoryBroker;

fn append_str(broker: &MemoryBroker, topic: &str, key: &str, value: &str, t: i64) {
    broker
        .append(
            topic,
            0,
            key.as_bytes().to_vec(),
            Some(value.as_bytes().to_vec()),
            t,
        )
        .unwrap();
}

#[test]
fn topology_drives_a_filter_chain_end_to_end() {
    let broker = MemoryBroker::new();
    broker.create_topic("in", 1);
    broker.create_topic("out", 1);
    for i in 0..6 {
        append_str(&broker, "in", &format!("k{i}"), &i.to_string(), i);
    }

    let mut builder = TopologyBuilder::new("filter-app", "test-1", RuntimeConfig::default());
    let mut topology = builder.create_topology();

    let source: LogSource<String, i64, TextCodec, TextCodec> = LogSource::new(
        Box::new(broker.consumer("filter", "in", 0).unwrap()),
        TextCodec,
        TextCodec,
        topology.config(),
    );
    let evens = Filter::new(source, |r: &Record<String, i64>| {
        r.value().is_some_and(|v| v % 2 == 0)
    });
    let sink = LogSink::new(
        evens,
        Box::new(broker.producer("out").unwrap()),
        TextCodec,
        TextCodec,
        topology.config(),
    );
    topology.add(sink);

    topology.start(StartOffset::Beginning).unwrap();
    topology.flush().unwrap();

    assert_eq!(broker.watermarks("out", 0).unwrap(), (0, 3));
    // offsets advance past everything, dropped records included
    assert_eq!(broker.stored_offset("filter", "in", 0), Some(6));

    let mut names = Vec::new();
    topology.for_each_metric(&mut |m| names.push(m.logged_name()));
    let predicate_false = names
        .iter()
        .find(|n| n.starts_with("predicate_false"))
        .expect("filter metric");
    assert!(predicate_false.contains("app_id=filter-app"));
    assert!(predicate_false.contains("processor=filter"));
    assert!(predicate_false.contains("partition=0"));
    assert!(predicate_false.contains("topology=topology-0"));

    topology.close();
    assert!(topology.is_closed());
}

#[test]
fn topic_sink_spreads_keys_across_partitions() {
    let broker = MemoryBroker::new();
    broker.create_topic("in", 1);
    broker.create_topic("out", 8);
    for i in 0..64 {
        append_str(&broker, "in", &format!("user-{i}"), "x", i);
    }

    let config = RuntimeConfig::default();
    let source: LogSource<String, String, TextCodec, TextCodec> = LogSource::new(
        Box::new(broker.consumer("spread", "in", 0).unwrap()),
        TextCodec,
        TextCodec,
        &config,
    );
    let mut sink = TopicSink::new(
        source,
        Box::new(broker.producer("out").unwrap()),
        TextCodec,
        TextCodec,
        Partitioner::KeyHash,
        &config,
    );
    sink.start(StartOffset::Beginning).unwrap();
    sink.flush().unwrap();

    let mut nonempty = 0;
    let mut total = 0;
    for p in 0..8 {
        let (_, high) = broker.watermarks("out", p).unwrap();
        total += high;
        if high > 0 {
            nonempty += 1;
        }
    }
    assert_eq!(total, 64);
    assert!(nonempty > 1, "hashing should hit more than one partition");
}

#[test]
fn repartition_routes_by_table_value() {
    let broker = MemoryBroker::new();
    broker.create_topic("usernames", 1);
    broker.create_topic("user_channel", 1);
    broker.create_topic("by_channel", 4);

    for i in 0..8 {
        broker
            .append(
                "usernames",
                0,
                i.to_string().into_bytes(),
                Some(format!("user_{i}").into_bytes()),
                i,
            )
            .unwrap();
        // users 0..4 route to channel 1, the rest to channel 2
        broker
            .append(
                "user_channel",
                0,
                i.to_string().into_bytes(),
                Some(if i < 4 { b"1".to_vec() } else { b"2".to_vec() }),
                i,
            )
            .unwrap();
    }

    let config = RuntimeConfig::default();
    let names: LogSource<i32, String, TextCodec, TextCodec> = LogSource::new(
        Box::new(broker.consumer("rp", "usernames", 0).unwrap()),
        TextCodec,
        TextCodec,
        &config,
    );
    let routes: LogSource<i32, i32, TextCodec, TextCodec> = LogSource::new(
        Box::new(broker.consumer("rp", "user_channel", 0).unwrap()),
        TextCodec,
        TextCodec,
        &config,
    );
    let routing_table = Ktable::new(routes, MemKv::in_memory(TextCodec, TextCodec));
    let repartitioned = Repartition::new(names, routing_table, TextCodec);
    let mut sink = TopicSink::new(
        repartitioned,
        Box::new(broker.producer("by_channel").unwrap()),
        TextCodec,
        TextCodec,
        Partitioner::KeyHash,
        &config,
    );
    sink.start(StartOffset::Beginning).unwrap();
    sink.flush().unwrap();

    // users sharing a channel land on the same partition
    let mut per_partition = Vec::new();
    for p in 0..4 {
        let (_, high) = broker.watermarks("by_channel", p).unwrap();
        if high > 0 {
            per_partition.push(high);
        }
    }
    per_partition.sort();
    assert_eq!(per_partition.iter().sum::<i64>(), 8);
    assert!(per_partition.len() <= 2, "only two channels were routed");
}
