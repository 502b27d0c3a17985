//! A partition source fed by the background fetch thread.

use std::time::{Duration, Instant};

use rill_core::codec::TextCodec;
use rill_core::{CollectSink, LogSource, Processor, RuntimeConfig, StartOffset};
use rill_log::{BackgroundConsumer, MemoryBroker};

#[test]
fn source_over_a_background_fetcher() {
    let broker = MemoryBroker::new();
    broker.create_topic("events", 1);
    for i in 0..200 {
        broker
            .append(
                "events",
                0,
                format!("k{i}").into_bytes(),
                Some(format!("v{i}").into_bytes()),
                i,
            )
            .unwrap();
    }

    let config = RuntimeConfig::default();
    let inner = broker.consumer("bg", "events", 0).unwrap();
    let fetcher = BackgroundConsumer::new(Box::new(inner), config.fetch_queue_capacity);
    let source: LogSource<String, String, TextCodec, TextCodec> =
        LogSource::new(Box::new(fetcher), TextCodec, TextCodec, &config);
    let mut sink = CollectSink::new(source);

    sink.start(StartOffset::Beginning).unwrap();

    // cooperative ticks until the fetch thread has handed everything over
    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.records().len() < 200 && Instant::now() < deadline {
        if sink.process(1_000_000) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    let records = sink.take_records();
    assert_eq!(records.len(), 200);
    assert_eq!(records[0].key().as_str(), "k0");
    assert_eq!(records[199].value().map(String::as_str), Some("v199"));

    sink.commit(true).unwrap();
    assert_eq!(broker.stored_offset("bg", "events", 0), Some(200));
    sink.close();
}
