//! Word count over the in-process broker.
//!
//! Run with: `cargo run --example wordcount`

use rill_core::operators::{CountByKey, Emitter, FlatMap};
use rill_core::stores::MemCounter;
use rill_core::{
    LogSource, Record, RuntimeConfig, StartOffset, TextCodec, TextSink, TopologyBuilder,
};
use rill_log::MemoryBroker;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let broker = MemoryBroker::new();
    broker.create_topic("lines", 1);
    let t0 = rill_core::now_ms();
    for (i, line) in ["hello world", "hello", "world world"].iter().enumerate() {
        broker.append(
            "lines",
            0,
            Vec::new(),
            Some(line.as_bytes().to_vec()),
            t0 + i as i64,
        )?;
    }

    let mut builder = TopologyBuilder::new("wordcount", "demo", RuntimeConfig::default());
    let mut topology = builder.create_topology();

    let source: LogSource<(), String, TextCodec, TextCodec> = LogSource::new(
        Box::new(broker.consumer("wordcount", "lines", 0)?),
        TextCodec,
        TextCodec,
        topology.config(),
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
    let sink = TextSink::new(counts, std::io::stdout(), TextCodec, TextCodec);
    topology.add(sink);

    topology.start(StartOffset::Beginning)?;
    topology.flush()?;

    println!("-- metrics --");
    topology.for_each_metric(&mut |m| {
        if m.get() != 0 {
            println!("{} {}", m.logged_name(), m.get());
        }
    });
    topology.close();
    Ok(())
}
