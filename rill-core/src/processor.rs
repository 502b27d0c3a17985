//! The processor contract.
//!
//! Processors form an ownership chain: every operator owns its upstream as a
//! generic parameter, so chains monomorphize and the per-record path has no
//! dynamic dispatch. The topology owns the leaves. Calls that must reach the
//! whole graph (`start`, `close`, `commit`, `punctuate`, metrics) recurse
//! through the chain; `process(now)` pulls records downstream with
//! [`StreamSource::poll_output`], gated on event time.

use std::time::Duration;

use rill_log::StartOffset;

use crate::error::Result;
use crate::metrics::Metric;
use crate::record::{Envelope, Record};
use crate::topology::AppContext;

/// Common lifecycle shared by every node in a topology.
pub trait Processor {
    /// Stable short name of the processor kind, e.g. `"filter"`.
    fn kind(&self) -> &'static str;

    /// Display name; defaults to the kind.
    fn name(&self) -> String {
        self.kind().to_string()
    }

    fn key_type_name(&self) -> String;

    fn value_type_name(&self) -> String;

    /// Partition index this processor is pinned to.
    fn partition(&self) -> i32;

    /// Begin consuming at `offset`. Recurses into upstreams.
    fn start(&mut self, offset: StartOffset) -> Result<()>;

    /// Stop and release resources. Recursive, idempotent.
    fn close(&mut self);

    /// Handle events whose event time is `<= now`; returns how many records
    /// were handled. Never blocks.
    fn process(&mut self, now: i64) -> usize;

    /// True when no upstream can currently produce and nothing is queued.
    fn eof(&self) -> bool;

    /// Events queued at this processor's output edge.
    fn queue_size(&self) -> usize;

    /// Event time of the next queued event, if any.
    fn next_event_time(&self) -> Option<i64>;

    /// Write back progress. `flush` waits for durability. Recursive.
    fn commit(&mut self, flush: bool) -> Result<()>;

    /// Time-driven emission hook; aggregators override it. Recursive so a
    /// leaf's flush reaches interior aggregators.
    fn punctuate(&mut self, _now: i64) {}

    /// Drive the graph to completion: process until `eof`, punctuate, pull
    /// the punctuation output through, then commit durably.
    fn flush(&mut self) -> Result<()> {
        drain(self);
        self.punctuate(crate::now_ms());
        drain(self);
        self.commit(true)
    }

    /// Visit this processor's metrics, then recurse upstream.
    fn for_each_metric(&self, f: &mut dyn FnMut(&Metric));

    /// Stamp metric names with application identity and processor tags.
    /// Recursive.
    fn init_metrics(&mut self, ctx: &AppContext);
}

/// A processor with a typed output edge.
pub trait StreamSource<K, V>: Processor {
    /// Pop the next output whose event time is `<= now`. Callers invoke
    /// `process(now)` first to fill the edge.
    fn poll_output(&mut self, now: i64) -> Option<Envelope<K, V>>;
}

/// A stream source whose latest state per key is queryable.
pub trait MaterializedSource<K, V>: StreamSource<K, V> {
    /// Latest live record for `key`; `None` when absent or tombstoned.
    fn get(&self, key: &K) -> Option<Record<K, V>>;

    /// Visit all live records, in store order.
    fn for_each_entry(&self, f: &mut dyn FnMut(&Record<K, V>));

    /// Number of live keys.
    fn entry_count(&self) -> usize;
}

/// Process until `eof` holds, yielding briefly whenever a pass does nothing.
pub fn drain<P: Processor + ?Sized>(p: &mut P) {
    loop {
        let n = p.process(crate::now_ms());
        if p.eof() {
            break;
        }
        if n == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Stamp a processor's own metrics. Implementations call this from
/// `init_metrics` before recursing upstream.
pub fn stamp_metrics(
    metrics: &[&Metric],
    ctx: &AppContext,
    kind: &str,
    key_type: &str,
    value_type: &str,
    partition: i32,
) {
    let tags = ctx
        .base_tags()
        .with("processor", kind)
        .with("key_type", key_type)
        .with("value_type", value_type)
        .with("partition", &partition.to_string());
    for m in metrics {
        m.set_logged_name(tags.render(m.name()));
    }
}
