//! Partition-local stream processing engine.
//!
//! Applications compose a directed acyclic graph of per-partition
//! processors: sources reading from a partitioned commit log, stateful
//! transformations, and sinks writing back out. A [`Topology`] drives the
//! graph with a single-threaded cooperative loop; per-record
//! [`CommitMarker`]s make sure consumer offsets advance only after records
//! have been durably forwarded; keyed state materializes into pluggable
//! [`StateStore`]s.
//!
//! # Key Types
//!
//! - [`Record`] / [`Envelope`] - the keyed, timestamped data model
//! - [`CommitChain`] / [`CommitMarker`] - at-least-once offset tracking
//! - [`Processor`] / [`StreamSource`] - the processor contract
//! - [`LogSource`] / [`LogSink`] / [`TopicSink`] - the log boundary
//! - [`Topology`] / [`TopologyBuilder`] - graph ownership and scheduling
//!
//! [`StateStore`]: stores::StateStore
//! [`LogSource`]: source::LogSource
//! [`LogSink`]: sink::LogSink
//! [`TopicSink`]: sink::TopicSink

pub mod codec;
pub mod commit;
pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod operators;
pub mod processor;
pub mod queue;
pub mod record;
pub mod sink;
pub mod source;
pub mod stores;
#[cfg(test)]
pub(crate) mod testutil;
pub mod topology;

pub use codec::{BinCodec, Codec, CodecError, JsonCodec, TextCodec};
pub use commit::{CommitChain, CommitMarker};
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use processor::{MaterializedSource, Processor, StreamSource};
pub use record::{Envelope, Record};
pub use rill_log::StartOffset;
pub use sink::{CollectSink, LogSink, Partitioner, TextSink, TopicSink};
pub use source::LogSource;
pub use topology::{Topology, TopologyBuilder};

/// Current wall clock in milliseconds since the epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
