//! Log consumer/producer abstractions for rill.
//!
//! A rill topology reads partitioned, keyed event logs through the
//! [`LogConsumer`] trait and writes them back through [`LogProducer`]. The
//! traits model the minimum a commit-log client has to offer: per-partition
//! polling, stored consumer positions, watermarks and asynchronous delivery
//! reports. Implementations are replaceable; this crate ships an in-process
//! [`MemoryBroker`] plus a [`BackgroundConsumer`] adapter that moves polling
//! onto its own OS thread behind a bounded queue.
//!
//! # Key Types
//!
//! - [`LogConsumer`] / [`LogProducer`] - the client traits the engine consumes
//! - [`LogMessage`] - one fetched record with partition, offset and timestamp
//! - [`StartOffset`] - where a consumer begins reading
//! - [`MemoryBroker`] - shared in-process broker for tests and demos
//! - [`BackgroundConsumer`] - background-thread fetcher with backpressure

pub mod background;
pub mod error;
pub mod manual;
pub mod memory;
pub mod traits;

pub use background::BackgroundConsumer;
pub use error::{Error, Result};
pub use manual::ManualProducer;
pub use memory::{MemoryBroker, MemoryConsumer, MemoryProducer};
pub use traits::{DeliveryCallback, LogConsumer, LogMessage, LogProducer, Offset, StartOffset};
