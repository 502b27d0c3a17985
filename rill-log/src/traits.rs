//! Core traits for log consumers and producers.
//!
//! Unlike pub/sub, each consumer group tracks its own stored position per
//! partition; committing a position never removes data from the log.

use std::time::Duration;

use crate::error::Result;

/// Position of a record within a partition. Monotone, starts at 0.
pub type Offset = i64;

/// Wire value for "earliest retained offset".
pub const OFFSET_BEGINNING: i64 = -2;
/// Wire value for "only records produced after start".
pub const OFFSET_END: i64 = -1;
/// Wire value for "the consumer group's stored position".
pub const OFFSET_STORED: i64 = -1000;

/// Where a consumer begins reading a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Earliest retained offset.
    Beginning,
    /// Only records produced after start.
    End,
    /// The stored consumer-group position; falls back to [`Beginning`]
    /// when none exists.
    ///
    /// [`Beginning`]: StartOffset::Beginning
    Stored,
    /// An explicit next offset to read, `>= 0`.
    At(Offset),
}

impl StartOffset {
    /// Decode the conventional wire value.
    #[must_use]
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            OFFSET_BEGINNING => StartOffset::Beginning,
            OFFSET_END => StartOffset::End,
            OFFSET_STORED => StartOffset::Stored,
            n => StartOffset::At(n),
        }
    }

    /// Encode to the conventional wire value.
    #[must_use]
    pub fn raw(self) -> i64 {
        match self {
            StartOffset::Beginning => OFFSET_BEGINNING,
            StartOffset::End => OFFSET_END,
            StartOffset::Stored => OFFSET_STORED,
            StartOffset::At(n) => n,
        }
    }
}

/// One fetched record.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub partition: i32,
    pub offset: Offset,
    pub key: Vec<u8>,
    /// `None` is a tombstone.
    pub value: Option<Vec<u8>>,
    /// Producer-assigned timestamp in ms; `None` when the log has none.
    pub event_time: Option<i64>,
}

/// A consumer bound to one (topic, partition).
///
/// `poll` never blocks; implementations that fetch over a network do the
/// waiting on their own threads (see [`BackgroundConsumer`]) and hand records
/// over through a bounded queue.
///
/// [`BackgroundConsumer`]: crate::background::BackgroundConsumer
pub trait LogConsumer: Send {
    fn topic(&self) -> &str;

    fn partition(&self) -> i32;

    /// Begin (or re-begin) reading at `offset`.
    fn start(&mut self, offset: StartOffset) -> Result<()>;

    /// Stop fetching. Idempotent.
    fn stop(&mut self);

    /// Next record, if one is ready.
    fn poll(&mut self) -> Option<LogMessage>;

    /// True when the partition end has been reached and nothing is buffered.
    /// Transitions back to false when new data arrives.
    fn eof(&self) -> bool;

    /// Store `next_offset` as the consumer-group position (the next offset
    /// this group will read). `flush` blocks until the position is durable;
    /// otherwise the write is best-effort.
    fn commit(&mut self, next_offset: Offset, flush: bool) -> Result<()>;

    /// The last position handed to [`commit`], if any.
    ///
    /// [`commit`]: LogConsumer::commit
    fn committed(&self) -> Option<Offset>;

    /// `(low, high)` watermarks for the partition: earliest retained offset
    /// and one past the newest.
    fn watermarks(&self) -> Result<(Offset, Offset)>;
}

/// Called exactly once per produced record with the delivery error code
/// (0 = success).
pub type DeliveryCallback = Box<dyn FnOnce(i32) + Send>;

/// A producer bound to one topic.
pub trait LogProducer: Send {
    fn topic(&self) -> &str;

    fn partition_count(&self) -> i32;

    /// Hand one record to the log. Delivery is asynchronous; `on_delivery`
    /// fires when the log acknowledges (or rejects) the record.
    fn produce(
        &mut self,
        partition: i32,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        event_time: i64,
        on_delivery: DeliveryCallback,
    ) -> Result<()>;

    /// Records produced but not yet acknowledged.
    fn outstanding(&self) -> usize;

    /// Wait until all outstanding records are acknowledged.
    fn flush(&mut self, timeout: Duration) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_offset_raw_round_trip() {
        for s in [
            StartOffset::Beginning,
            StartOffset::End,
            StartOffset::Stored,
            StartOffset::At(0),
            StartOffset::At(42),
        ] {
            assert_eq!(StartOffset::from_raw(s.raw()), s);
        }
    }

    #[test]
    fn raw_values_match_convention() {
        assert_eq!(StartOffset::Beginning.raw(), -2);
        assert_eq!(StartOffset::End.raw(), -1);
        assert_eq!(StartOffset::Stored.raw(), -1000);
    }
}
