//! The keyed record and the envelope that carries it through the graph.

use std::sync::Arc;

use crate::commit::CommitMarker;

/// An immutable keyed record.
///
/// `value: None` is a tombstone: downstream tables treat it as "delete this
/// key". The event time is the producer-assigned timestamp in ms; sources
/// fall back to ingest wall clock when the log carries none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<K, V> {
    key: K,
    value: Option<V>,
    event_time: i64,
}

impl<K, V> Record<K, V> {
    pub fn new(key: K, value: Option<V>, event_time: i64) -> Self {
        Self {
            key,
            value,
            event_time,
        }
    }

    /// A tombstone for `key`.
    pub fn tombstone(key: K, event_time: i64) -> Self {
        Self::new(key, None, event_time)
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn event_time(&self) -> i64 {
        self.event_time
    }

    pub fn into_value(self) -> Option<V> {
        self.value
    }

    pub fn into_parts(self) -> (K, Option<V>, i64) {
        (self.key, self.value, self.event_time)
    }
}

/// In-graph wrapper around a record, its commit marker and an optional
/// partition-hash override.
///
/// Envelopes are cheap to clone; every clone shares the record and the
/// marker. The marker completes when its last clone is dropped, which is
/// what lets flat-map fan-out hold one source offset open until every
/// derived record has been handled.
#[derive(Debug, Clone)]
pub struct Envelope<K, V> {
    record: Option<Arc<Record<K, V>>>,
    marker: Option<CommitMarker>,
    partition_hash: Option<u32>,
}

impl<K, V> Envelope<K, V> {
    pub fn new(
        record: Option<Arc<Record<K, V>>>,
        marker: Option<CommitMarker>,
        partition_hash: Option<u32>,
    ) -> Self {
        Self {
            record,
            marker,
            partition_hash,
        }
    }

    pub fn from_record(record: Record<K, V>) -> Self {
        Self::new(Some(Arc::new(record)), None, None)
    }

    pub fn with_marker(record: Record<K, V>, marker: CommitMarker) -> Self {
        Self::new(Some(Arc::new(record)), Some(marker), None)
    }

    /// A pure commit heartbeat with no payload.
    pub fn marker_only(marker: CommitMarker) -> Self {
        Self::new(None, Some(marker), None)
    }

    pub fn record(&self) -> Option<&Arc<Record<K, V>>> {
        self.record.as_ref()
    }

    pub fn marker(&self) -> Option<&CommitMarker> {
        self.marker.as_ref()
    }

    /// Event time of the payload; `None` for pure markers.
    pub fn event_time(&self) -> Option<i64> {
        self.record.as_ref().map(|r| r.event_time())
    }

    /// Source offset carried by the marker, if any.
    pub fn offset(&self) -> Option<i64> {
        self.marker.as_ref().map(CommitMarker::offset)
    }

    pub fn partition_hash(&self) -> Option<u32> {
        self.partition_hash
    }

    pub fn set_partition_hash(&mut self, hash: u32) {
        self.partition_hash = Some(hash);
    }
}
