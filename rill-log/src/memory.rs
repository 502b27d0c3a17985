//! In-process broker for tests, demos and single-process pipelines.
//!
//! Topics hold a fixed number of partitions, each an ordered vector of
//! records with base offset 0. Consumer-group positions live in the broker,
//! so a consumer created after a restart resumes where its group left off.
//! Delivery callbacks fire synchronously on append.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::traits::{
    DeliveryCallback, LogConsumer, LogMessage, LogProducer, Offset, StartOffset,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    event_time: i64,
}

#[derive(Debug, Default)]
struct TopicState {
    partitions: Vec<Vec<StoredMessage>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
    /// (group, topic, partition) -> next offset to read.
    group_offsets: HashMap<(String, String, i32), Offset>,
}

/// Shared in-process broker. Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `partitions` empty partitions under `topic`. Re-creating an
    /// existing topic is a no-op.
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        let mut state = self.state.lock().expect("broker lock");
        state.topics.entry(topic.to_string()).or_insert_with(|| TopicState {
            partitions: (0..partitions.max(1)).map(|_| Vec::new()).collect(),
        });
    }

    pub fn partition_count(&self, topic: &str) -> Result<i32> {
        let state = self.state.lock().expect("broker lock");
        state
            .topics
            .get(topic)
            .map(|t| t.partitions.len() as i32)
            .ok_or_else(|| Error::UnknownTopic(topic.to_string()))
    }

    /// `(low, high)` watermarks: earliest retained offset and one past the
    /// newest.
    pub fn watermarks(&self, topic: &str, partition: i32) -> Result<(Offset, Offset)> {
        let state = self.state.lock().expect("broker lock");
        let t = state
            .topics
            .get(topic)
            .ok_or_else(|| Error::UnknownTopic(topic.to_string()))?;
        let p = t
            .partitions
            .get(partition as usize)
            .ok_or_else(|| Error::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })?;
        Ok((0, p.len() as Offset))
    }

    /// The stored next-offset for a consumer group, if any.
    pub fn stored_offset(&self, group: &str, topic: &str, partition: i32) -> Option<Offset> {
        let state = self.state.lock().expect("broker lock");
        state
            .group_offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Append one record directly, bypassing a producer. Returns the offset.
    pub fn append(
        &self,
        topic: &str,
        partition: i32,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        event_time: i64,
    ) -> Result<Offset> {
        let mut state = self.state.lock().expect("broker lock");
        let t = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| Error::UnknownTopic(topic.to_string()))?;
        let p = t
            .partitions
            .get_mut(partition as usize)
            .ok_or_else(|| Error::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })?;
        let offset = p.len() as Offset;
        p.push(StoredMessage {
            key,
            value,
            event_time,
        });
        Ok(offset)
    }

    /// A producer for `topic`.
    pub fn producer(&self, topic: &str) -> Result<MemoryProducer> {
        let count = self.partition_count(topic)?;
        Ok(MemoryProducer {
            broker: self.clone(),
            topic: topic.to_string(),
            partitions: count,
        })
    }

    /// A consumer for one (group, topic, partition).
    pub fn consumer(&self, group: &str, topic: &str, partition: i32) -> Result<MemoryConsumer> {
        let count = self.partition_count(topic)?;
        if partition < 0 || partition >= count {
            return Err(Error::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }
        Ok(MemoryConsumer {
            broker: self.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            partition,
            position: None,
            committed: None,
            stopped: false,
        })
    }
}

/// Producer over a [`MemoryBroker`] topic. Appends synchronously, so
/// `outstanding` is always 0 and delivery callbacks fire inline.
pub struct MemoryProducer {
    broker: MemoryBroker,
    topic: String,
    partitions: i32,
}

impl LogProducer for MemoryProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition_count(&self) -> i32 {
        self.partitions
    }

    fn produce(
        &mut self,
        partition: i32,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        event_time: i64,
        on_delivery: DeliveryCallback,
    ) -> Result<()> {
        match self.broker.append(&self.topic, partition, key, value, event_time) {
            Ok(_) => {
                on_delivery(0);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(topic = %self.topic, partition, error = %e, "produce failed");
                on_delivery(-1);
                Err(e)
            }
        }
    }

    fn outstanding(&self) -> usize {
        0
    }

    fn flush(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

/// Consumer over a [`MemoryBroker`] partition.
pub struct MemoryConsumer {
    broker: MemoryBroker,
    group: String,
    topic: String,
    partition: i32,
    /// Next offset to read; `None` until `start`.
    position: Option<Offset>,
    committed: Option<Offset>,
    stopped: bool,
}

impl LogConsumer for MemoryConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    fn start(&mut self, offset: StartOffset) -> Result<()> {
        let (low, high) = self.broker.watermarks(&self.topic, self.partition)?;
        let position = match offset {
            StartOffset::Beginning => low,
            StartOffset::End => high,
            StartOffset::Stored => self
                .broker
                .stored_offset(&self.group, &self.topic, self.partition)
                .unwrap_or(low),
            StartOffset::At(n) => n.max(low),
        };
        tracing::debug!(
            topic = %self.topic,
            partition = self.partition,
            group = %self.group,
            position,
            "consumer started"
        );
        self.position = Some(position);
        self.stopped = false;
        Ok(())
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn poll(&mut self) -> Option<LogMessage> {
        if self.stopped {
            return None;
        }
        let position = self.position?;
        let state = self.broker.state.lock().expect("broker lock");
        let msg = state
            .topics
            .get(&self.topic)?
            .partitions
            .get(self.partition as usize)?
            .get(position as usize)?
            .clone();
        drop(state);
        self.position = Some(position + 1);
        Some(LogMessage {
            partition: self.partition,
            offset: position,
            key: msg.key,
            value: msg.value,
            event_time: Some(msg.event_time),
        })
    }

    fn eof(&self) -> bool {
        let Some(position) = self.position else {
            return false;
        };
        match self.broker.watermarks(&self.topic, self.partition) {
            Ok((_, high)) => position >= high,
            Err(_) => true,
        }
    }

    fn commit(&mut self, next_offset: Offset, _flush: bool) -> Result<()> {
        let mut state = self.broker.state.lock().expect("broker lock");
        state.group_offsets.insert(
            (self.group.clone(), self.topic.clone(), self.partition),
            next_offset,
        );
        drop(state);
        self.committed = Some(next_offset);
        Ok(())
    }

    fn committed(&self) -> Option<Offset> {
        self.committed
    }

    fn watermarks(&self) -> Result<(Offset, Offset)> {
        self.broker.watermarks(&self.topic, self.partition)
    }
}
