//! Producer with manually driven delivery reports.
//!
//! Useful for exercising commit behavior: a test hands one clone of the
//! producer to a sink, keeps another, and fires the delivery callbacks in
//! any order and with any error codes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::traits::{DeliveryCallback, LogProducer};

struct Pending {
    partition: i32,
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    event_time: i64,
    on_delivery: DeliveryCallback,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<Pending>,
    delivered: Vec<(i32, Vec<u8>, Option<Vec<u8>>, i64)>,
}

/// In-memory producer whose delivery callbacks fire only when the test says
/// so. Clones share state, so one clone can live inside a sink while the
/// test drives deliveries through another.
#[derive(Clone)]
pub struct ManualProducer {
    topic: String,
    partitions: i32,
    inner: Arc<Mutex<Inner>>,
}

impl ManualProducer {
    #[must_use]
    pub fn new(topic: &str, partitions: i32) -> Self {
        Self {
            topic: topic.to_string(),
            partitions,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Fire the delivery callback of the oldest pending record with `ec`.
    /// Returns false when nothing is pending.
    pub fn deliver_next(&self, ec: i32) -> bool {
        self.deliver_at(0, ec)
    }

    /// Fire the delivery callback of the pending record at `index`.
    pub fn deliver_at(&self, index: usize, ec: i32) -> bool {
        let pending = {
            let mut inner = self.inner.lock().expect("producer lock");
            let Some(p) = inner.pending.remove(index) else {
                return false;
            };
            if ec == 0 {
                inner
                    .delivered
                    .push((p.partition, p.key.clone(), p.value.clone(), p.event_time));
            }
            p
        };
        // callback runs outside the lock, like a real delivery thread
        (pending.on_delivery)(ec);
        true
    }

    /// Deliver everything pending, successfully, in produce order.
    pub fn deliver_all(&self) {
        while self.deliver_next(0) {}
    }

    /// Records successfully delivered so far, as
    /// `(partition, key, value, event_time)`.
    #[must_use]
    pub fn delivered(&self) -> Vec<(i32, Vec<u8>, Option<Vec<u8>>, i64)> {
        self.inner.lock().expect("producer lock").delivered.clone()
    }
}

impl LogProducer for ManualProducer {
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
        self.inner
            .lock()
            .expect("producer lock")
            .pending
            .push_back(Pending {
                partition,
                key,
                value,
                event_time,
                on_delivery,
            });
        Ok(())
    }

    fn outstanding(&self) -> usize {
        self.inner.lock().expect("producer lock").pending.len()
    }

    fn flush(&mut self, timeout: Duration) -> Result<()> {
        if self.outstanding() == 0 {
            Ok(())
        } else {
            Err(Error::FlushTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}
