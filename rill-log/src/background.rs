//! Background-thread fetch adapter.
//!
//! Wraps any [`LogConsumer`] and moves its polling onto a dedicated OS
//! thread. Records cross back over a bounded channel, so a stalled topology
//! thread stops the fetcher instead of buffering without limit. The worker
//! polls a shared stop flag between operations and exits cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::traits::{LogConsumer, LogMessage, Offset, StartOffset};

const BACKOFF_MIN: Duration = Duration::from_millis(1);
const BACKOFF_MAX: Duration = Duration::from_millis(100);
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Commit {
        next_offset: Offset,
        flush: bool,
        ack: Option<SyncSender<Result<()>>>,
    },
    Watermarks {
        ack: SyncSender<Result<(Offset, Offset)>>,
    },
}

struct Worker {
    rx: Receiver<LogMessage>,
    cmd_tx: Sender<Command>,
    at_end: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Box<dyn LogConsumer>>,
}

/// A [`LogConsumer`] that fetches on its own thread behind a bounded queue.
pub struct BackgroundConsumer {
    topic: String,
    partition: i32,
    capacity: usize,
    /// Present while no worker is running.
    inner: Option<Box<dyn LogConsumer>>,
    worker: Option<Worker>,
    /// One message pulled out of the channel by `eof` peeking.
    peeked: Mutex<Option<LogMessage>>,
    committed: Option<Offset>,
}

impl BackgroundConsumer {
    /// Wrap `inner`, keeping at most `capacity` fetched records in flight
    /// between the worker thread and the caller.
    #[must_use]
    pub fn new(inner: Box<dyn LogConsumer>, capacity: usize) -> Self {
        Self {
            topic: inner.topic().to_string(),
            partition: inner.partition(),
            capacity: capacity.max(1),
            inner: Some(inner),
            worker: None,
            peeked: Mutex::new(None),
            committed: None,
        }
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            // Unblock a worker waiting on a full data channel.
            drop(worker.rx);
            match worker.handle.join() {
                Ok(inner) => self.inner = Some(inner),
                Err(_) => tracing::error!(
                    topic = %self.topic,
                    partition = self.partition,
                    "background fetcher panicked"
                ),
            }
        }
    }

    fn run(
        mut inner: Box<dyn LogConsumer>,
        tx: SyncSender<LogMessage>,
        cmd_rx: Receiver<Command>,
        at_end: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
    ) -> Box<dyn LogConsumer> {
        let mut backoff = BACKOFF_MIN;
        'outer: while !stop.load(Ordering::Acquire) {
            while let Ok(cmd) = cmd_rx.try_recv() {
                Self::handle_command(inner.as_mut(), cmd);
            }
            match inner.poll() {
                Some(msg) => {
                    backoff = BACKOFF_MIN;
                    at_end.store(false, Ordering::Release);
                    let mut msg = msg;
                    loop {
                        match tx.try_send(msg) {
                            Ok(()) => break,
                            Err(TrySendError::Full(back)) => {
                                msg = back;
                                if stop.load(Ordering::Acquire) {
                                    break 'outer;
                                }
                                while let Ok(cmd) = cmd_rx.try_recv() {
                                    Self::handle_command(inner.as_mut(), cmd);
                                }
                                std::thread::sleep(BACKOFF_MIN);
                            }
                            Err(TrySendError::Disconnected(_)) => break 'outer,
                        }
                    }
                }
                None => {
                    at_end.store(inner.eof(), Ordering::Release);
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
            }
        }
        // Late commits queued while shutting down still land.
        while let Ok(cmd) = cmd_rx.try_recv() {
            Self::handle_command(inner.as_mut(), cmd);
        }
        inner
    }

    fn handle_command(inner: &mut dyn LogConsumer, cmd: Command) {
        match cmd {
            Command::Commit {
                next_offset,
                flush,
                ack,
            } => {
                let result = inner.commit(next_offset, flush);
                if let Err(ref e) = result {
                    tracing::warn!(error = %e, "background commit failed");
                }
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            Command::Watermarks { ack } => {
                let _ = ack.send(inner.watermarks());
            }
        }
    }
}

impl LogConsumer for BackgroundConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    fn start(&mut self, offset: StartOffset) -> Result<()> {
        self.join_worker();
        let mut inner = self.inner.take().ok_or(Error::Disconnected)?;
        // Seek on the caller's thread so start errors surface here.
        if let Err(e) = inner.start(offset) {
            self.inner = Some(inner);
            return Err(e);
        }
        self.peeked = Mutex::new(None);

        let (tx, rx) = sync_channel(self.capacity);
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
        let at_end = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let at_end = at_end.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name(format!("rill-fetch-{}-{}", self.topic, self.partition))
                .spawn(move || Self::run(inner, tx, cmd_rx, at_end, stop))?
        };
        self.worker = Some(Worker {
            rx,
            cmd_tx,
            at_end,
            stop,
            handle,
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.join_worker();
        if let Some(inner) = self.inner.as_mut() {
            inner.stop();
        }
    }

    fn poll(&mut self) -> Option<LogMessage> {
        if let Some(msg) = self.peeked.lock().expect("peek lock").take() {
            return Some(msg);
        }
        self.worker.as_ref()?.rx.try_recv().ok()
    }

    fn eof(&self) -> bool {
        let Some(worker) = self.worker.as_ref() else {
            return false;
        };
        let mut peeked = self.peeked.lock().expect("peek lock");
        if peeked.is_some() {
            return false;
        }
        if let Ok(msg) = worker.rx.try_recv() {
            *peeked = Some(msg);
            return false;
        }
        worker.at_end.load(Ordering::Acquire)
    }

    fn commit(&mut self, next_offset: Offset, flush: bool) -> Result<()> {
        self.committed = Some(next_offset);
        match (self.worker.as_ref(), self.inner.as_mut()) {
            (Some(worker), _) => {
                if flush {
                    let (ack_tx, ack_rx) = sync_channel(1);
                    worker
                        .cmd_tx
                        .send(Command::Commit {
                            next_offset,
                            flush,
                            ack: Some(ack_tx),
                        })
                        .map_err(|_| Error::Disconnected)?;
                    ack_rx
                        .recv_timeout(ACK_TIMEOUT)
                        .map_err(|_| Error::FlushTimeout {
                            timeout_ms: ACK_TIMEOUT.as_millis() as u64,
                        })?
                } else {
                    worker
                        .cmd_tx
                        .send(Command::Commit {
                            next_offset,
                            flush,
                            ack: None,
                        })
                        .map_err(|_| Error::Disconnected)
                }
            }
            (None, Some(inner)) => inner.commit(next_offset, flush),
            (None, None) => Err(Error::Disconnected),
        }
    }

    fn committed(&self) -> Option<Offset> {
        self.committed
    }

    fn watermarks(&self) -> Result<(Offset, Offset)> {
        match (self.worker.as_ref(), self.inner.as_ref()) {
            (Some(worker), _) => {
                let (ack_tx, ack_rx) = sync_channel(1);
                worker
                    .cmd_tx
                    .send(Command::Watermarks { ack: ack_tx })
                    .map_err(|_| Error::Disconnected)?;
                ack_rx
                    .recv_timeout(ACK_TIMEOUT)
                    .map_err(|_| Error::Disconnected)?
            }
            (None, Some(inner)) => inner.watermarks(),
            (None, None) => Err(Error::Disconnected),
        }
    }
}

impl Drop for BackgroundConsumer {
    fn drop(&mut self) {
        self.join_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;

    fn consumer_over(broker: &MemoryBroker, capacity: usize) -> BackgroundConsumer {
        let inner = broker.consumer("g", "events", 0).unwrap();
        BackgroundConsumer::new(Box::new(inner), capacity)
    }

    fn poll_blocking(consumer: &mut BackgroundConsumer) -> Option<LogMessage> {
        for _ in 0..1000 {
            if let Some(msg) = consumer.poll() {
                return Some(msg);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn fetches_across_the_thread_boundary() {
        let broker = MemoryBroker::new();
        broker.create_topic("events", 1);
        for i in 0..3 {
            broker.append("events", 0, vec![i], None, i as i64).unwrap();
        }

        let mut consumer = consumer_over(&broker, 16);
        consumer.start(StartOffset::Beginning).unwrap();
        for expected in 0..3 {
            let msg = poll_blocking(&mut consumer).expect("message");
            assert_eq!(msg.offset, expected);
        }
        consumer.stop();
    }

    #[test]
    fn bounded_channel_limits_in_flight_records() {
        let broker = MemoryBroker::new();
        broker.create_topic("events", 1);
        for i in 0..100 {
            broker.append("events", 0, vec![i], None, i64::from(i)).unwrap();
        }

        let mut consumer = consumer_over(&broker, 4);
        consumer.start(StartOffset::Beginning).unwrap();
        // Never more than capacity + the worker's in-hand record are off the
        // broker while the caller does not poll; just verify nothing is lost
        // and order holds once we drain.
        let mut seen = Vec::new();
        while seen.len() < 100 {
            if let Some(msg) = poll_blocking(&mut consumer) {
                seen.push(msg.offset);
            } else {
                break;
            }
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        consumer.stop();
    }

    #[test]
    fn eof_reflects_partition_end() {
        let broker = MemoryBroker::new();
        broker.create_topic("events", 1);
        let mut consumer = consumer_over(&broker, 4);
        consumer.start(StartOffset::Beginning).unwrap();

        for _ in 0..1000 {
            if consumer.eof() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(consumer.eof());

        broker.append("events", 0, b"k".to_vec(), None, 1).unwrap();
        assert!(poll_blocking(&mut consumer).is_some());
        consumer.stop();
    }

    #[test]
    fn commit_with_flush_reaches_the_broker() {
        let broker = MemoryBroker::new();
        broker.create_topic("events", 1);
        broker.append("events", 0, b"k".to_vec(), None, 1).unwrap();

        let mut consumer = consumer_over(&broker, 4);
        consumer.start(StartOffset::Beginning).unwrap();
        poll_blocking(&mut consumer).unwrap();
        consumer.commit(1, true).unwrap();
        assert_eq!(broker.stored_offset("g", "events", 0), Some(1));
        consumer.stop();
    }

    #[test]
    fn stop_is_idempotent_and_restart_works() {
        let broker = MemoryBroker::new();
        broker.create_topic("events", 1);
        broker.append("events", 0, b"a".to_vec(), None, 1).unwrap();

        let mut consumer = consumer_over(&broker, 4);
        consumer.start(StartOffset::Beginning).unwrap();
        poll_blocking(&mut consumer).unwrap();
        consumer.stop();
        consumer.stop();

        consumer.start(StartOffset::Beginning).unwrap();
        assert_eq!(poll_blocking(&mut consumer).unwrap().offset, 0);
        consumer.stop();
    }
}
