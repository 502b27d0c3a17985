//! Per-partition commit chains.
//!
//! A source allocates one [`CommitMarker`] per fetched offset. The marker
//! travels with the record's envelope through the graph, shared by every
//! clone. When the last clone drops, the marker's slot in the chain is
//! completed with a single atomic store; the source later asks the chain for
//! the highest offset that is safe to commit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Slot {
    offset: i64,
    ec: AtomicI32,
    done: AtomicBool,
}

#[derive(Debug)]
struct ChainInner {
    /// Slots in strictly increasing offset order; completed clean slots are
    /// trimmed from the front by `last_good_offset`.
    slots: Mutex<VecDeque<Arc<Slot>>>,
    last_good: AtomicI64,
    outstanding: AtomicUsize,
}

/// Ordered chain of outstanding commit markers for one (source, partition).
#[derive(Debug, Clone)]
pub struct CommitChain {
    inner: Arc<ChainInner>,
}

impl Default for CommitChain {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ChainInner {
                slots: Mutex::new(VecDeque::new()),
                last_good: AtomicI64::new(-1),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Allocate a marker for `offset`. Offsets must be created in strictly
    /// increasing order.
    pub fn create(&self, offset: i64) -> CommitMarker {
        let slot = Arc::new(Slot {
            offset,
            ec: AtomicI32::new(0),
            done: AtomicBool::new(false),
        });
        {
            let mut slots = self.inner.slots.lock().expect("chain lock");
            if let Some(back) = slots.back() {
                debug_assert!(
                    back.offset < offset,
                    "commit markers must be created in increasing offset order"
                );
                if back.offset >= offset {
                    tracing::error!(
                        previous = back.offset,
                        offset,
                        "out-of-order commit marker"
                    );
                }
            }
            slots.push_back(slot.clone());
        }
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        CommitMarker {
            inner: Arc::new(MarkerInner {
                slot,
                chain: self.inner.clone(),
            }),
        }
    }

    /// Markers created but not yet completed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The greatest offset `o` such that every offset `<= o` has completed
    /// cleanly. Monotone non-decreasing; `-1` until the first completion.
    ///
    /// A slot completed with a non-zero error code is never trimmed, so a
    /// failed delivery freezes the watermark at the last good offset until
    /// the caller decides to retry or give up.
    pub fn last_good_offset(&self) -> i64 {
        let mut slots = self.inner.slots.lock().expect("chain lock");
        while let Some(front) = slots.front() {
            if !front.done.load(Ordering::Acquire) || front.ec.load(Ordering::Acquire) != 0 {
                break;
            }
            self.inner.last_good.store(front.offset, Ordering::Release);
            slots.pop_front();
        }
        self.inner.last_good.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct MarkerInner {
    slot: Arc<Slot>,
    chain: Arc<ChainInner>,
}

impl Drop for MarkerInner {
    fn drop(&mut self) {
        // Completion is a plain atomic store; the chain trims lazily when the
        // source asks for the watermark.
        self.slot.done.store(true, Ordering::Release);
        self.chain.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Ref-counted handle to one offset's slot in a [`CommitChain`].
///
/// Clones share the slot; the slot completes when the last clone drops.
#[derive(Debug, Clone)]
pub struct CommitMarker {
    inner: Arc<MarkerInner>,
}

impl CommitMarker {
    #[must_use]
    pub fn offset(&self) -> i64 {
        self.inner.slot.offset
    }

    #[must_use]
    pub fn ec(&self) -> i32 {
        self.inner.slot.ec.load(Ordering::Acquire)
    }

    /// Poison the slot with a delivery error code. Zero is ignored.
    pub fn fail(&self, ec: i32) {
        if ec != 0 {
            self.inner.slot.ec.store(ec, Ordering::Release);
        }
    }
}
