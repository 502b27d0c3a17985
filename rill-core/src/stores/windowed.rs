//! Time-slotted in-memory store.
//!
//! Keys land in the slot `event_time / slot_ms`. Retention is
//! `slot_ms * slot_count`: once newer records advance the window, old slots
//! are reclaimed and their records stop being visible, lookups included.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::record::Record;
use crate::stores::{NO_OFFSET, StateStore, StoreError};

/// Windowed keyed store; values are only retained while their slot is live.
pub struct MemWindowed<K, V> {
    slot_ms: i64,
    slot_count: i64,
    /// slot index -> key -> (value, event_time)
    slots: BTreeMap<i64, HashMap<K, (V, i64)>>,
    newest_slot: Option<i64>,
    current_offset: i64,
}

impl<K, V> MemWindowed<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new(slot_ms: i64, slot_count: usize) -> Self {
        Self {
            slot_ms: slot_ms.max(1),
            slot_count: (slot_count.max(1)) as i64,
            slots: BTreeMap::new(),
            newest_slot: None,
            current_offset: NO_OFFSET,
        }
    }

    /// Total retention covered by the ring.
    #[must_use]
    pub fn retention_ms(&self) -> i64 {
        self.slot_ms * self.slot_count
    }

    fn slot_of(&self, event_time: i64) -> i64 {
        event_time.div_euclid(self.slot_ms)
    }

    fn oldest_live_slot(&self) -> Option<i64> {
        self.newest_slot.map(|n| n - self.slot_count + 1)
    }

    fn reclaim(&mut self) {
        if let Some(oldest) = self.oldest_live_slot() {
            self.slots = self.slots.split_off(&oldest);
        }
    }
}

impl<K, V> StateStore<K, V> for MemWindowed<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn insert(&mut self, record: Record<K, V>, offset: i64) -> Result<(), StoreError> {
        let (key, value, event_time) = record.into_parts();
        let slot = self.slot_of(event_time);
        self.newest_slot = Some(self.newest_slot.map_or(slot, |n| n.max(slot)));

        // ignore records already outside retention
        if slot >= self.oldest_live_slot().unwrap_or(slot) {
            let entries = self.slots.entry(slot).or_default();
            match value {
                Some(v) => {
                    let merged_time = entries
                        .get(&key)
                        .map_or(event_time, |(_, t)| event_time.max(*t));
                    entries.insert(key, (v, merged_time));
                }
                None => {
                    if entries.get(&key).is_some_and(|(_, t)| event_time >= *t) {
                        entries.remove(&key);
                    }
                }
            }
        }
        self.reclaim();
        self.current_offset = self.current_offset.max(offset);
        Ok(())
    }

    fn get(&self, key: &K) -> Option<Record<K, V>> {
        let oldest = self.oldest_live_slot()?;
        // newest slot wins
        self.slots
            .range(oldest..)
            .rev()
            .find_map(|(_, entries)| entries.get(key))
            .map(|(v, t)| Record::new(key.clone(), Some(v.clone()), *t))
    }

    fn for_each(&self, f: &mut dyn FnMut(&Record<K, V>)) {
        let Some(oldest) = self.oldest_live_slot() else {
            return;
        };
        for (_, entries) in self.slots.range(oldest..) {
            for (key, (value, event_time)) in entries {
                f(&Record::new(key.clone(), Some(value.clone()), *event_time));
            }
        }
    }

    fn len(&self) -> usize {
        let Some(oldest) = self.oldest_live_slot() else {
            return 0;
        };
        self.slots.range(oldest..).map(|(_, e)| e.len()).sum()
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.slots.clear();
        self.newest_slot = None;
        self.current_offset = NO_OFFSET;
        Ok(())
    }

    fn offset(&self) -> i64 {
        self.current_offset
    }

    fn commit(&mut self, _flush: bool) -> Result<(), StoreError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(k: &str, v: i32, t: i64) -> Record<String, i32> {
        Record::new(k.to_string(), Some(v), t)
    }

    #[test]
    fn records_land_in_time_slots() {
        let mut s: MemWindowed<String, i32> = MemWindowed::new(100, 10);
        s.insert(rec("a", 1, 50), 0).unwrap();
        s.insert(rec("b", 2, 150), 1).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.retention_ms(), 1000);
        assert_eq!(s.get(&"a".to_string()).unwrap().value(), Some(&1));
    }

    #[test]
    fn newest_slot_wins_lookups() {
        let mut s: MemWindowed<String, i32> = MemWindowed::new(100, 10);
        s.insert(rec("k", 1, 50), 0).unwrap();
        s.insert(rec("k", 2, 250), 1).unwrap();
        assert_eq!(s.get(&"k".to_string()).unwrap().value(), Some(&2));
    }

    #[test]
    fn records_age_out_of_retention() {
        let mut s: MemWindowed<String, i32> = MemWindowed::new(100, 3);
        s.insert(rec("old", 1, 0), 0).unwrap();
        assert!(s.get(&"old".to_string()).is_some());

        // slot 0 falls out once slot 3 exists (live slots 1..=3)
        s.insert(rec("new", 2, 300), 1).unwrap();
        assert!(s.get(&"old".to_string()).is_none());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn too_old_records_are_invisible_immediately() {
        let mut s: MemWindowed<String, i32> = MemWindowed::new(100, 3);
        s.insert(rec("new", 1, 1_000), 0).unwrap();
        s.insert(rec("ancient", 2, 0), 1).unwrap();
        assert!(s.get(&"ancient".to_string()).is_none());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn tombstone_clears_a_slot_entry() {
        let mut s: MemWindowed<String, i32> = MemWindowed::new(100, 10);
        s.insert(rec("k", 1, 50), 0).unwrap();
        s.insert(Record::tombstone("k".to_string(), 60), 1).unwrap();
        assert!(s.get(&"k".to_string()).is_none());
    }
}
