//! Additive counter store.
//!
//! Like [`MemKv`](super::MemKv), except a non-tombstone insert *adds* its
//! value to the stored one. Because it aggregates, an update with an older
//! timestamp still counts; the stored event time is the max of the two.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use crate::codec::Codec;
use crate::record::Record;
use crate::stores::{NO_OFFSET, StateStore, StoreError};

const SNAPSHOT_FILE: &str = "counters.bin";

/// Keyed `i64` accumulator.
pub struct MemCounter<K, KC> {
    entries: HashMap<K, (i64, i64)>,
    dir: Option<PathBuf>,
    key_codec: KC,
    current_offset: i64,
}

impl<K, KC> MemCounter<K, KC>
where
    K: Hash + Eq + Clone,
    KC: Codec<K>,
{
    pub fn in_memory(key_codec: KC) -> Self {
        Self {
            entries: HashMap::new(),
            dir: None,
            key_codec,
            current_offset: NO_OFFSET,
        }
    }

    pub fn open(dir: &Path, key_codec: KC) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let mut store = Self {
            entries: HashMap::new(),
            dir: Some(dir.to_path_buf()),
            key_codec,
            current_offset: NO_OFFSET,
        };
        store.load()?;
        Ok(store)
    }

    fn load(&mut self) -> Result<(), StoreError> {
        let Some(dir) = self.dir.as_ref() else {
            return Ok(());
        };
        let path = super::data_file_path(dir, SNAPSHOT_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let mut pos = 0;
        while pos < bytes.len() {
            let klen = read_u32(&bytes, &mut pos)? as usize;
            let key_bytes = bytes
                .get(pos..pos + klen)
                .ok_or_else(|| StoreError::Corrupt("truncated counter key".to_string()))?;
            pos += klen;
            let event_time = read_i64(&bytes, &mut pos)?;
            let count = read_i64(&bytes, &mut pos)?;
            let key = self.key_codec.decode_all(key_bytes)?;
            self.entries.insert(key, (count, event_time));
        }
        if let Some(offset) = super::read_offset_file(dir)? {
            self.current_offset = offset;
        }
        Ok(())
    }

    fn write_snapshot(&self) -> Result<(), StoreError> {
        let Some(dir) = self.dir.as_ref() else {
            return Ok(());
        };
        let mut out = Vec::new();
        for (key, (count, event_time)) in &self.entries {
            let mut key_bytes = Vec::new();
            self.key_codec.encode(key, &mut key_bytes)?;
            out.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&key_bytes);
            out.extend_from_slice(&event_time.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
        }
        super::write_data_file(dir, SNAPSHOT_FILE, &out)?;
        super::write_offset_file(dir, self.current_offset)?;
        Ok(())
    }
}

impl<K, KC> StateStore<K, i64> for MemCounter<K, KC>
where
    K: Hash + Eq + Clone,
    KC: Codec<K>,
{
    fn insert(&mut self, record: Record<K, i64>, offset: i64) -> Result<(), StoreError> {
        let (key, value, event_time) = record.into_parts();
        match value {
            Some(delta) => {
                let entry = self.entries.entry(key).or_insert((0, event_time));
                entry.0 += delta;
                entry.1 = entry.1.max(event_time);
            }
            None => {
                // deletes with a stale timestamp are refused
                if self
                    .entries
                    .get(&key)
                    .is_some_and(|(_, t)| event_time >= *t)
                {
                    self.entries.remove(&key);
                }
            }
        }
        self.current_offset = self.current_offset.max(offset);
        Ok(())
    }

    fn get(&self, key: &K) -> Option<Record<K, i64>> {
        self.entries
            .get(key)
            .map(|(count, t)| Record::new(key.clone(), Some(*count), *t))
    }

    fn for_each(&self, f: &mut dyn FnMut(&Record<K, i64>)) {
        for (key, (count, event_time)) in &self.entries {
            f(&Record::new(key.clone(), Some(*count), *event_time));
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        self.current_offset = NO_OFFSET;
        Ok(())
    }

    fn offset(&self) -> i64 {
        self.current_offset
    }

    fn commit(&mut self, flush: bool) -> Result<(), StoreError> {
        if flush {
            self.write_snapshot()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.commit(true)
    }
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, StoreError> {
    let bytes: [u8; 4] = buf
        .get(*pos..*pos + 4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StoreError::Corrupt("truncated u32".to_string()))?;
    *pos += 4;
    Ok(u32::from_le_bytes(bytes))
}

fn read_i64(buf: &[u8], pos: &mut usize) -> Result<i64, StoreError> {
    let bytes: [u8; 8] = buf
        .get(*pos..*pos + 8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StoreError::Corrupt("truncated i64".to_string()))?;
    *pos += 8;
    Ok(i64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BinCodec;

    fn store() -> MemCounter<i32, BinCodec> {
        MemCounter::in_memory(BinCodec)
    }

    #[test]
    fn inserts_accumulate() {
        let mut s = store();
        let t0 = 1_000;
        s.insert(Record::new(0, Some(1), t0), 0).unwrap();
        s.insert(Record::new(1, Some(1), t0), 1).unwrap();
        s.insert(Record::new(2, Some(1), t0), 2).unwrap();
        assert_eq!(s.len(), 3);

        s.insert(Record::new(2, Some(1), t0 + 10), 3).unwrap();
        let r = s.get(&2).unwrap();
        assert_eq!(r.value(), Some(&2));
        assert_eq!(r.event_time(), t0 + 10);
    }

    #[test]
    fn stale_update_still_counts_but_keeps_newest_time() {
        let mut s = store();
        let t0 = 1_000;
        s.insert(Record::new(2, Some(2), t0 + 10), 0).unwrap();
        s.insert(Record::new(2, Some(2), t0), 1).unwrap();

        let r = s.get(&2).unwrap();
        assert_eq!(r.value(), Some(&4));
        assert_eq!(r.event_time(), t0 + 10);
    }

    #[test]
    fn negative_deltas_subtract() {
        let mut s = store();
        s.insert(Record::new(0, Some(1), 10), 0).unwrap();
        s.insert(Record::new(0, Some(-2), 10), 1).unwrap();
        assert_eq!(s.get(&0).unwrap().value(), Some(&-1));
    }

    #[test]
    fn stale_tombstone_is_refused() {
        let mut s = store();
        let t0 = 1_000;
        s.insert(Record::new(2, Some(4), t0 + 10), 0).unwrap();

        s.insert(Record::tombstone(2, t0), 1).unwrap();
        assert_eq!(s.get(&2).unwrap().value(), Some(&4));

        s.insert(Record::tombstone(2, t0 + 30), 2).unwrap();
        assert!(s.get(&2).is_none());
    }

    #[test]
    fn counters_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut s = MemCounter::open(dir.path(), BinCodec).unwrap();
            s.insert(Record::new(7, Some(3), 100), 4).unwrap();
            s.commit(true).unwrap();
        }
        let s = MemCounter::<i32, _>::open(dir.path(), BinCodec).unwrap();
        let r = s.get(&7).unwrap();
        assert_eq!(r.value(), Some(&3));
        assert_eq!(r.event_time(), 100);
        assert_eq!(s.offset(), 4);
    }
}
