//! Hash-map store with snapshot persistence.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use crate::codec::Codec;
use crate::record::Record;
use crate::stores::{NO_OFFSET, StateStore, StoreError};

const SNAPSHOT_FILE: &str = "snapshot.bin";

/// In-memory keyed store. `insert` replaces by key, a tombstone removes;
/// `commit(true)` writes a codec-encoded snapshot plus the offset sidecar
/// when the store was opened with a directory.
pub struct MemKv<K, V, KC, VC> {
    entries: HashMap<K, (V, i64)>,
    dir: Option<PathBuf>,
    key_codec: KC,
    value_codec: VC,
    current_offset: i64,
}

impl<K, V, KC, VC> MemKv<K, V, KC, VC>
where
    K: Hash + Eq + Clone,
    V: Clone,
    KC: Codec<K>,
    VC: Codec<V>,
{
    /// A store with no persistence.
    pub fn in_memory(key_codec: KC, value_codec: VC) -> Self {
        Self {
            entries: HashMap::new(),
            dir: None,
            key_codec,
            value_codec,
            current_offset: NO_OFFSET,
        }
    }

    /// Open (or create) a persistent store under `dir`, loading any
    /// existing snapshot and committed offset.
    pub fn open(dir: &Path, key_codec: KC, value_codec: VC) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let mut store = Self {
            entries: HashMap::new(),
            dir: Some(dir.to_path_buf()),
            key_codec,
            value_codec,
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
            let key_bytes = read_chunk(&bytes, &mut pos)?;
            let event_time = read_i64(&bytes, &mut pos)?;
            let value_bytes = read_chunk(&bytes, &mut pos)?;
            let key = self.key_codec.decode_all(key_bytes)?;
            let value = self.value_codec.decode_all(value_bytes)?;
            self.entries.insert(key, (value, event_time));
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
        for (key, (value, event_time)) in &self.entries {
            let mut key_bytes = Vec::new();
            self.key_codec.encode(key, &mut key_bytes)?;
            let mut value_bytes = Vec::new();
            self.value_codec.encode(value, &mut value_bytes)?;
            write_chunk(&mut out, &key_bytes);
            out.extend_from_slice(&event_time.to_le_bytes());
            write_chunk(&mut out, &value_bytes);
        }
        super::write_data_file(dir, SNAPSHOT_FILE, &out)?;
        super::write_offset_file(dir, self.current_offset)?;
        Ok(())
    }
}

impl<K, V, KC, VC> StateStore<K, V> for MemKv<K, V, KC, VC>
where
    K: Hash + Eq + Clone,
    V: Clone,
    KC: Codec<K>,
    VC: Codec<V>,
{
    fn insert(&mut self, record: Record<K, V>, offset: i64) -> Result<(), StoreError> {
        let (key, value, event_time) = record.into_parts();
        match value {
            Some(v) => {
                let merged_time = self
                    .entries
                    .get(&key)
                    .map_or(event_time, |(_, t)| event_time.max(*t));
                self.entries.insert(key, (v, merged_time));
            }
            None => {
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

    fn get(&self, key: &K) -> Option<Record<K, V>> {
        self.entries
            .get(key)
            .map(|(v, t)| Record::new(key.clone(), Some(v.clone()), *t))
    }

    fn for_each(&self, f: &mut dyn FnMut(&Record<K, V>)) {
        for (key, (value, event_time)) in &self.entries {
            f(&Record::new(key.clone(), Some(value.clone()), *event_time));
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

fn write_chunk(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_chunk<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8], StoreError> {
    let len_bytes: [u8; 4] = buf
        .get(*pos..*pos + 4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StoreError::Corrupt("truncated chunk length".to_string()))?;
    *pos += 4;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let chunk = buf
        .get(*pos..*pos + len)
        .ok_or_else(|| StoreError::Corrupt("truncated chunk".to_string()))?;
    *pos += len;
    Ok(chunk)
}

fn read_i64(buf: &[u8], pos: &mut usize) -> Result<i64, StoreError> {
    let bytes: [u8; 8] = buf
        .get(*pos..*pos + 8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StoreError::Corrupt("truncated i64".to_string()))?;
    *pos += 8;
    Ok(i64::from_le_bytes(bytes))
}
