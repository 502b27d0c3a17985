//! Key-ordered store persisted on disk.
//!
//! Keys are stored codec-encoded; iteration follows encoded-key order and a
//! `get` is a single point lookup. Each stored value carries its event time
//! as an 8-byte little-endian prefix ahead of the codec-encoded payload.
//! The data file is rewritten on `commit(true)`, with the offset sidecar
//! written after the data; the sidecar is also refreshed when the
//! uncommitted offset lag exceeds [`FLUSH_LAG`].

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::codec::Codec;
use crate::record::Record;
use crate::stores::{NO_OFFSET, StateStore, StoreError};

const DATA_FILE: &str = "data.bin";

/// Uncommitted offset lag that forces a flush on its own.
pub const FLUSH_LAG: i64 = 10_000;

/// Ordered on-disk keyed store.
pub struct OrderedKv<K, V, KC, VC> {
    /// encoded key -> event-time prefix + encoded value
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    dir: PathBuf,
    key_codec: KC,
    value_codec: VC,
    current_offset: i64,
    last_flushed_offset: i64,
    closed: bool,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V, KC, VC> OrderedKv<K, V, KC, VC>
where
    K: Clone,
    KC: Codec<K>,
    VC: Codec<V>,
{
    /// Open (or create) the store under `dir`.
    pub fn open(dir: &Path, key_codec: KC, value_codec: VC) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let mut store = Self {
            entries: BTreeMap::new(),
            dir: dir.to_path_buf(),
            key_codec,
            value_codec,
            current_offset: NO_OFFSET,
            last_flushed_offset: NO_OFFSET,
            closed: false,
            _types: PhantomData,
        };
        store.load()?;
        Ok(store)
    }

    fn load(&mut self) -> Result<(), StoreError> {
        let path = super::data_file_path(&self.dir, DATA_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let mut pos = 0;
        while pos < bytes.len() {
            let key = read_chunk(&bytes, &mut pos)?.to_vec();
            let payload = read_chunk(&bytes, &mut pos)?.to_vec();
            if payload.len() < 8 {
                return Err(StoreError::Corrupt(
                    "value shorter than its event-time prefix".to_string(),
                ));
            }
            self.entries.insert(key, payload);
        }
        if let Some(offset) = super::read_offset_file(&self.dir)? {
            self.current_offset = offset;
            self.last_flushed_offset = offset;
        }
        Ok(())
    }

    fn write_data(&mut self) -> Result<(), StoreError> {
        let mut out = Vec::new();
        for (key, payload) in &self.entries {
            write_chunk(&mut out, key);
            write_chunk(&mut out, payload);
        }
        super::write_data_file(&self.dir, DATA_FILE, &out)?;
        super::write_offset_file(&self.dir, self.current_offset)?;
        self.last_flushed_offset = self.current_offset;
        Ok(())
    }

    fn stored_time(payload: &[u8]) -> i64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&payload[..8]);
        i64::from_le_bytes(bytes)
    }

    fn decode_payload(&self, key: &K, payload: &[u8]) -> Option<Record<K, V>> {
        let event_time = Self::stored_time(payload);
        match self.value_codec.decode_all(&payload[8..]) {
            Ok(value) => Some(Record::new(key.clone(), Some(value), event_time)),
            Err(e) => {
                tracing::error!(error = %e, "ordered store payload decode failed");
                None
            }
        }
    }
}

impl<K, V, KC, VC> StateStore<K, V> for OrderedKv<K, V, KC, VC>
where
    K: Clone,
    KC: Codec<K>,
    VC: Codec<V>,
{
    fn insert(&mut self, record: Record<K, V>, offset: i64) -> Result<(), StoreError> {
        let (key, value, event_time) = record.into_parts();
        let mut key_bytes = Vec::new();
        self.key_codec.encode(&key, &mut key_bytes)?;

        match value {
            Some(v) => {
                let merged_time = self
                    .entries
                    .get(&key_bytes)
                    .map_or(event_time, |p| event_time.max(Self::stored_time(p)));
                let mut payload = merged_time.to_le_bytes().to_vec();
                self.value_codec.encode(&v, &mut payload)?;
                self.entries.insert(key_bytes, payload);
            }
            None => {
                if self
                    .entries
                    .get(&key_bytes)
                    .is_some_and(|p| event_time >= Self::stored_time(p))
                {
                    self.entries.remove(&key_bytes);
                }
            }
        }
        self.current_offset = self.current_offset.max(offset);
        Ok(())
    }

    fn get(&self, key: &K) -> Option<Record<K, V>> {
        let mut key_bytes = Vec::new();
        self.key_codec.encode(key, &mut key_bytes).ok()?;
        let payload = self.entries.get(&key_bytes)?;
        self.decode_payload(key, payload)
    }

    fn for_each(&self, f: &mut dyn FnMut(&Record<K, V>)) {
        for (key_bytes, payload) in &self.entries {
            let key = match self.key_codec.decode_all(key_bytes) {
                Ok(k) => k,
                Err(e) => {
                    tracing::error!(error = %e, "ordered store key decode failed");
                    continue;
                }
            };
            if let Some(record) = self.decode_payload(&key, payload) {
                f(&record);
            }
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
        if flush || self.current_offset - self.last_flushed_offset > FLUSH_LAG {
            self.write_data()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        self.commit(true)?;
        self.closed = true;
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TextCodec;

    fn rec(k: &str, v: Option<&str>, t: i64) -> Record<String, String> {
        Record::new(k.to_string(), v.map(str::to_string), t)
    }

    #[test]
    fn iteration_is_key_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = OrderedKv::open(dir.path(), TextCodec, TextCodec).unwrap();
        s.insert(rec("banana", Some("2"), 1), 0).unwrap();
        s.insert(rec("apple", Some("1"), 2), 1).unwrap();
        s.insert(rec("cherry", Some("3"), 3), 2).unwrap();

        let mut keys = Vec::new();
        s.for_each(&mut |r| keys.push(r.key().clone()));
        assert_eq!(keys, vec!["apple", "banana", "cherry"]);
    }

    #[test]
    fn get_returns_value_and_event_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = OrderedKv::open(dir.path(), TextCodec, TextCodec).unwrap();
        s.insert(rec("k", Some("v"), 77), 0).unwrap();

        let r = s.get(&"k".to_string()).unwrap();
        assert_eq!(r.value().map(String::as_str), Some("v"));
        assert_eq!(r.event_time(), 77);
    }

    #[test]
    fn tombstone_respects_event_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = OrderedKv::open(dir.path(), TextCodec, TextCodec).unwrap();
        s.insert(rec("k", Some("v"), 100), 0).unwrap();
        s.insert(rec("k", None, 99), 1).unwrap();
        assert!(s.get(&"k".to_string()).is_some());
        s.insert(rec("k", None, 100), 2).unwrap();
        assert!(s.get(&"k".to_string()).is_none());
    }

    #[test]
    fn data_and_offset_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut s = OrderedKv::open(dir.path(), TextCodec, TextCodec).unwrap();
            s.insert(rec("a", Some("1"), 10), 41).unwrap();
            s.insert(rec("b", Some("2"), 20), 42).unwrap();
            s.commit(true).unwrap();
        }
        let s = OrderedKv::<String, String, _, _>::open(dir.path(), TextCodec, TextCodec).unwrap();
        assert_eq!(s.offset(), 42);
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(&"a".to_string()).unwrap().event_time(), 10);
    }

    #[test]
    fn event_time_prefix_is_little_endian_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut s = OrderedKv::open(dir.path(), TextCodec, TextCodec).unwrap();
            s.insert(rec("k", Some("v"), 1), 0).unwrap();
            s.commit(true).unwrap();
        }
        let bytes = std::fs::read(dir.path().join("data.bin")).unwrap();
        // u32 klen | "k" | u32 vlen | i64 time | "v"
        assert_eq!(&bytes[..4], &1u32.to_le_bytes());
        assert_eq!(bytes[4], b'k');
        assert_eq!(&bytes[5..9], &9u32.to_le_bytes());
        assert_eq!(&bytes[9..17], &1i64.to_le_bytes());
        assert_eq!(bytes[17], b'v');
    }

    #[test]
    fn commit_without_flush_keeps_old_offset_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = OrderedKv::open(dir.path(), TextCodec, TextCodec).unwrap();
        s.insert(rec("a", Some("1"), 1), 5).unwrap();
        s.commit(false).unwrap();
        assert_eq!(super::super::read_offset_file(dir.path()).unwrap(), None);
        s.commit(true).unwrap();
        assert_eq!(super::super::read_offset_file(dir.path()).unwrap(), Some(5));
    }
}
