//! Pluggable keyed state stores.
//!
//! A store's lifecycle follows its owning processor. All stores carry the
//! offset of the last applied record; after `commit(true)` that offset is
//! durable, written in an `offset.bin` sidecar after the data so a crash
//! between the two never claims progress the data does not have.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::codec::CodecError;
use crate::record::Record;

pub mod mem_counter;
pub mod mem_kv;
pub mod ordered_kv;
pub mod token_bucket;
pub mod windowed;

pub use mem_counter::MemCounter;
pub use mem_kv::MemKv;
pub use ordered_kv::OrderedKv;
pub use token_bucket::TokenBucket;
pub use windowed::MemWindowed;

/// Offset value of a store that has not applied anything yet.
pub const NO_OFFSET: i64 = -1;

/// Name of the sidecar file holding the committed offset.
pub const OFFSET_FILE: &str = "offset.bin";

/// Error type for state store operations. Store I/O failures are fatal to
/// the owning topology.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("corrupt store data: {0}")]
    Corrupt(String),
}

/// Keyed store of the latest record per key.
///
/// Invariants: `offset()` is monotone non-decreasing; a tombstone whose
/// event time is `>=` the stored record's erases the key; a non-tombstone
/// insert keeps the greater of the two event times.
pub trait StateStore<K, V> {
    /// Apply one record. `offset` is the source offset that produced it, or
    /// [`NO_OFFSET`] for out-of-band writes.
    fn insert(&mut self, record: Record<K, V>, offset: i64) -> Result<(), StoreError>;

    /// Latest live record for `key`.
    fn get(&self, key: &K) -> Option<Record<K, V>>;

    /// Visit every live record.
    fn for_each(&self, f: &mut dyn FnMut(&Record<K, V>));

    /// Number of live keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all data and reset the offset.
    fn clear(&mut self) -> Result<(), StoreError>;

    /// Offset of the newest applied record.
    fn offset(&self) -> i64;

    /// Mark progress up to the current offset. `flush` makes it durable
    /// before returning.
    fn commit(&mut self, flush: bool) -> Result<(), StoreError>;

    /// Flush and release. Idempotent.
    fn close(&mut self) -> Result<(), StoreError>;
}

/// Read the committed offset sidecar under `dir`, if present.
pub(crate) fn read_offset_file(dir: &Path) -> Result<Option<i64>, StoreError> {
    let path = dir.join(OFFSET_FILE);
    match std::fs::read(&path) {
        Ok(bytes) => {
            let bytes: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::Corrupt(format!("{}: bad length", path.display())))?;
            Ok(Some(i64::from_le_bytes(bytes)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write the committed offset sidecar atomically (temp file + rename).
pub(crate) fn write_offset_file(dir: &Path, offset: i64) -> Result<(), StoreError> {
    let tmp = dir.join(format!("{OFFSET_FILE}.tmp"));
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(&offset.to_le_bytes())?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, dir.join(OFFSET_FILE))?;
    Ok(())
}

/// Write `bytes` to `dir/name` atomically.
pub(crate) fn write_data_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = dir.join(format!("{name}.tmp"));
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, dir.join(name))?;
    Ok(())
}

pub(crate) fn data_file_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_offset_file(dir.path()).unwrap(), None);
        write_offset_file(dir.path(), 1234).unwrap();
        assert_eq!(read_offset_file(dir.path()).unwrap(), Some(1234));
        write_offset_file(dir.path(), -1).unwrap();
        assert_eq!(read_offset_file(dir.path()).unwrap(), Some(-1));
    }

    #[test]
    fn truncated_offset_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(OFFSET_FILE), [1, 2, 3]).unwrap();
        assert!(matches!(
            read_offset_file(dir.path()),
            Err(StoreError::Corrupt(_))
        ));
    }
}
