//! Append-only flat-file store for encrypted log records.
//!
//! The backing file carries no header, no record-length prefix, and no
//! version tag: it is a plain concatenation of 80-byte records, so its length
//! is a multiple of 80 under correct operation. A trailing partial record
//! indicates a torn write and is surfaced by the dump path instead of being
//! silently dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::record::{LogRecord, RECORD_LEN};

/// Storage failures on the backing file. Each call opens, acts, and closes
/// the file on its own; there is no state to roll back and no built-in retry.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to write record to {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("log file {} length {len} is not a multiple of {RECORD_LEN} bytes (torn write)", path.display())]
    TornWrite { path: PathBuf, len: u64 },
}

/// Append-only record store over one backing file.
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
}

impl LogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record: open in append mode, write the 80 bytes, close.
    /// A failed or short write is reported as-is; retrying is the caller's
    /// decision.
    pub fn append(&self, record: &LogRecord) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|source| StoreError::Open {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(&record.to_bytes())
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })
    }

    /// Truncate the backing file to zero length. Irreversible.
    pub fn clear(&self) -> Result<(), StoreError> {
        File::create(&self.path).map_err(|source| StoreError::Open {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), "log cleared");
        Ok(())
    }

    /// Lazily read the log back as hex-rendered record chunks.
    ///
    /// A missing backing file yields an empty dump ("no data"), not an
    /// error. The sequence is finite and not restartable; call again for a
    /// fresh pass.
    pub fn dump_hex(&self) -> Result<HexDump, StoreError> {
        match File::open(&self.path) {
            Ok(file) => Ok(HexDump {
                source: Some(file),
                path: self.path.clone(),
                consumed: 0,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HexDump {
                source: None,
                path: self.path.clone(),
                consumed: 0,
            }),
            Err(source) => Err(StoreError::Open {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Lazy iterator over the stored records, one hex string per 80-byte record.
///
/// Record offsets are implicit: record `i` occupies bytes `[i * 80, (i+1) * 80)`
/// of the backing file.
#[derive(Debug)]
pub struct HexDump {
    source: Option<File>,
    path: PathBuf,
    consumed: u64,
}

impl Iterator for HexDump {
    type Item = Result<String, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let file = self.source.as_mut()?;
        let mut chunk = [0u8; RECORD_LEN];
        let mut filled = 0usize;

        while filled < RECORD_LEN {
            match file.read(&mut chunk[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    self.source = None;
                    return Some(Err(StoreError::Read {
                        path: self.path.clone(),
                        source,
                    }));
                }
            }
        }

        if filled == 0 {
            self.source = None;
            return None;
        }
        if filled < RECORD_LEN {
            // Trailing partial record: the file was torn mid-append.
            let len = self.consumed + filled as u64;
            self.source = None;
            return Some(Err(StoreError::TornWrite {
                path: self.path.clone(),
                len,
            }));
        }

        self.consumed += RECORD_LEN as u64;
        Some(Ok(hex::encode(chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_record(fill: u8) -> LogRecord {
        let mut bytes = [0u8; RECORD_LEN];
        bytes.iter_mut().enumerate().for_each(|(i, byte)| {
            *byte = fill.wrapping_add(i as u8);
        });
        record_from_bytes(&bytes)
    }

    fn record_from_bytes(bytes: &[u8; RECORD_LEN]) -> LogRecord {
        // Build through the public codec surface: iv || ciphertext.
        let mut iv = [0u8; 16];
        let mut ciphertext = [0u8; 64];
        iv.copy_from_slice(&bytes[..16]);
        ciphertext.copy_from_slice(&bytes[16..]);
        LogRecord::from_parts(iv, ciphertext)
    }

    fn store() -> (tempfile::TempDir, LogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().join("enc_log.bin"));
        (dir, store)
    }

    #[test]
    fn appends_grow_by_record_size() {
        let (_dir, store) = store();
        for i in 0..3u8 {
            store.append(&sample_record(i)).unwrap();
        }
        let len = fs::metadata(store.path()).unwrap().len();
        assert_eq!(len, 3 * RECORD_LEN as u64);
    }

    #[test]
    fn dump_renders_each_record_as_one_chunk() {
        let (_dir, store) = store();
        let record = sample_record(0x10);
        store.append(&record).unwrap();

        let chunks: Vec<String> = store.dump_hex().unwrap().map(Result::unwrap).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], hex::encode(record.to_bytes()));
        assert_eq!(chunks[0].len(), RECORD_LEN * 2);
    }

    #[test]
    fn missing_file_dumps_as_empty() {
        let (_dir, store) = store();
        assert_eq!(store.dump_hex().unwrap().count(), 0);
    }

    #[test]
    fn clear_resets_then_append_restarts() {
        let (_dir, store) = store();
        store.append(&sample_record(1)).unwrap();
        store.append(&sample_record(2)).unwrap();

        store.clear().unwrap();
        assert_eq!(store.dump_hex().unwrap().count(), 0);
        assert_eq!(fs::metadata(store.path()).unwrap().len(), 0);

        store.append(&sample_record(3)).unwrap();
        let chunks: Vec<String> = store.dump_hex().unwrap().map(Result::unwrap).collect();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn torn_write_is_flagged_not_truncated() {
        let (_dir, store) = store();
        store.append(&sample_record(5)).unwrap();
        // Simulate a torn append: 20 stray bytes past the last full record.
        let mut raw = fs::read(store.path()).unwrap();
        raw.extend_from_slice(&[0xEE; 20]);
        fs::write(store.path(), &raw).unwrap();

        let mut dump = store.dump_hex().unwrap();
        assert!(dump.next().unwrap().is_ok());
        let torn = dump.next().unwrap().unwrap_err();
        assert!(matches!(
            torn,
            StoreError::TornWrite { len, .. } if len == RECORD_LEN as u64 + 20
        ));
        assert!(dump.next().is_none());
    }

    #[test]
    fn clear_on_missing_file_creates_an_empty_one() {
        let (_dir, store) = store();
        store.clear().unwrap();
        assert_eq!(fs::metadata(store.path()).unwrap().len(), 0);
    }
}
