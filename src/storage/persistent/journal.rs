//! Append-only raw record journal.
//!
//! Every changed raw record is framed and appended before it becomes
//! visible in memory. On open the journal is scanned front to back; a
//! truncated or corrupt tail (a crash mid-append) ends the scan and is cut
//! off so later appends stay readable.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec frame of JournalEntry]
//! [ENTRY 2: codec frame of JournalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::codec;
use crate::raw::RawRecord;

const HEADER_LEN: u64 = 5;

/// One journaled raw record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    pub written_at: DateTime<Utc>,
    pub record: RawRecord,
}

/// What a journal scan found on open.
#[derive(Debug, Default)]
pub struct Recovery {
    /// Valid entries in append order.
    pub entries: Vec<JournalEntry>,
    /// Bytes of torn or corrupt tail that were cut off.
    pub discarded_bytes: u64,
}

struct Writer {
    out: BufWriter<File>,
    sequence: u64,
}

/// Append-only journal of raw records.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<Writer>,
    sync_on_write: bool,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

impl Journal {
    /// Opens or creates the journal at `path` and returns its valid entries.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Recovery)> {
        let existing = path.exists() && std::fs::metadata(path)?.len() > 0;
        if !existing {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
        }

        let recovery = scan_and_repair(path)?;
        let sequence = recovery.entries.last().map_or(0, |e| e.sequence);

        let file = OpenOptions::new().append(true).open(path)?;
        let journal = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Writer {
                out: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        };
        Ok((journal, recovery))
    }

    /// Appends `record` and returns its sequence number.
    pub fn append(&self, record: &RawRecord) -> IoResult<u64> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| IoError::new(ErrorKind::Other, "poisoned lock: journal.append"))?;

        let sequence = writer.sequence + 1;
        let entry = JournalEntry {
            sequence,
            written_at: Utc::now(),
            record: record.clone(),
        };
        let encoded = codec::encode(&entry)?;

        writer.out.write_all(&encoded)?;
        writer.out.flush()?;
        if self.sync_on_write {
            writer.out.get_ref().sync_data()?;
        }
        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Sequence number of the last appended entry.
    pub fn sequence(&self) -> IoResult<u64> {
        self.writer
            .lock()
            .map(|w| w.sequence)
            .map_err(|_| IoError::new(ErrorKind::Other, "poisoned lock: journal.sequence"))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

fn scan_and_repair(path: &Path) -> IoResult<Recovery> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;

    let mut recovery = Recovery::default();
    let mut valid_end = HEADER_LEN;
    while valid_end < file_len {
        match codec::decode::<JournalEntry>(&mut reader) {
            Ok(entry) => {
                recovery.entries.push(entry);
                valid_end = reader.stream_position()?;
            }
            Err(err) if matches!(err.kind(), ErrorKind::UnexpectedEof | ErrorKind::InvalidData) => {
                warn!(
                    path = %path.display(),
                    offset = valid_end,
                    error = %err,
                    "journal tail is torn or corrupt; replay stops at the last valid entry"
                );
                break;
            }
            Err(err) => return Err(err),
        }
    }
    drop(reader);

    if valid_end < file_len {
        recovery.discarded_bytes = file_len - valid_end;
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_end)?;
        file.sync_all()?;
    }
    Ok(recovery)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::change::ChangeDetector;
    use crate::entity::EntityType;
    use crate::raw::RawRecordId;
    use crate::source::SourceSystem;

    fn record(external_id: &str) -> RawRecord {
        let payload: BTreeMap<String, serde_json::Value> =
            [("uniqname".to_string(), json!(external_id))].into_iter().collect();
        RawRecord {
            id: RawRecordId::new(),
            entity_type: EntityType::Person,
            source_system: SourceSystem::Directory,
            external_id: external_id.to_string(),
            content_hash: ChangeDetector::default().content_hash(&payload),
            payload,
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.journal");
        {
            let (journal, recovery) = Journal::open(&path, false).unwrap();
            assert!(recovery.entries.is_empty());
            assert_eq!(journal.append(&record("a")).unwrap(), 1);
            assert_eq!(journal.append(&record("b")).unwrap(), 2);
        }
        let (journal, recovery) = Journal::open(&path, false).unwrap();
        assert_eq!(recovery.entries.len(), 2);
        assert_eq!(recovery.entries[1].record.external_id, "b");
        assert_eq!(journal.sequence().unwrap(), 2);
    }

    #[test]
    fn test_torn_tail_is_cut_and_appends_continue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw.journal");
        {
            let (journal, _) = Journal::open(&path, false).unwrap();
            journal.append(&record("a")).unwrap();
            journal.append(&record("b")).unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 3).unwrap();

        {
            let (journal, recovery) = Journal::open(&path, false).unwrap();
            assert_eq!(recovery.entries.len(), 1);
            assert!(recovery.discarded_bytes > 0);
            assert_eq!(journal.append(&record("c")).unwrap(), 2);
        }
        let (_, recovery) = Journal::open(&path, false).unwrap();
        let ids: Vec<&str> = recovery.entries.iter().map(|e| e.record.external_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
