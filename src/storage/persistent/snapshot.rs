//! Whole-table snapshot files.
//!
//! A snapshot is written to a uniquely named temporary file, flushed, fsynced
//! and then renamed over the previous snapshot, so a reader or a restart sees
//! either the old table or the new one, never a partial file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::codec;

/// Writes `value` to `path` atomically.
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> IoResult<()> {
    let temp = TempFile::new(path);
    {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp.path)?;
        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer)?;
        writer.write_all(&codec::encode(value)?)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&temp.path, path)?;
    temp.disarm();
    sync_parent(path)
}

/// Reads the snapshot at `path`, or `None` if it does not exist.
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> IoResult<Option<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;
    codec::decode(&mut reader).map(Some)
}

struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(target: &Path) -> Self {
        let name = target
            .file_name()
            .map_or_else(|| "snapshot".into(), |n| n.to_string_lossy().into_owned());
        Self {
            path: target.with_file_name(format!(".{name}.tmp.{}", Uuid::new_v4())),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> IoResult<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> IoResult<()> {
    Ok(())
}
