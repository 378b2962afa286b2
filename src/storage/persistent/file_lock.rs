//! Exclusive ownership of a data directory.
//!
//! Passes assume nobody else appends to the journal, so a directory is owned
//! by one process at a time through an advisory OS lock on `<dir>/.lock`.
//! The owner's pid is written into the file to help whoever finds it locked.

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".lock";

/// Directory lock, released on drop when the file handle closes.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _handle: File,
}

impl FileLock {
    /// Takes the lock on `dir` or fails immediately.
    ///
    /// # Errors
    ///
    /// `ErrorKind::WouldBlock` when the directory is already owned.
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let path = dir.join(LOCK_FILE);
        let mut handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        lock_exclusive(&handle)?;

        handle.set_len(0)?;
        writeln!(handle, "{}", std::process::id())?;
        Ok(Self { path, _handle: handle })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn already_locked(detail: impl std::fmt::Display) -> IoError {
    IoError::new(ErrorKind::WouldBlock, format!("data directory is owned by another process ({detail})"))
}

#[cfg(unix)]
fn lock_exclusive(handle: &File) -> IoResult<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor stays open for the duration of the call.
    let rc = unsafe { libc::flock(handle.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(());
    }
    let err = IoError::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK => Err(already_locked("flock")),
        _ => Err(err),
    }
}

#[cfg(windows)]
fn lock_exclusive(handle: &File) -> IoResult<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::{LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};
    use windows_sys::Win32::System::IO::OVERLAPPED;

    // SAFETY: the handle belongs to `handle`; OVERLAPPED is plain data.
    let ok = unsafe {
        let mut overlapped: OVERLAPPED = std::mem::zeroed();
        LockFileEx(
            handle.as_raw_handle() as HANDLE,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if ok == 0 {
        return Err(already_locked(IoError::last_os_error()));
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn lock_exclusive(_handle: &File) -> IoResult<()> {
    Err(IoError::new(ErrorKind::Unsupported, "directory locking is not available on this platform"))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_second_owner_is_refused() {
        let dir = tempdir().unwrap();
        let lock = FileLock::acquire(dir.path()).unwrap();
        let pid = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());

        let err = FileLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);

        drop(lock);
        assert!(FileLock::acquire(dir.path()).is_ok());
    }
}
