//! Cross-process Lock Module
//!
//! Binary lock shared by every process attached to a segment, implemented as
//! an exclusive `flock(2)` on a named lock file.
//!
//! `flock` locks belong to an open file description, so each worker must
//! open the lock file itself (by attaching) rather than inherit the
//! descriptor of another process. The kernel drops the lock when the holder
//! exits, including on a crash.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

// == File Lock ==
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    /// Creates a new lock file in the available state.
    ///
    /// Fails if the file already exists.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Opens the lock file, creating it if missing.
    pub fn open_or_create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    /// Opens an existing lock file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// Blocks until the exclusive lock is held.
    pub fn lock_exclusive(&self) -> io::Result<()> {
        flock(&self.file, libc::LOCK_EX)
    }

    /// Takes the exclusive lock if it is free; returns whether it was taken.
    pub fn try_lock_exclusive(&self) -> io::Result<bool> {
        match flock(&self.file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn unlock(&self) -> io::Result<()> {
        flock(&self.file, libc::LOCK_UN)
    }
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
