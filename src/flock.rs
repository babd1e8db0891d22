//! Exclusive ownership of a tree directory.
//!
//! A tree takes an advisory lock on `<root>/LOCK` when it opens, so a second
//! process (or a second tree in the same process) cannot open the same
//! directory and interleave writes with it.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::error::{Error, Result};

/// Name of the lock file inside a tree directory.
pub const LOCK_FILE: &str = "LOCK";

pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Locks `dir`, creating its lock file if needed.
    ///
    /// Fails with `LockError` when the directory is already locked. The lock
    /// file holds the owner's process id for debugging.
    pub fn acquire<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(LOCK_FILE);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(Error::LockError)?;

        Self::try_lock(&file).map_err(Error::LockError)?;

        // Only the owner rewrites the contents.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        tracing::debug!(path = %path.display(), "Acquired directory lock");

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let result = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> io::Result<()> {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::LockFileEx;
        use winapi::um::minwinbase::OVERLAPPED;
        use winapi::um::winnt::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        let result = unsafe {
            LockFileEx(
                file.as_raw_handle() as *mut _,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                !0,
                !0,
                &mut overlapped,
            )
        };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> io::Result<()> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// The OS drops the lock when the file handle closes; the file itself stays.
