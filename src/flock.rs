//! Advisory lock file guarding a serializer directory against a second
//! process opening the same store.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

pub struct FileLock {
    // Held open for the lifetime of the lock; the OS releases the lock when
    // the handle closes.
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Create (or reuse) the lock file at `path` and take an exclusive,
    /// non-blocking lock on it. Fails if another live process holds it.
    pub fn lock<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::try_lock(&file)?;

        // Record our pid so a stuck lock can be traced to its owner.
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        if unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> io::Result<()> {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::LockFileEx;
        use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

        let ok = unsafe {
            LockFileEx(
                file.as_raw_handle() as *mut _,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                !0,
                !0,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // No advisory locking on this platform; single-instance discipline is
        // up to the operator.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_lock_records_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.lock");

        let lock = FileLock::lock(&path).expect("failed to acquire lock");
        assert_eq!(lock.path(), path.as_path());

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_second_lock_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.lock");

        let _held = FileLock::lock(&path).expect("failed to acquire lock");
        assert!(FileLock::lock(&path).is_err());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.lock");

        {
            let _lock = FileLock::lock(&path).expect("failed to acquire lock");
        }

        // Previous holder is gone, so the lock is free again.
        let _relock = FileLock::lock(&path).expect("lock should be free after drop");
    }
}
