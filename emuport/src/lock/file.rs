//! flock-backed mutex used as the cross-process arbiter for a single key.
//!
//! The arbiter file itself carries no data. Whoever holds the exclusive
//! flock on it may read and write the record the key protects. The kernel
//! drops the lock when the holder exits or crashes, so a dead process can
//! never wedge a key.
//!
//! An idle arbiter file may be unlinked by its holder. Every acquisition
//! therefore checks, once locked, that the path still names the inode it
//! locked, and starts over on a fresh file otherwise.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use emuport_shared::errors::{EmuportError, EmuportResult};

/// A guard that holds an exclusive flock on an arbiter file.
///
/// The lock is released when this guard is dropped, or when the process
/// exits/crashes.
#[derive(Debug)]
pub struct FileMutex {
    file: File,
    path: PathBuf,
}

impl FileMutex {
    /// Take the lock without waiting.
    ///
    /// # Returns
    /// * `Ok(Some(FileMutex))` - Lock acquired
    /// * `Ok(None)` - Another holder (process or thread) has it
    /// * `Err(...)` - The arbiter file could not be opened or locked
    pub fn try_acquire(path: &Path) -> EmuportResult<Option<Self>> {
        loop {
            let file = Self::open(path)?;

            match flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) => {
                    return Err(EmuportError::Storage(format!(
                        "failed to lock {}: {}",
                        path.display(),
                        err
                    )));
                }
            }

            if !is_linked_at(&file, path) {
                tracing::trace!(lock_path = %path.display(), "Arbiter was unlinked, reopening");
                continue;
            }

            tracing::trace!(lock_path = %path.display(), "Acquired file mutex");
            return Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            }));
        }
    }

    /// Take the lock, waiting for the current holder to release it.
    pub fn acquire(path: &Path) -> EmuportResult<Self> {
        loop {
            let file = Self::open(path)?;

            loop {
                match flock(&file, libc::LOCK_EX) {
                    Ok(()) => break,
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        return Err(EmuportError::Storage(format!(
                            "failed to lock {}: {}",
                            path.display(),
                            err
                        )));
                    }
                }
            }

            if !is_linked_at(&file, path) {
                tracing::trace!(lock_path = %path.display(), "Arbiter was unlinked, reopening");
                continue;
            }

            tracing::trace!(lock_path = %path.display(), "Acquired file mutex (blocking)");
            return Ok(Self {
                file,
                path: path.to_path_buf(),
            });
        }
    }

    /// Unlink the arbiter while still holding it. Waiters already blocked
    /// on the old inode notice and retry on a new file.
    pub fn unlink(&self) -> EmuportResult<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EmuportError::Storage(format!(
                "failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> EmuportResult<File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EmuportError::Storage(format!("failed to create lock dir: {}", e))
            })?;
        }

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                EmuportError::Storage(format!(
                    "failed to open lock file {}: {}",
                    path.display(),
                    e
                ))
            })
    }
}

impl Drop for FileMutex {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock; unlock explicitly anyway
        let _ = flock(&self.file, libc::LOCK_UN);
        tracing::trace!(lock_path = %self.path.display(), "Released file mutex");
    }
}

/// Whether `path` still refers to the inode open as `file`.
#[cfg(unix)]
fn is_linked_at(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(unix)]
fn flock(file: &File, operation: libc::c_int) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn is_linked_at(_file: &File, _path: &Path) -> bool {
    true
}

#[cfg(not(unix))]
fn flock(_file: &File, _operation: i32) -> std::io::Result<()> {
    compile_error!("file mutexes are only implemented for unix targets");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_try_acquire() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("port-2222.lock");
        let lock = FileMutex::try_acquire(&path).unwrap().unwrap();

        assert!(lock.path().exists());
        assert_eq!(lock.path(), path);
    }

    #[test]
    fn test_second_holder_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("port-2222.lock");

        let _held = FileMutex::try_acquire(&path).unwrap().unwrap();
        assert!(FileMutex::try_acquire(&path).unwrap().is_none());
    }

    #[test]
    fn test_released_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("port-2222.lock");

        {
            let _lock = FileMutex::try_acquire(&path).unwrap().unwrap();
        }

        assert!(FileMutex::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_refused_across_threads() {
        let temp_dir = TempDir::new().unwrap();
        let path = Arc::new(temp_dir.path().join("port-2222.lock"));

        let _held = FileMutex::try_acquire(&path).unwrap().unwrap();

        let path_clone = Arc::clone(&path);
        let handle = thread::spawn(move || FileMutex::try_acquire(&path_clone).unwrap());
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn test_blocking_acquire_waits_for_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("instance-a.lock");

        let held = FileMutex::acquire(&path).unwrap();
        let path_clone = path.clone();
        let waiter = thread::spawn(move || {
            let _lock = FileMutex::acquire(&path_clone).unwrap();
        });

        thread::sleep(std::time::Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(held);
        waiter.join().unwrap();
    }

    #[test]
    fn test_unlinked_arbiter_is_recreated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("instance-gone.lock");

        let held = FileMutex::acquire(&path).unwrap();
        let path_clone = path.clone();
        let waiter = thread::spawn(move || FileMutex::acquire(&path_clone).unwrap());

        thread::sleep(std::time::Duration::from_millis(50));
        assert!(held.unlink().unwrap());
        drop(held);

        let relocked = waiter.join().unwrap();
        assert!(path.exists());
        // A newcomer contends on the same, recreated file
        assert!(FileMutex::try_acquire(&path).unwrap().is_none());
        drop(relocked);
        assert!(FileMutex::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_different_keys_independent() {
        let temp_dir = TempDir::new().unwrap();

        let _a = FileMutex::try_acquire(&temp_dir.path().join("port-1.lock")).unwrap();
        let b = FileMutex::try_acquire(&temp_dir.path().join("port-2.lock")).unwrap();
        assert!(b.is_some());
    }
}
