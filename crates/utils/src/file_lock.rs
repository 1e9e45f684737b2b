//! Advisory file lock shared between processes using the same cache directory

use cachetier_core::{CrossProcessLock, Error, LockState, Result};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An exclusive lock on a file whose contents carry the published [`LockState`].
///
/// Every owner that mutates the guarded store publishes a new version on
/// release, so the next owner (in this or another process) can tell whether
/// anything changed since it last held the lock.
#[derive(Debug)]
pub struct FileLock {
    lock_path: PathBuf,
    held: Mutex<Option<File>>,
}

impl FileLock {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: lock_path.into(),
            held: Mutex::new(None),
        }
    }

    /// Get the path of the underlying lock file
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Whether this handle currently owns the lock
    pub fn is_held(&self) -> bool {
        self.held.lock().is_some()
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(parent, "create lock directory", e))?;
        }

        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| Error::io(&self.lock_path, "open lock file", e))
    }

    fn read_state(&self, file: &mut File) -> Result<LockState> {
        let mut contents = String::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_string(&mut contents))
            .map_err(|e| Error::io(&self.lock_path, "read lock state", e))?;

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(LockState::INITIAL);
        }

        match trimmed.parse::<u64>() {
            Ok(version) => Ok(LockState::from_version(version)),
            Err(_) => {
                // Unreadable state: hand out a fresh one so every reader
                // treats the store as changed.
                tracing::warn!(
                    lock = %self.lock_path.display(),
                    "Unreadable lock state, resetting"
                );
                Ok(LockState::INITIAL)
            }
        }
    }

    fn write_state(&self, file: &mut File, state: LockState) -> io::Result<()> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", state.version())?;
        file.sync_data()
    }
}

impl CrossProcessLock for FileLock {
    fn try_acquire(&self) -> Result<Option<LockState>> {
        let mut held = self.held.lock();
        if held.is_some() {
            // Already ours through this handle; the caller is expected to
            // track re-entrancy itself.
            return Ok(None);
        }

        let mut file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(Error::io(&self.lock_path, "lock", e)),
        }

        match self.read_state(&mut file) {
            Ok(state) => {
                *held = Some(file);
                Ok(Some(state))
            }
            Err(e) => {
                let _ = fs2::FileExt::unlock(&file);
                Err(e)
            }
        }
    }

    fn release(&self, new_state: LockState) -> Result<()> {
        let mut file = self.held.lock().take().ok_or_else(|| Error::LockNotHeld {
            lock: self.display_name(),
        })?;

        let written = self
            .write_state(&mut file, new_state)
            .map_err(|e| Error::io(&self.lock_path, "publish lock state", e));
        let unlocked = fs2::FileExt::unlock(&file)
            .map_err(|e| Error::io(&self.lock_path, "unlock", e));

        written.and(unlocked)
    }

    fn display_name(&self) -> String {
        self.lock_path.display().to_string()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.held.get_mut().take() {
            let _ = fs2::FileExt::unlock(&file);
        }
    }
}
