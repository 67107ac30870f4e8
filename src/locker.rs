//! Per-event advisory mutual exclusion over lock files.
//!
//! One lock file per event in a configured directory, named
//! `_related_participants_finder_<eventId>.lock`. Acquisition is the atomic
//! create-if-absent of that file (`O_EXCL` semantics): an existing file means
//! another holder and yields the [`Acquired::Unavailable`] sentinel instead
//! of blocking — a blocking wait inside a process already holding its own
//! lock would self-deadlock. Retry policy (sleep and re-check) belongs to the
//! caller.
//!
//! Release closes the handle and best-effort deletes the file; a missing
//! file is fine, the next acquire simply recreates it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Creates and removes per-event lock files in one directory.
#[derive(Debug, Clone)]
pub struct EventLocker {
    dir: PathBuf,
}

/// Proof of a held lock. Holds the file open for the duration of the pass.
#[derive(Debug)]
pub struct LockHandle {
    event_id: i64,
    path: PathBuf,
    _file: File,
}

impl LockHandle {
    pub fn event_id(&self) -> i64 {
        self.event_id
    }
}

/// Outcome of a non-blocking acquisition attempt.
#[derive(Debug)]
pub enum Acquired {
    Held(LockHandle),
    Unavailable,
}

impl EventLocker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Locker rooted at the system temp directory — the default deployment.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, event_id: i64) -> PathBuf {
        self.dir
            .join(format!("_related_participants_finder_{event_id}.lock"))
    }

    /// Try to take the per-event lock without blocking.
    ///
    /// `Err` is an I/O failure (missing directory, permissions), not
    /// contention — contention is the `Unavailable` sentinel.
    pub fn acquire(&self, event_id: i64) -> io::Result<Acquired> {
        let path = self.lock_path(event_id);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Holder pid, for operators inspecting a leaked lock file.
                let _ = write!(file, "{}", std::process::id());
                log::debug!("EventLocker: acquired {}", path.display());
                Ok(Acquired::Held(LockHandle {
                    event_id,
                    path,
                    _file: file,
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                log::debug!("EventLocker: {} is held elsewhere", path.display());
                Ok(Acquired::Unavailable)
            }
            Err(e) => Err(e),
        }
    }

    /// Release a held lock: close the handle, best-effort delete the file.
    pub fn release(&self, handle: LockHandle) {
        let LockHandle { path, _file, .. } = handle;
        drop(_file);
        match fs::remove_file(&path) {
            Ok(()) => log::debug!("EventLocker: released {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "EventLocker: could not remove {} ({}); next acquire will stall until it is cleaned up",
                path.display(),
                e
            ),
        }
    }
}
