//! Process-level lock that marks the owner of snapshot writes.
//!
//! `postpulse-refresh` holds `postpulse-refresh.lock` for its whole lifetime.
//! The query CLI checks the same lock: when it is free the CLI may refresh
//! and persist on its own, otherwise it only reads the persisted snapshot.
//! Locks are advisory OS file locks (flock), scoped to one database path.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

const REFRESH_LOCK_FILE: &str = "postpulse-refresh.lock";

/// How the query CLI runs after checking the refresh lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum QueryRunMode {
    /// No refresher is running; the CLI may build and persist generations.
    OwnsRefresh,
    /// `postpulse-refresh` owns writes; the CLI serves the persisted snapshot.
    ReadOnly,
}

/// Held while this process is the snapshot writer for a database.
pub struct RefreshProcessGuard {
    _lock: ProcessLock,
}

/// Acquire the refresh lock, failing if another refresher holds it.
#[allow(dead_code)]
pub fn acquire_refresh_guard(db_path: &Path) -> Result<RefreshProcessGuard> {
    match try_acquire_lock(REFRESH_LOCK_FILE, db_path)? {
        Some(lock) => Ok(RefreshProcessGuard { _lock: lock }),
        None => anyhow::bail!(
            "failed to start postpulse-refresh: another refresher is already running for {}",
            db_path.display()
        ),
    }
}

/// Check the refresh lock for the query CLI.
///
/// The guard is returned alongside [`QueryRunMode::OwnsRefresh`] and must be
/// kept alive until the CLI is done writing.
#[allow(dead_code)]
pub fn check_refresh_guard(db_path: &Path) -> Result<(QueryRunMode, Option<RefreshProcessGuard>)> {
    Ok(match try_acquire_lock(REFRESH_LOCK_FILE, db_path)? {
        Some(lock) => (
            QueryRunMode::OwnsRefresh,
            Some(RefreshProcessGuard { _lock: lock }),
        ),
        None => (QueryRunMode::ReadOnly, None),
    })
}

struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

fn try_acquire_lock(filename: &str, db_path: &Path) -> Result<Option<ProcessLock>> {
    let dir = lock_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create lock directory: {}", dir.display()))?;

    let path = dir.join(scoped_lock_filename(filename, db_path));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file: {}", path.display()))?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();

            tracing::debug!(path = %path.display(), "Acquired refresh lock");
            Ok(Some(ProcessLock { file, path }))
        }
        Err(e) if is_lock_busy(&e) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("postpulse");
    dir
}

/// One lock file per database, so separate data directories never contend.
fn scoped_lock_filename(base_filename: &str, db_path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    db_path.to_string_lossy().hash(&mut hasher);
    format!("{base_filename}.{:016x}", hasher.finish())
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("postpulse process locks currently require Unix (macOS/Linux)");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_refresher_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("locktest.db");

        let guard = acquire_refresh_guard(&db_path).unwrap();
        assert!(acquire_refresh_guard(&db_path).is_err());

        let (mode, held) = check_refresh_guard(&db_path).unwrap();
        assert_eq!(mode, QueryRunMode::ReadOnly);
        assert!(held.is_none());

        drop(guard);
        let (mode, held) = check_refresh_guard(&db_path).unwrap();
        assert_eq!(mode, QueryRunMode::OwnsRefresh);
        assert!(held.is_some());
    }

    #[test]
    fn test_lock_scoped_per_database() {
        let a = scoped_lock_filename(REFRESH_LOCK_FILE, Path::new("/tmp/a.db"));
        let b = scoped_lock_filename(REFRESH_LOCK_FILE, Path::new("/tmp/b.db"));
        assert_ne!(a, b);
        assert!(a.starts_with(REFRESH_LOCK_FILE));
    }
}
