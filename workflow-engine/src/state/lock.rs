//! Cross-process lock file guarding the state document
//!
//! The lock is a sibling file created with `create_new`, holding a random
//! owner token. Only the owner removes it on drop. A lock file older than the
//! staleness threshold is assumed abandoned by a crashed process and broken:
//! it is renamed aside first, and only discarded if the renamed file still
//! holds the owner seen when it was judged stale.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

use crate::error::{EngineError, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Held lock; released when dropped
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    token: String,
}

impl FileLock {
    /// Acquire the lock at `path`, retrying until `timeout` is spent
    pub fn acquire(path: &Path, timeout: Duration, stale_after: Duration) -> Result<Self> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + timeout;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(file) => {
                    write_owner(path, file, &token)?;
                    tracing::trace!(lock = %path.display(), "Acquired state lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(observed) = stale_owner(path, stale_after) {
                        break_stale(path, &observed);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(EngineError::storage(
                            path,
                            format!("timed out after {:?} waiting for state lock", timeout),
                            std::io::Error::new(ErrorKind::WouldBlock, "lock held by another process"),
                        ));
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(EngineError::storage(path, "failed to create lock file", e));
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Our lock may have been broken as stale and re-taken by someone else
        let owned = std::fs::read_to_string(&self.path)
            .map(|contents| contents.starts_with(&self.token))
            .unwrap_or(false);
        if owned {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(lock = %self.path.display(), error = %e, "Failed to release state lock");
            }
        }
    }
}

/// Record the owner token in a freshly created lock file
///
/// On failure the file is removed so it cannot block writers until it
/// turns stale.
fn write_owner(path: &Path, mut file: impl Write, token: &str) -> Result<()> {
    if let Err(e) = writeln!(file, "{} {}", token, std::process::id()).and_then(|_| file.flush()) {
        drop(file);
        let _ = std::fs::remove_file(path);
        return Err(EngineError::storage(path, "failed to write lock file", e));
    }
    Ok(())
}

/// Contents of the lock at `path` if it is stale
///
/// Contents are read before the age check, so a lock re-taken in between
/// shows up as fresh.
fn stale_owner(path: &Path, stale_after: Duration) -> Option<String> {
    let observed = std::fs::read_to_string(path).ok()?;
    is_stale(path, stale_after).then_some(observed)
}

/// Remove an abandoned lock without deleting one re-taken meanwhile
fn break_stale(path: &Path, observed: &str) {
    let aside = aside_path(path);
    if std::fs::rename(path, &aside).is_err() {
        return;
    }

    let moved = std::fs::read_to_string(&aside).unwrap_or_default();
    if moved == observed {
        tracing::warn!(lock = %path.display(), "Breaking stale state lock");
    } else if let Err(e) = std::fs::hard_link(&aside, path) {
        // A live lock was moved aside and a third writer already took the slot
        tracing::warn!(lock = %path.display(), error = %e, "Failed to restore live state lock");
    }
    let _ = std::fs::remove_file(&aside);
}

/// `state.json.lock` -> `state.json.lock.stale-<uuid>`
fn aside_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".stale-{}", Uuid::new_v4()));
    path.with_file_name(name)
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age >= stale_after)
        .unwrap_or(false)
}
