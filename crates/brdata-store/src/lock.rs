//! Advisory lock files for serializing cache mutations.
//!
//! The lock is a sibling `<file>.lock` created with `create_new`, so only
//! one holder (across processes) can exist at a time. It is removed when the
//! guard drops. A lock left behind by a crashed process stays busy until it
//! is removed by hand; the error names its path.

use crate::error::StoreError;
use chrono::Utc;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// `<path>.lock`
pub fn lock_path(path: &Path) -> PathBuf {
    let mut lock: OsString = path.as_os_str().to_os_string();
    lock.push(".lock");
    PathBuf::from(lock)
}

/// How long to wait for a busy lock before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl LockPolicy {
    /// Fail immediately when the lock is held.
    pub const NO_WAIT: Self = Self {
        attempts: 1,
        delay: Duration::ZERO,
    };
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            attempts: 50,
            delay: Duration::from_millis(100),
        }
    }
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    lock_path: PathBuf,
    _file: File,
}

impl LockGuard {
    /// Acquire the lock guarding `path`, retrying per `policy`.
    pub fn acquire(path: &Path, policy: LockPolicy) -> Result<Self, StoreError> {
        let lock_path = lock_path(path);
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| StoreError::lock_io(&lock_path, e))?;
        }

        let attempts = policy.attempts.max(1);
        for attempt in 1..=attempts {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let _ = writeln!(
                        file,
                        "pid={}\nutc={}",
                        std::process::id(),
                        Utc::now().to_rfc3339()
                    );
                    return Ok(Self {
                        lock_path,
                        _file: file,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt < attempts {
                        tracing::debug!(
                            lock = %lock_path.display(),
                            attempt,
                            "cache lock busy; waiting"
                        );
                        thread::sleep(policy.delay);
                    }
                }
                Err(err) => return Err(StoreError::lock_io(&lock_path, err)),
            }
        }

        Err(StoreError::LockBusy {
            lock_path: lock_path.display().to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "brdata-lock-{prefix}-{}-{unique}.json",
            std::process::id()
        ))
    }

    #[test]
    fn second_acquire_reports_busy_until_first_drops() {
        let path = temp_file("busy");
        let guard = LockGuard::acquire(&path, LockPolicy::NO_WAIT).expect("first acquire");
        assert!(guard.path().exists());

        match LockGuard::acquire(&path, LockPolicy::NO_WAIT) {
            Err(StoreError::LockBusy { lock_path }) => {
                assert!(lock_path.ends_with(".json.lock"));
            }
            other => panic!("expected lock busy, got {other:?}"),
        }

        drop(guard);
        assert!(!lock_path(&path).exists());
        let again = LockGuard::acquire(&path, LockPolicy::NO_WAIT).expect("re-acquire");
        drop(again);
    }

    #[test]
    fn acquire_waits_for_release() {
        let path = temp_file("wait");
        let guard = LockGuard::acquire(&path, LockPolicy::NO_WAIT).expect("first acquire");

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(guard);
        });

        let policy = LockPolicy {
            attempts: 100,
            delay: Duration::from_millis(10),
        };
        let second = LockGuard::acquire(&path, policy).expect("acquire after release");
        releaser.join().expect("releaser thread");
        drop(second);
    }
}
