//! Run lock: one process at a time may touch the ledger.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

/// Exclusive lock file, removed when dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create the lock file, failing if another run holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                anyhow::bail!(
                    "Another run holds the ledger lock {} ({}). Remove it if that run is gone.",
                    path.display(),
                    holder.trim()
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create lock file {}", path.display()))
            }
        };

        let lock = Self {
            path: path.to_path_buf(),
        };
        lock.stamp(file)
    }

    /// Record the holder's pid. On failure the lock is dropped, which removes the file.
    fn stamp(self, mut out: impl Write) -> Result<Self> {
        writeln!(out, "pid={}", std::process::id())
            .with_context(|| format!("Failed to write lock file {}", self.path.display()))?;
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.lock");

        let first = RunLock::acquire(&path).unwrap();
        assert!(path.exists());

        let err = RunLock::acquire(&path).unwrap_err();
        assert!(err.to_string().contains("Another run holds"));

        drop(first);
        assert!(!path.exists());
        assert!(RunLock::acquire(&path).is_ok());
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_pid_write_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.lock");
        fs::write(&path, "").unwrap();

        let lock = RunLock { path: path.clone() };
        let err = lock.stamp(BrokenWriter).unwrap_err();
        assert!(err.to_string().contains("Failed to write lock file"));
        assert!(!path.exists());

        // The next run is not blocked by a leftover file
        let lock = RunLock::acquire(&path).unwrap();
        assert!(fs::read_to_string(lock.path()).unwrap().starts_with("pid="));
    }

    #[test]
    fn test_unwritable_location() {
        let err = RunLock::acquire(Path::new("/definitely/not/here/bot.lock")).unwrap_err();
        assert!(err.to_string().contains("Failed to create lock file"));
    }
}
