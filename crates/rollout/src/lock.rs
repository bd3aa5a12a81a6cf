//! Per-application advisory lock.
//!
//! A deployment holds an exclusive `flock` on `<dir>/<application>.lock` for
//! its whole run. The lock is released when the [`DeploymentLock`] drops or
//! the process exits.

use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

/// An exclusive lock on one application.
#[derive(Debug)]
pub struct DeploymentLock {
    file: File,
    path: PathBuf,
}

impl DeploymentLock {
    /// Take the lock for `application`, failing if another run holds it.
    pub fn acquire(dir: &Path, application: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{application}.lock"));
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(Error::ConcurrentDeployment {
                    application: application.to_string(),
                    lock_path: path,
                });
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        log::debug!("Acquired deployment lock {}", path.display());
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeploymentLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("Failed to release {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let held = DeploymentLock::acquire(dir.path(), "web").unwrap();

        let err = DeploymentLock::acquire(dir.path(), "web").unwrap_err();
        assert!(matches!(err, Error::ConcurrentDeployment { ref application, .. } if application == "web"));

        // Other applications are independent
        let _other = DeploymentLock::acquire(dir.path(), "api").unwrap();

        drop(held);
        assert!(DeploymentLock::acquire(dir.path(), "web").is_ok());
    }

    #[test]
    fn test_lock_file_records_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DeploymentLock::acquire(&dir.path().join("nested"), "web").unwrap();
        let content = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }
}
