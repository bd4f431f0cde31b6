//! Per-date run lock.

use chrono::NaiveDate;
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Result, ScreenerError};

/// Exclusive lock on `locks/<YYYY-MM-DD>.lock`, released on drop.
///
/// A second attempt for the same date fails immediately with
/// [`ScreenerError::RunAlreadyInProgress`] instead of waiting.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
    run_date: NaiveDate,
}

impl RunLock {
    pub fn acquire(dir: &Path, run_date: NaiveDate) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.lock", run_date.format("%Y-%m-%d")));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Run lock acquired");
                Ok(Self { file, path, run_date })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Err(ScreenerError::RunAlreadyInProgress { run_date })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn run_date(&self) -> NaiveDate {
        self.run_date
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let dir = TempDir::new().unwrap();
        let held = RunLock::acquire(dir.path(), day(10)).unwrap();
        assert!(held.path().ends_with("2024-06-10.lock"));

        let err = RunLock::acquire(dir.path(), day(10)).unwrap_err();
        assert!(matches!(
            err,
            ScreenerError::RunAlreadyInProgress { run_date } if run_date == day(10)
        ));
    }

    #[test]
    fn test_other_dates_are_independent() {
        let dir = TempDir::new().unwrap();
        let _a = RunLock::acquire(dir.path(), day(10)).unwrap();
        assert!(RunLock::acquire(dir.path(), day(11)).is_ok());
    }

    #[test]
    fn test_released_on_drop() {
        let dir = TempDir::new().unwrap();
        drop(RunLock::acquire(dir.path(), day(10)).unwrap());
        let again = RunLock::acquire(dir.path(), day(10)).unwrap();
        assert_eq!(again.run_date(), day(10));
    }
}
