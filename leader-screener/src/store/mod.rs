//! Snapshot store.
//!
//! ```text
//! <root>/
//!   LATEST                  id of the published run
//!   runs/<run_id>/          one immutable directory per run
//!     manifest.json
//!     indicators.json     per-ticker stage results
//!     patterns.json
//!     financials.json
//!     composite.json
//!     signals.json
//!     report.md
//!     screeners/<name>.json
//!   .staging/<run_id>/      runs being written
//!   locks/<date>.lock
//! ```
//!
//! A run becomes visible only when its staged directory is renamed into
//! `runs/` and `LATEST` is replaced by rename. Readers always see either
//! the previous run or the new one, never a mix.

mod lock;

pub use lock::RunLock;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::financial::FinancialMetricSet;
use crate::indicators::IndicatorSet;
use crate::pattern::PatternResult;
use crate::screener::engine::PreviousSignals;
use crate::screener::report::{Envelope, LeaderRecord, RunManifest, ScreenerRecord};
use crate::signals::{recent_signals, SignalEvent, SignalHistory};

/// File names inside a run directory.
pub mod layout {
    pub const RUNS: &str = "runs";
    pub const STAGING: &str = ".staging";
    pub const LOCKS: &str = "locks";
    pub const LATEST: &str = "LATEST";

    pub const MANIFEST: &str = "manifest.json";
    pub const INDICATORS: &str = "indicators.json";
    pub const PATTERNS: &str = "patterns.json";
    pub const FINANCIALS: &str = "financials.json";
    pub const COMPOSITE: &str = "composite.json";
    pub const SIGNALS: &str = "signals.json";
    pub const REPORT: &str = "report.md";
    pub const SCREENERS: &str = "screeners";

    pub fn screener_file(name: &str) -> String {
        format!("{}/{}.json", SCREENERS, name)
    }
}

/// Files of one run, keyed by path relative to the run directory.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotBundle {
    pub run_id: String,
    pub files: BTreeMap<String, Vec<u8>>,
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    retain_runs: usize,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, retain_runs: usize) -> Self {
        Self {
            root: root.into(),
            retain_runs: retain_runs.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Take the run lock for `as_of`.
    pub fn lock(&self, as_of: NaiveDate) -> Result<RunLock> {
        RunLock::acquire(&self.root.join(layout::LOCKS), as_of)
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(layout::RUNS).join(run_id)
    }

    // ------------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------------

    /// Stage `bundle`, move it into place, and point `LATEST` at it.
    ///
    /// On failure the staging directory is removed and the previous run
    /// stays published.
    pub fn publish(&self, bundle: &SnapshotBundle) -> Result<PathBuf> {
        let staging = self.root.join(layout::STAGING).join(&bundle.run_id);
        let target = self.run_dir(&bundle.run_id);

        let written = self
            .stage(&staging, bundle)
            .and_then(|()| self.promote(&staging, &target, &bundle.run_id));
        if let Err(e) = written {
            if staging.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!(
                        path = %staging.display(),
                        error = %cleanup,
                        "Failed to remove staging directory"
                    );
                }
            }
            return Err(e);
        }

        info!(run_id = %bundle.run_id, files = bundle.files.len(), "Snapshot published");
        // The run is live; a failed prune only leaves extra directories
        if let Err(e) = self.prune() {
            warn!(run_id = %bundle.run_id, error = %e, "Failed to prune old runs");
        }
        Ok(target)
    }

    fn stage(&self, staging: &Path, bundle: &SnapshotBundle) -> Result<()> {
        if staging.exists() {
            fs::remove_dir_all(staging)?;
        }
        fs::create_dir_all(staging)?;

        for (name, bytes) in &bundle.files {
            let path = staging.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_synced(&path, bytes)?;
        }
        debug!(path = %staging.display(), "Run staged");
        Ok(())
    }

    fn promote(&self, staging: &Path, target: &Path, run_id: &str) -> Result<()> {
        let runs = self.root.join(layout::RUNS);
        fs::create_dir_all(&runs)?;
        if target.exists() {
            let msg = format!("run {} already published", run_id);
            return Err(std::io::Error::new(ErrorKind::AlreadyExists, msg).into());
        }
        fs::rename(staging, target)?;
        sync_dir(&runs)?;

        let pointer = self.root.join(format!("{}.{}.tmp", layout::LATEST, run_id));
        write_synced(&pointer, run_id.as_bytes())?;
        fs::rename(&pointer, self.root.join(layout::LATEST))?;
        sync_dir(&self.root)?;
        Ok(())
    }

    /// Delete all but the newest `retain_runs` runs. The published run is
    /// always kept.
    fn prune(&self) -> Result<()> {
        let latest = self.latest_run_id()?;
        let mut runs = self.run_ids()?;
        if runs.len() <= self.retain_runs {
            return Ok(());
        }
        runs.sort();
        let stale = runs.len() - self.retain_runs;
        for id in runs.into_iter().take(stale) {
            if latest.as_deref() == Some(id.as_str()) {
                continue;
            }
            fs::remove_dir_all(self.run_dir(&id))?;
            debug!(run_id = %id, "Pruned old run");
        }
        Ok(())
    }

    /// Ids of every run directory, unordered.
    pub fn run_ids(&self) -> Result<Vec<String>> {
        let runs = self.root.join(layout::RUNS);
        if !runs.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(runs)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    pub fn latest_run_id(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.root.join(layout::LATEST)) {
            Ok(id) => Ok(Some(id.trim().to_string()).filter(|id| !id.is_empty())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Raw bytes of a file in the published run.
    pub fn read_latest(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(run_id) = self.latest_run_id()? else {
            return Ok(None);
        };
        match fs::read(self.run_dir(&run_id).join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_latest_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.read_latest(name)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(Into::into))
            .transpose()
    }

    pub fn manifest(&self) -> Result<Option<RunManifest>> {
        self.read_latest_json(layout::MANIFEST)
    }

    /// When the published run was generated; unaffected by failed runs.
    pub fn last_updated(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.manifest()?.map(|m| m.generated_at))
    }

    pub fn indicators(&self) -> Result<Option<Envelope<IndicatorSet>>> {
        self.read_latest_json(layout::INDICATORS)
    }

    /// Every pattern hypothesis of the published run, detected or not.
    pub fn patterns(&self) -> Result<Option<Envelope<PatternResult>>> {
        self.read_latest_json(layout::PATTERNS)
    }

    pub fn financials(&self) -> Result<Option<Envelope<FinancialMetricSet>>> {
        self.read_latest_json(layout::FINANCIALS)
    }

    pub fn screener(&self, name: &str) -> Result<Option<Envelope<ScreenerRecord>>> {
        self.read_latest_json(&layout::screener_file(name))
    }

    /// The Top-N list of the published run.
    pub fn top_stocks(&self) -> Result<Option<Envelope<LeaderRecord>>> {
        let Some(name) = self.manifest()?.and_then(|m| m.leaders_screener) else {
            return Ok(None);
        };
        self.read_latest_json(&layout::screener_file(&name))
    }

    pub fn signals(&self) -> Result<Vec<SignalEvent>> {
        let envelope: Option<Envelope<SignalEvent>> = self.read_latest_json(layout::SIGNALS)?;
        Ok(envelope.map(|e| e.data).unwrap_or_default())
    }

    /// Signals of the published run within `days` of its as-of date.
    pub fn recent_signals(&self, days: u32) -> Result<Vec<SignalEvent>> {
        let Some(manifest) = self.manifest()? else {
            return Ok(Vec::new());
        };
        Ok(recent_signals(self.signals()?, manifest.as_of, days))
    }

    /// Signal dates of the published run, per screener.
    pub fn previous_signals(&self) -> Result<PreviousSignals> {
        let mut grouped: BTreeMap<String, Vec<SignalEvent>> = BTreeMap::new();
        for event in self.signals()? {
            grouped.entry(event.screener.clone()).or_default().push(event);
        }
        Ok(grouped
            .into_iter()
            .map(|(screener, events)| (screener, SignalHistory::from_events(&events)))
            .collect())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bundle(run_id: &str, marker: &str) -> SnapshotBundle {
        SnapshotBundle {
            run_id: run_id.into(),
            files: BTreeMap::from([
                (layout::REPORT.to_string(), marker.as_bytes().to_vec()),
                (layout::screener_file("vcp"), b"{}".to_vec()),
            ]),
        }
    }

    #[test]
    fn test_publish_moves_latest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), 2);
        assert_eq!(store.latest_run_id().unwrap(), None);

        store.publish(&bundle("20240610-220000-a", "first")).unwrap();
        assert_eq!(store.latest_run_id().unwrap().as_deref(), Some("20240610-220000-a"));
        assert_eq!(store.read_latest(layout::REPORT).unwrap().unwrap(), b"first");
        assert!(store.read_latest(&layout::screener_file("vcp")).unwrap().is_some());

        store.publish(&bundle("20240611-220000-b", "second")).unwrap();
        assert_eq!(store.read_latest(layout::REPORT).unwrap().unwrap(), b"second");
        assert!(!dir.path().join(layout::STAGING).join("20240611-220000-b").exists());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), 2);
        for id in ["20240607-a", "20240610-b", "20240611-c"] {
            store.publish(&bundle(id, id)).unwrap();
        }
        let mut ids = store.run_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["20240610-b", "20240611-c"]);
    }

    #[test]
    fn test_failed_publish_keeps_previous() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), 2);
        store.publish(&bundle("20240610-a", "first")).unwrap();

        // Republishing an existing id fails at promotion
        assert!(store.publish(&bundle("20240610-a", "clobber")).is_err());
        assert_eq!(store.read_latest(layout::REPORT).unwrap().unwrap(), b"first");
        assert!(!dir.path().join(layout::STAGING).join("20240610-a").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_prune_failure_keeps_publish_successful() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), 1);
        store.publish(&bundle("20240601-old", "old")).unwrap();

        // Unprivileged users cannot empty a read-only directory
        let sealed = store.run_dir("20240601-old").join(layout::SCREENERS);
        fs::set_permissions(&sealed, fs::Permissions::from_mode(0o555)).unwrap();

        let published = store.publish(&bundle("20240610-new", "new"));
        fs::set_permissions(&sealed, fs::Permissions::from_mode(0o755)).ok();

        assert_eq!(published.unwrap(), store.run_dir("20240610-new"));
        assert_eq!(store.latest_run_id().unwrap().as_deref(), Some("20240610-new"));
        assert_eq!(store.read_latest(layout::REPORT).unwrap().unwrap(), b"new");
    }

    #[test]
    fn test_empty_store_reads() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), 2);
        assert!(store.manifest().unwrap().is_none());
        assert!(store.last_updated().unwrap().is_none());
        assert!(store.top_stocks().unwrap().is_none());
        assert!(store.recent_signals(5).unwrap().is_empty());
        assert!(store.previous_signals().unwrap().is_empty());
    }
}
