use crate::app::bus::{EventBus, SubscriptionId};
use crate::app::queries::StatusMirror;
use crate::domain::events::StatusEvent;
use crate::domain::status::{FileStatus, StatusDelta, StatusPayload, StatusSnapshot};
use crate::error::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    /// Snapshots longer than this are truncated and deltas may not grow
    /// the mirror past it
    pub max_files: usize,
    /// Churn ratio above which the mirror is rebuilt instead of patched.
    /// Churn counts paths that disappeared, appeared, or changed status or
    /// stage, over the larger of the previous and incoming file counts.
    pub full_rebuild_threshold: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_files: 10_000,
            full_rebuild_threshold: 0.2,
        }
    }
}

/// What `apply` did with a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Same fingerprint as last time; nothing touched
    Skipped,
    Patched {
        added: usize,
        removed: usize,
        updated: usize,
    },
    Rebuilt {
        staged: usize,
        unstaged: usize,
    },
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub skipped: u64,
    pub patched: u64,
    pub rebuilt: u64,
    pub rejected: u64,
    pub truncated: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    branch: String,
    files: usize,
    staged: usize,
    unstaged: usize,
}

/// Keeps the local status mirror in sync with backend snapshots
#[derive(Debug)]
pub struct StatusReconciler {
    config: ReconcilerConfig,
    mirror: StatusMirror,
    fingerprint: Option<Fingerprint>,
    stats: ReconcileStats,
    events: EventBus<StatusEvent>,
}

impl StatusReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            mirror: StatusMirror::new(),
            fingerprint: None,
            stats: ReconcileStats::default(),
            events: EventBus::new(),
        }
    }

    pub fn mirror(&self) -> &StatusMirror {
        &self.mirror
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    pub fn subscribe<F>(&mut self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&StatusEvent) + 'static,
    {
        self.events.subscribe(name, handler)
    }

    pub fn events_mut(&mut self) -> &mut EventBus<StatusEvent> {
        &mut self.events
    }

    /// Decode a raw `git_status` payload and apply it
    ///
    /// A malformed payload is rejected before the mirror is touched.
    pub fn apply(&mut self, payload: &Value) -> Result<ReconcileOutcome> {
        match StatusPayload::from_json(payload) {
            Ok(decoded) => Ok(self.apply_payload(decoded)),
            Err(e) => {
                warn!("Rejected status payload: {}", e);
                self.stats.rejected += 1;
                self.events.emit(&StatusEvent::Rejected {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn apply_payload(&mut self, payload: StatusPayload) -> ReconcileOutcome {
        match payload {
            StatusPayload::Full(snapshot) => self.apply_snapshot(snapshot, false),
            StatusPayload::Delta(delta) if delta.is_full_refresh => {
                info!("Full status refresh for {}", delta.branch);
                self.apply_snapshot(delta.into_snapshot(), true)
            }
            StatusPayload::Delta(delta) => self.apply_delta(delta),
        }
    }

    /// `replace` skips the fingerprint check; the snapshot is authoritative
    fn apply_snapshot(&mut self, mut snapshot: StatusSnapshot, replace: bool) -> ReconcileOutcome {
        if snapshot.files.len() > self.config.max_files {
            warn!(
                "Status snapshot has {} files, keeping the first {}",
                snapshot.files.len(),
                self.config.max_files
            );
            snapshot.files.truncate(self.config.max_files);
            self.stats.truncated += 1;
        }

        let files = normalize(snapshot.files);
        let staged = files.values().filter(|f| f.staged).count();
        let fingerprint = Fingerprint {
            branch: snapshot.branch.clone(),
            files: files.len(),
            staged,
            unstaged: files.len() - staged,
        };

        if !replace && self.fingerprint.as_ref() == Some(&fingerprint) {
            debug!("Status unchanged ({} files)", fingerprint.files);
            self.stats.skipped += 1;
            return ReconcileOutcome::Skipped;
        }

        // Paths that appeared, disappeared or changed status or stage
        let gone = self
            .mirror
            .staged()
            .keys()
            .chain(self.mirror.unstaged().keys())
            .filter(|path| !files.contains_key(*path))
            .count();
        let touched = files
            .values()
            .filter(|file| self.mirror.file(&file.path) != Some(*file))
            .count();
        let churned = gone + touched;
        let base = self.mirror.file_count().max(files.len());
        let churn = if base == 0 {
            0.0
        } else {
            churned as f64 / base as f64
        };

        let outcome = if self.fingerprint.is_none() || churn > self.config.full_rebuild_threshold {
            self.rebuild(&snapshot.branch, files)
        } else {
            self.patch(&snapshot.branch, files)
        };
        debug!("Status churn {:.2}: {:?}", churn, outcome);

        self.fingerprint = Some(fingerprint);
        outcome
    }

    fn rebuild(&mut self, branch: &str, files: BTreeMap<String, FileStatus>) -> ReconcileOutcome {
        self.mirror.clear();
        self.mirror.set_branch(branch);
        for file in files.into_values() {
            self.mirror.upsert(file);
        }
        self.mirror.refresh_summary();
        self.stats.rebuilt += 1;

        let staged = self.mirror.staged().len();
        let unstaged = self.mirror.unstaged().len();
        info!("Status rebuilt: {}", self.mirror.summary());
        self.events.emit(&StatusEvent::Rebuilt {
            branch: branch.to_string(),
            staged,
            unstaged,
        });
        ReconcileOutcome::Rebuilt { staged, unstaged }
    }

    fn patch(&mut self, branch: &str, files: BTreeMap<String, FileStatus>) -> ReconcileOutcome {
        let gone: Vec<String> = self
            .mirror
            .staged()
            .keys()
            .chain(self.mirror.unstaged().keys())
            .filter(|path| !files.contains_key(*path))
            .cloned()
            .collect();

        let mut removed = 0;
        for path in &gone {
            if self.mirror.remove(path) {
                removed += 1;
            }
        }

        let (added, updated) = self.upsert_all(files.into_values());
        self.finish_patch(branch, added, removed, updated)
    }

    fn apply_delta(&mut self, delta: StatusDelta) -> ReconcileOutcome {
        if delta.is_empty() && delta.branch == self.mirror.branch() {
            debug!("Empty status delta");
            self.stats.skipped += 1;
            return ReconcileOutcome::Skipped;
        }

        let mut removed = 0;
        for entry in &delta.removed {
            if self.mirror.remove(entry.path()) {
                removed += 1;
            }
        }

        let files = normalize(delta.added.into_iter().chain(delta.changed));
        let mut room = self.config.max_files.saturating_sub(self.mirror.file_count());
        let mut dropped = 0;
        let files: Vec<FileStatus> = files
            .into_values()
            .filter(|file| {
                if self.mirror.contains(&file.path) {
                    true
                } else if room > 0 {
                    room -= 1;
                    true
                } else {
                    dropped += 1;
                    false
                }
            })
            .collect();
        if dropped > 0 {
            warn!(
                "Status delta would exceed {} files, dropped {} new paths",
                self.config.max_files, dropped
            );
            self.stats.truncated += 1;
        }
        let (added, updated) = self.upsert_all(files);
        let outcome = self.finish_patch(&delta.branch, added, removed, updated);

        let staged = self.mirror.staged().len();
        let total = self.mirror.file_count();
        self.fingerprint = Some(Fingerprint {
            branch: delta.branch,
            files: total,
            staged,
            unstaged: total - staged,
        });
        outcome
    }

    fn upsert_all(&mut self, files: impl IntoIterator<Item = FileStatus>) -> (usize, usize) {
        let mut added = 0;
        let mut updated = 0;
        for file in files {
            let existed = self.mirror.contains(&file.path);
            if self.mirror.upsert(file) {
                if existed {
                    updated += 1;
                } else {
                    added += 1;
                }
            }
        }
        (added, updated)
    }

    fn finish_patch(
        &mut self,
        branch: &str,
        added: usize,
        removed: usize,
        updated: usize,
    ) -> ReconcileOutcome {
        self.mirror.set_branch(branch);
        self.mirror.refresh_summary();
        self.stats.patched += 1;

        debug!(
            "Status patched: +{} -{} ~{} ({})",
            added,
            removed,
            updated,
            self.mirror.summary()
        );
        self.events.emit(&StatusEvent::Patched {
            branch: branch.to_string(),
            added,
            removed,
            updated,
        });
        ReconcileOutcome::Patched {
            added,
            removed,
            updated,
        }
    }
}

impl Default for StatusReconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}

/// Collapse duplicate paths; a staged entry wins over an unstaged one
fn normalize(files: impl IntoIterator<Item = FileStatus>) -> BTreeMap<String, FileStatus> {
    let mut by_path: BTreeMap<String, FileStatus> = BTreeMap::new();
    for file in files {
        match by_path.get(&file.path) {
            Some(existing) if existing.staged && !file.staged => {}
            _ => {
                by_path.insert(file.path.clone(), file);
            }
        }
    }
    by_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::status::ChangeKind;
    use crate::error::CoreError;
    use serde_json::json;

    fn snapshot_json(branch: &str, count: usize, offset: usize) -> Value {
        let files: Vec<Value> = (offset..offset + count)
            .map(|i| json!({"path": format!("file_{}.gd", i), "status": "M", "staged": i % 2 == 0}))
            .collect();
        json!({ "branch": branch, "files": files })
    }

    #[test]
    fn test_identical_fingerprint_is_noop() -> Result<()> {
        let mut reconciler = StatusReconciler::default();
        let first = reconciler.apply(&snapshot_json("main", 10, 0))?;
        assert_eq!(first, ReconcileOutcome::Rebuilt { staged: 5, unstaged: 5 });

        let handle = reconciler.mirror().handle("file_3.gd");
        assert_eq!(reconciler.apply(&snapshot_json("main", 10, 0))?, ReconcileOutcome::Skipped);
        assert_eq!(reconciler.mirror().handle("file_3.gd"), handle);
        assert_eq!(reconciler.stats().skipped, 1);
        Ok(())
    }

    #[test]
    fn test_low_churn_patches_high_churn_rebuilds() -> Result<()> {
        let mut reconciler = StatusReconciler::default();
        reconciler.apply(&snapshot_json("main", 100, 0))?;
        let kept = reconciler.mirror().handle("file_50.gd");

        // 5 removed and 6 added out of 101: about 11% churn
        let outcome = reconciler.apply(&snapshot_json("main", 101, 5))?;
        assert!(matches!(outcome, ReconcileOutcome::Patched { added: 6, removed: 5, .. }));
        assert_eq!(reconciler.mirror().handle("file_50.gd"), kept);

        // 30 removed and 29 added: well over the threshold
        let outcome = reconciler.apply(&snapshot_json("main", 100, 35))?;
        assert!(matches!(outcome, ReconcileOutcome::Rebuilt { .. }));
        assert_ne!(reconciler.mirror().handle("file_50.gd"), kept);
        assert_eq!(reconciler.mirror().file_count(), 100);
        Ok(())
    }

    #[test]
    fn test_five_percent_symmetric_churn_patches() -> Result<()> {
        let mut reconciler = StatusReconciler::default();
        reconciler.apply(&snapshot_json("main", 100, 0))?;
        // 5 new paths, none removed
        let outcome = reconciler.apply(&snapshot_json("main", 105, 0))?;
        assert!(matches!(outcome, ReconcileOutcome::Patched { added: 5, removed: 0, .. }));
        Ok(())
    }

    #[test]
    fn test_status_changes_count_as_churn() -> Result<()> {
        let mut reconciler = StatusReconciler::default();
        let unstaged = |staged_upto: usize| {
            let files: Vec<Value> = (0..100)
                .map(|i| json!({"path": format!("file_{}.gd", i), "status": "M", "staged": i < staged_upto}))
                .collect();
            json!({ "branch": "main", "files": files })
        };
        reconciler.apply(&unstaged(0))?;

        // 5 of 100 files staged
        let outcome = reconciler.apply(&unstaged(5))?;
        assert_eq!(
            outcome,
            ReconcileOutcome::Patched {
                added: 0,
                removed: 0,
                updated: 5
            }
        );

        // 30 more staged: 30% churn
        let outcome = reconciler.apply(&unstaged(35))?;
        assert_eq!(
            outcome,
            ReconcileOutcome::Rebuilt {
                staged: 35,
                unstaged: 65
            }
        );
        Ok(())
    }

    #[test]
    fn test_rebuild_then_empty_delta_changes_nothing() -> Result<()> {
        let mut reconciler = StatusReconciler::default();
        reconciler.apply(&snapshot_json("main", 4, 0))?;
        let before_staged = reconciler.mirror().staged().clone();
        let before_summary = reconciler.mirror().summary().to_string();

        let outcome = reconciler.apply(&json!({
            "branch": "main", "added": [], "removed": [], "changed": [], "unchanged_count": 4
        }))?;
        assert_eq!(outcome, ReconcileOutcome::Skipped);
        assert_eq!(reconciler.mirror().staged(), &before_staged);
        assert_eq!(reconciler.mirror().summary(), before_summary);
        Ok(())
    }

    #[test]
    fn test_delta_applies_directly() -> Result<()> {
        let mut reconciler = StatusReconciler::default();
        reconciler.apply(&snapshot_json("main", 4, 0))?;

        let outcome = reconciler.apply(&json!({
            "branch": "main",
            "added": [{"path": "new.gd", "status": "A", "staged": true}],
            "removed": ["file_0.gd"],
            "changed": [{"path": "file_1.gd", "status": "M", "staged": true}],
        }))?;
        assert_eq!(
            outcome,
            ReconcileOutcome::Patched {
                added: 1,
                removed: 1,
                updated: 1
            }
        );
        let staged = reconciler.mirror().staged_paths();
        assert_eq!(staged, vec!["file_1.gd", "file_2.gd", "new.gd"]);
        Ok(())
    }

    #[test]
    fn test_full_refresh_delta_replaces_mirror() -> Result<()> {
        let mut reconciler = StatusReconciler::default();
        reconciler.apply(&snapshot_json("main", 4, 0))?;

        reconciler.apply(&json!({
            "branch": "dev",
            "added": [{"path": "only.gd", "status": "??", "staged": false}],
            "changed": [],
            "is_full_refresh": true
        }))?;
        assert_eq!(reconciler.mirror().file_count(), 1);
        assert_eq!(reconciler.mirror().branch(), "dev");
        Ok(())
    }

    #[test]
    fn test_malformed_payload_leaves_mirror_untouched() -> Result<()> {
        let mut reconciler = StatusReconciler::default();
        reconciler.apply(&snapshot_json("main", 3, 0))?;

        let result = reconciler.apply(&json!({"branch": "main", "files": "nope"}));
        assert!(matches!(result, Err(CoreError::Decode { .. })));
        assert_eq!(reconciler.mirror().file_count(), 3);
        assert_eq!(reconciler.stats().rejected, 1);
        Ok(())
    }

    #[test]
    fn test_oversized_snapshot_is_truncated() -> Result<()> {
        let mut reconciler = StatusReconciler::new(ReconcilerConfig {
            max_files: 5,
            ..ReconcilerConfig::default()
        });
        reconciler.apply(&snapshot_json("main", 8, 0))?;
        assert_eq!(reconciler.mirror().file_count(), 5);
        assert_eq!(reconciler.stats().truncated, 1);
        Ok(())
    }

    #[test]
    fn test_delta_cannot_grow_mirror_past_cap() -> Result<()> {
        let mut reconciler = StatusReconciler::new(ReconcilerConfig {
            max_files: 5,
            ..ReconcilerConfig::default()
        });
        reconciler.apply(&snapshot_json("main", 2, 0))?;

        let added: Vec<Value> = (0..8)
            .map(|i| json!({"path": format!("new_{}.gd", i), "status": "A", "staged": false}))
            .collect();
        let outcome = reconciler.apply(&json!({
            "branch": "main",
            "added": added,
            "removed": [],
            "changed": [{"path": "file_1.gd", "status": "M", "staged": true}],
        }))?;

        assert_eq!(
            outcome,
            ReconcileOutcome::Patched {
                added: 3,
                removed: 0,
                updated: 1
            }
        );
        assert_eq!(reconciler.mirror().file_count(), 5);
        assert_eq!(reconciler.stats().truncated, 1);
        Ok(())
    }

    #[test]
    fn test_full_refresh_with_same_counts_is_not_skipped() -> Result<()> {
        let mut reconciler = StatusReconciler::default();
        reconciler.apply(&json!({
            "branch": "main",
            "files": [{"path": "a.gd", "status": "M", "staged": false}]
        }))?;

        let outcome = reconciler.apply(&json!({
            "branch": "main",
            "added": [{"path": "b.gd", "status": "M", "staged": false}],
            "changed": [],
            "is_full_refresh": true
        }))?;

        assert_ne!(outcome, ReconcileOutcome::Skipped);
        assert!(reconciler.mirror().file("a.gd").is_none());
        assert!(reconciler.mirror().contains("b.gd"));
        assert_eq!(reconciler.mirror().file_count(), 1);

        // The fingerprint was stored, so the same plain snapshot is a no-op
        let again = reconciler.apply(&json!({
            "branch": "main",
            "files": [{"path": "b.gd", "status": "M", "staged": false}]
        }))?;
        assert_eq!(again, ReconcileOutcome::Skipped);
        Ok(())
    }

    #[test]
    fn test_staged_entry_wins_over_unstaged_duplicate() -> Result<()> {
        let mut reconciler = StatusReconciler::default();
        reconciler.apply(&json!({
            "branch": "main",
            "files": [
                {"path": "both.gd", "status": "M", "staged": true},
                {"path": "both.gd", "status": "M", "staged": false},
            ]
        }))?;
        assert!(reconciler.mirror().staged().contains_key("both.gd"));
        assert!(reconciler.mirror().unstaged().is_empty());
        assert_eq!(
            reconciler.mirror().file("both.gd").map(|f| f.status),
            Some(ChangeKind::Modified)
        );
        Ok(())
    }
}
