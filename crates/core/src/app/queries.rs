use crate::domain::status::FileStatus;
use std::collections::{BTreeMap, HashMap};

/// Opaque per-path token for whatever renders a file row
///
/// A rebuild hands out fresh handles for every path; a patch keeps the
/// handles of paths that survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PresentationHandle(pub u64);

/// Read-only projection of the remote working tree for UI consumption
#[derive(Debug, Default)]
pub struct StatusMirror {
    branch: String,
    staged: BTreeMap<String, FileStatus>,
    unstaged: BTreeMap<String, FileStatus>,
    handles: HashMap<String, PresentationHandle>,
    next_handle: u64,
    summary: String,
}

impl StatusMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn staged(&self) -> &BTreeMap<String, FileStatus> {
        &self.staged
    }

    pub fn unstaged(&self) -> &BTreeMap<String, FileStatus> {
        &self.unstaged
    }

    /// Staged paths in sorted order
    pub fn staged_paths(&self) -> Vec<String> {
        self.staged.keys().cloned().collect()
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.staged.len() + self.unstaged.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.staged.contains_key(path) || self.unstaged.contains_key(path)
    }

    /// Look up a path in either map
    pub fn file(&self, path: &str) -> Option<&FileStatus> {
        self.staged.get(path).or_else(|| self.unstaged.get(path))
    }

    pub fn handle(&self, path: &str) -> Option<PresentationHandle> {
        self.handles.get(path).copied()
    }

    /// One-line summary such as `main: 2 staged, 3 unstaged`
    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub(crate) fn set_branch(&mut self, branch: &str) {
        if self.branch != branch {
            self.branch = branch.to_string();
        }
    }

    pub(crate) fn clear(&mut self) {
        self.staged.clear();
        self.unstaged.clear();
        self.handles.clear();
    }

    /// Insert or replace a file, moving it between maps when the staged flag
    /// flips. Returns true if anything visible changed.
    pub(crate) fn upsert(&mut self, file: FileStatus) -> bool {
        let (target, other) = if file.staged {
            (&mut self.staged, &mut self.unstaged)
        } else {
            (&mut self.unstaged, &mut self.staged)
        };

        let moved = other.remove(&file.path).is_some();
        let changed = match target.get(&file.path) {
            Some(existing) => existing != &file,
            None => true,
        };

        if !self.handles.contains_key(&file.path) {
            self.next_handle += 1;
            self.handles
                .insert(file.path.clone(), PresentationHandle(self.next_handle));
        }
        target.insert(file.path.clone(), file);
        moved || changed
    }

    pub(crate) fn remove(&mut self, path: &str) -> bool {
        self.handles.remove(path);
        let staged = self.staged.remove(path).is_some();
        let unstaged = self.unstaged.remove(path).is_some();
        staged || unstaged
    }

    pub(crate) fn refresh_summary(&mut self) {
        let branch = if self.branch.is_empty() {
            "(no branch)"
        } else {
            self.branch.as_str()
        };
        self.summary = if self.staged.is_empty() && self.unstaged.is_empty() {
            format!("{}: clean", branch)
        } else {
            format!(
                "{}: {} staged, {} unstaged",
                branch,
                self.staged.len(),
                self.unstaged.len()
            )
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::status::ChangeKind;

    #[test]
    fn test_upsert_moves_between_maps_and_keeps_handle() {
        let mut mirror = StatusMirror::new();
        assert!(mirror.upsert(FileStatus::new("a.gd", ChangeKind::Modified, false)));
        let handle = mirror.handle("a.gd");

        assert!(mirror.upsert(FileStatus::new("a.gd", ChangeKind::Modified, true)));
        assert!(mirror.staged().contains_key("a.gd"));
        assert!(!mirror.unstaged().contains_key("a.gd"));
        assert_eq!(mirror.handle("a.gd"), handle);

        assert!(!mirror.upsert(FileStatus::new("a.gd", ChangeKind::Modified, true)));
    }

    #[test]
    fn test_summary_label() {
        let mut mirror = StatusMirror::new();
        mirror.set_branch("main");
        mirror.refresh_summary();
        assert_eq!(mirror.summary(), "main: clean");

        mirror.upsert(FileStatus::new("a.gd", ChangeKind::Added, true));
        mirror.upsert(FileStatus::new("b.gd", ChangeKind::Untracked, false));
        mirror.refresh_summary();
        assert_eq!(mirror.summary(), "main: 1 staged, 1 unstaged");

        assert!(mirror.remove("a.gd"));
        assert!(mirror.handle("a.gd").is_none());
    }
}
