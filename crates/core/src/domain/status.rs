use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of change reported for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChangeKind {
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
    Untracked,
}

impl ChangeKind {
    /// Porcelain code as sent by the backend
    pub fn code(&self) -> &'static str {
        match self {
            ChangeKind::Modified => "M",
            ChangeKind::Added => "A",
            ChangeKind::Deleted => "D",
            ChangeKind::Renamed => "R",
            ChangeKind::Copied => "C",
            ChangeKind::Untracked => "??",
        }
    }
}

impl TryFrom<String> for ChangeKind {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.trim() {
            "M" | "T" | "modified" => Ok(ChangeKind::Modified),
            "A" | "added" => Ok(ChangeKind::Added),
            "D" | "deleted" => Ok(ChangeKind::Deleted),
            "R" | "renamed" => Ok(ChangeKind::Renamed),
            "C" | "copied" => Ok(ChangeKind::Copied),
            "??" | "?" | "untracked" => Ok(ChangeKind::Untracked),
            other => Err(format!("unknown file status code '{}'", other)),
        }
    }
}

impl From<ChangeKind> for String {
    fn from(kind: ChangeKind) -> Self {
        kind.code().to_string()
    }
}

/// One file entry of a status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    pub status: ChangeKind,
    pub staged: bool,
}

impl FileStatus {
    pub fn new(path: impl Into<String>, status: ChangeKind, staged: bool) -> Self {
        Self {
            path: path.into(),
            status,
            staged,
        }
    }
}

/// Complete description of the remote working tree at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub branch: String,
    pub files: Vec<FileStatus>,
}

/// Entry of a delta's `removed` list; the backend may send bare paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemovedEntry {
    Path(String),
    File(FileStatus),
}

impl RemovedEntry {
    pub fn path(&self) -> &str {
        match self {
            RemovedEntry::Path(path) => path,
            RemovedEntry::File(file) => &file.path,
        }
    }
}

/// Changes relative to the previous snapshot, already separated by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDelta {
    pub branch: String,
    #[serde(default)]
    pub added: Vec<FileStatus>,
    #[serde(default)]
    pub removed: Vec<RemovedEntry>,
    #[serde(default)]
    pub changed: Vec<FileStatus>,
    #[serde(default)]
    pub unchanged_count: usize,
    #[serde(default)]
    pub is_full_refresh: bool,
}

impl StatusDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// The complete snapshot carried by a full-refresh delta
    pub fn into_snapshot(self) -> StatusSnapshot {
        let mut files = self.added;
        files.extend(self.changed);
        StatusSnapshot {
            branch: self.branch,
            files,
        }
    }
}

/// A decoded `git_status` payload
#[derive(Debug, Clone, PartialEq)]
pub enum StatusPayload {
    Full(StatusSnapshot),
    Delta(StatusDelta),
}

impl StatusPayload {
    /// Decode and validate a status payload, rejecting anything malformed
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| CoreError::decode("status payload is not a JSON object"))?;

        let payload = if object.contains_key("files") {
            let snapshot: StatusSnapshot = serde_json::from_value(value.clone())
                .map_err(|e| CoreError::decode(format!("invalid status snapshot: {}", e)))?;
            StatusPayload::Full(snapshot)
        } else if ["added", "removed", "changed"]
            .iter()
            .any(|key| object.contains_key(*key))
        {
            let delta: StatusDelta = serde_json::from_value(value.clone())
                .map_err(|e| CoreError::decode(format!("invalid status delta: {}", e)))?;
            StatusPayload::Delta(delta)
        } else {
            return Err(CoreError::decode(
                "status payload has neither 'files' nor delta fields",
            ));
        };

        payload.validate()?;
        Ok(payload)
    }

    fn validate(&self) -> Result<()> {
        let empty_path = match self {
            StatusPayload::Full(snapshot) => snapshot.files.iter().any(|f| f.path.is_empty()),
            StatusPayload::Delta(delta) => {
                delta.added.iter().chain(delta.changed.iter()).any(|f| f.path.is_empty())
                    || delta.removed.iter().any(|r| r.path().is_empty())
            }
        };
        if empty_path {
            return Err(CoreError::decode("status entry with an empty path"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_snapshot_decodes_porcelain_codes() -> Result<()> {
        let payload = StatusPayload::from_json(&json!({
            "branch": "main",
            "is_clean": false,
            "files": [
                {"path": "a.gd", "status": "M", "staged": true},
                {"path": "b.gd", "status": "??", "staged": false},
            ]
        }))?;

        match payload {
            StatusPayload::Full(snapshot) => {
                assert_eq!(snapshot.branch, "main");
                assert_eq!(snapshot.files[0].status, ChangeKind::Modified);
                assert_eq!(snapshot.files[1].status, ChangeKind::Untracked);
            }
            other => panic!("expected full snapshot, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_delta_accepts_bare_removed_paths() -> Result<()> {
        let payload = StatusPayload::from_json(&json!({
            "branch": "main",
            "added": [],
            "removed": ["gone.gd", {"path": "old.gd", "status": "D", "staged": true}],
            "changed": [],
            "is_full_refresh": false
        }))?;

        match payload {
            StatusPayload::Delta(delta) => {
                let paths: Vec<_> = delta.removed.iter().map(|r| r.path()).collect();
                assert_eq!(paths, vec!["gone.gd", "old.gd"]);
            }
            other => panic!("expected delta, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_malformed_payloads_are_rejected() {
        let cases = vec![
            json!([]),
            json!({"branch": "main"}),
            json!({"branch": 3, "files": []}),
            json!({"branch": "main", "files": [{"path": "a", "status": "X", "staged": true}]}),
            json!({"branch": "main", "files": [{"path": "a", "status": "M"}]}),
            json!({"branch": "main", "files": [{"path": "", "status": "M", "staged": false}]}),
        ];

        for case in cases {
            let result = StatusPayload::from_json(&case);
            assert!(
                matches!(result, Err(CoreError::Decode { .. })),
                "expected decode error for {}",
                case
            );
        }
    }
}
