use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of the `git_log` channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitEntry {
    #[serde(alias = "sha", alias = "id")]
    pub hash: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, alias = "timestamp")]
    pub date: String,
}

impl CommitEntry {
    pub fn short_hash(&self) -> &str {
        let end = self
            .hash
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.hash.len());
        &self.hash[..end]
    }
}

impl std::fmt::Display for CommitEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.short_hash(), self.message)
    }
}

/// Payload of the `git_log` channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitLog {
    #[serde(default)]
    pub commits: Vec<CommitEntry>,
}

/// Branch description; the backend sends either names or objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BranchEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        is_current: bool,
    },
}

impl BranchEntry {
    pub fn name(&self) -> &str {
        match self {
            BranchEntry::Name(name) => name,
            BranchEntry::Detailed { name, .. } => name,
        }
    }
}

/// Payload of the `git_branches` channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchList {
    #[serde(default)]
    pub current_branch: String,
    #[serde(default)]
    pub branches: Vec<BranchEntry>,
}

/// `{success, message}` reply of the mutating git endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReply {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Decode a channel payload into one of the types above
pub fn decode_payload<T: serde::de::DeserializeOwned>(channel: &str, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| CoreError::decode(format!("invalid {} payload: {}", channel, e)))
}
