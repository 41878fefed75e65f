use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Unique identifier for an in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req_{}", self.0)
    }
}

/// The kind of a backend request, which decides the response channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestKind {
    GitStatus,
    GitDiff,
    GitAdd,
    GitRestore,
    GitCommit,
    GitCheckout,
    GitBranches,
    GitLog,
    AiAsk,
    AiChat,
    AiComplete,
    AiCommitMessage,
    Index,
    Search,
    IndexStats,
    IndexClear,
    /// Caller-defined kind; routed only if a route was registered for it
    Custom(String),
}

impl RequestKind {
    /// Every built-in kind, in declaration order
    pub const BUILTIN: [RequestKind; 16] = [
        RequestKind::GitStatus,
        RequestKind::GitDiff,
        RequestKind::GitAdd,
        RequestKind::GitRestore,
        RequestKind::GitCommit,
        RequestKind::GitCheckout,
        RequestKind::GitBranches,
        RequestKind::GitLog,
        RequestKind::AiAsk,
        RequestKind::AiChat,
        RequestKind::AiComplete,
        RequestKind::AiCommitMessage,
        RequestKind::Index,
        RequestKind::Search,
        RequestKind::IndexStats,
        RequestKind::IndexClear,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            RequestKind::GitStatus => "git_status",
            RequestKind::GitDiff => "git_diff",
            RequestKind::GitAdd => "git_add",
            RequestKind::GitRestore => "git_restore",
            RequestKind::GitCommit => "git_commit",
            RequestKind::GitCheckout => "git_checkout",
            RequestKind::GitBranches => "git_branches",
            RequestKind::GitLog => "git_log",
            RequestKind::AiAsk => "ai_ask",
            RequestKind::AiChat => "ai_chat",
            RequestKind::AiComplete => "ai_complete",
            RequestKind::AiCommitMessage => "ai_commit_message",
            RequestKind::Index => "index",
            RequestKind::Search => "search",
            RequestKind::IndexStats => "index_stats",
            RequestKind::IndexClear => "index_clear",
            RequestKind::Custom(name) => name,
        }
    }

    /// Default response channel for built-in kinds
    pub fn default_channel(&self) -> Option<&'static str> {
        match self {
            RequestKind::Custom(_) => None,
            RequestKind::GitStatus => Some("git_status"),
            RequestKind::GitDiff => Some("git_diff"),
            RequestKind::GitAdd => Some("git_add"),
            RequestKind::GitRestore => Some("git_restore"),
            RequestKind::GitCommit => Some("git_commit"),
            RequestKind::GitCheckout => Some("git_checkout"),
            RequestKind::GitBranches => Some("git_branches"),
            RequestKind::GitLog => Some("git_log"),
            RequestKind::AiAsk => Some("ai_ask"),
            RequestKind::AiChat => Some("ai_chat"),
            RequestKind::AiComplete => Some("ai_complete"),
            RequestKind::AiCommitMessage => Some("ai_commit_message"),
            RequestKind::Index => Some("index"),
            RequestKind::Search => Some("search"),
            RequestKind::IndexStats => Some("index_stats"),
            RequestKind::IndexClear => Some("index_clear"),
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request tracked by the registry from submission to its terminal event
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub url: String,
    pub started_at: Instant,
    pub timeout: Duration,
}

impl PendingRequest {
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds_have_channels() {
        for kind in RequestKind::BUILTIN.iter() {
            assert_eq!(kind.default_channel(), Some(kind.as_str()));
        }
        assert_eq!(RequestKind::Custom("x".into()).default_channel(), None);
    }

    #[test]
    fn test_request_id_display() {
        assert_eq!(RequestId(42).to_string(), "req_42");
    }
}
