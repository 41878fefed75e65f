use super::request::{RequestId, RequestKind};
use crate::error::CoreError;
use serde_json::Value;
use std::borrow::Cow;

/// Events carry the name subscribers filter on
pub trait NamedEvent {
    fn name(&self) -> Cow<'_, str>;
}

/// Events emitted by the transport client
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded JSON object routed to its response channel
    Response {
        id: RequestId,
        kind: RequestKind,
        channel: String,
        payload: Value,
    },

    /// Generic error notification, emitted once for every failure
    ApiError {
        id: Option<RequestId>,
        kind: Option<RequestKind>,
        error: CoreError,
        message: String,
    },

    /// Failure event on the channel the request would have answered on
    RequestFailed {
        id: RequestId,
        kind: RequestKind,
        channel: String,
        error: CoreError,
    },
}

impl TransportEvent {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            TransportEvent::Response { id, .. } | TransportEvent::RequestFailed { id, .. } => {
                Some(*id)
            }
            TransportEvent::ApiError { id, .. } => *id,
        }
    }
}

impl NamedEvent for TransportEvent {
    fn name(&self) -> Cow<'_, str> {
        match self {
            TransportEvent::Response { channel, .. } => Cow::Borrowed(channel.as_str()),
            TransportEvent::ApiError { .. } => Cow::Borrowed("api_error"),
            TransportEvent::RequestFailed { channel, .. } => {
                Cow::Owned(format!("{}_failed", channel))
            }
        }
    }
}

/// Events emitted by the stream channel
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected,
    Disconnected,
    StreamStarted,
    Token {
        token: String,
        accumulated: Option<String>,
    },
    Complete {
        full_response: Option<String>,
    },
    Completion {
        completion: String,
        multi_line: bool,
    },
    FileChanged {
        file_path: String,
        chunks_updated: u64,
    },
    EditorAction {
        request_id: String,
        action: String,
        result: Value,
    },
    Error {
        message: String,
    },
}

impl NamedEvent for StreamEvent {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(match self {
            StreamEvent::Connected => "connected",
            StreamEvent::Disconnected => "disconnected",
            StreamEvent::StreamStarted => "ai_stream_start",
            StreamEvent::Token { .. } => "ai_stream_token",
            StreamEvent::Complete { .. } => "ai_stream_complete",
            StreamEvent::Completion { .. } => "completion_suggestion",
            StreamEvent::FileChanged { .. } => "file_changed",
            StreamEvent::EditorAction { .. } => "editor_action",
            StreamEvent::Error { .. } => "error",
        })
    }
}

/// Events emitted by the status reconciler
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Mirror and presentation handles rebuilt from scratch
    Rebuilt {
        branch: String,
        staged: usize,
        unstaged: usize,
    },

    /// Mirror patched in place
    Patched {
        branch: String,
        added: usize,
        removed: usize,
        updated: usize,
    },

    /// Payload rejected without touching the mirror
    Rejected { message: String },
}

impl NamedEvent for StatusEvent {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(match self {
            StatusEvent::Rebuilt { .. } => "status_rebuilt",
            StatusEvent::Patched { .. } => "status_patched",
            StatusEvent::Rejected { .. } => "status_rejected",
        })
    }
}

/// Operations sequenced by the commit workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOperation {
    Stage,
    Unstage,
    Commit,
    GenerateMessage,
}

impl std::fmt::Display for WorkflowOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WorkflowOperation::Stage => "stage",
            WorkflowOperation::Unstage => "unstage",
            WorkflowOperation::Commit => "commit",
            WorkflowOperation::GenerateMessage => "generate commit message",
        })
    }
}

/// Events emitted by the commit workflow
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    Started {
        operation: WorkflowOperation,
    },
    Finished {
        operation: WorkflowOperation,
        success: bool,
        message: String,
    },
    ValidationFailed {
        operation: WorkflowOperation,
        message: String,
    },
    MessageGenerated {
        message: String,
    },
}

impl NamedEvent for WorkflowEvent {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(match self {
            WorkflowEvent::Started { .. } => "operation_started",
            WorkflowEvent::Finished { .. } => "operation_finished",
            WorkflowEvent::ValidationFailed { .. } => "validation_failed",
            WorkflowEvent::MessageGenerated { .. } => "commit_message_generated",
        })
    }
}
