use crate::app::bus::{EventBus, SubscriptionId};
use crate::app::queries::StatusMirror;
use crate::app::transport::TransportClient;
use crate::domain::commit::{decode_payload, OperationReply};
use crate::domain::events::{TransportEvent, WorkflowEvent, WorkflowOperation};
use crate::domain::request::RequestId;
use crate::error::{CoreError, Result};
use serde_json::Value;
use tracing::{info, warn};

const MIN_MESSAGE_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Pending {
        operation: WorkflowOperation,
        request: RequestId,
    },
}

/// Sequences stage / unstage / commit / message generation, one at a time
#[derive(Debug)]
pub struct CommitWorkflow {
    state: WorkflowState,
    refresh_requested: bool,
    events: EventBus<WorkflowEvent>,
}

impl CommitWorkflow {
    pub fn new() -> Self {
        Self {
            state: WorkflowState::Idle,
            refresh_requested: false,
            events: EventBus::new(),
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, WorkflowState::Pending { .. })
    }

    /// Periodic status polling pauses while an operation is in flight
    pub fn polling_suspended(&self) -> bool {
        self.is_pending()
    }

    /// True once after each finished operation
    pub fn take_refresh_request(&mut self) -> bool {
        std::mem::take(&mut self.refresh_requested)
    }

    pub fn subscribe<F>(&mut self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&WorkflowEvent) + 'static,
    {
        self.events.subscribe(name, handler)
    }

    pub fn events_mut(&mut self) -> &mut EventBus<WorkflowEvent> {
        &mut self.events
    }

    pub fn stage(&mut self, transport: &mut TransportClient, files: &[String]) -> Result<RequestId> {
        let operation = WorkflowOperation::Stage;
        self.ensure_idle(operation)?;
        if files.is_empty() {
            return Err(self.reject(operation, "No files selected to stage"));
        }
        let request = transport.git_add(files)?;
        Ok(self.begin(operation, request))
    }

    pub fn unstage(
        &mut self,
        transport: &mut TransportClient,
        files: &[String],
    ) -> Result<RequestId> {
        let operation = WorkflowOperation::Unstage;
        self.ensure_idle(operation)?;
        if files.is_empty() {
            return Err(self.reject(operation, "No files selected to unstage"));
        }
        let request = transport.git_restore(files)?;
        Ok(self.begin(operation, request))
    }

    /// Commit everything currently staged in the mirror
    pub fn commit_changes(
        &mut self,
        transport: &mut TransportClient,
        mirror: &StatusMirror,
        message: &str,
    ) -> Result<RequestId> {
        let operation = WorkflowOperation::Commit;
        self.ensure_idle(operation)?;

        let message = message.trim();
        if message.is_empty() {
            return Err(self.reject(operation, "Commit message cannot be empty"));
        }
        if message.chars().count() < MIN_MESSAGE_LEN {
            return Err(self.reject(
                operation,
                format!("Commit message must be at least {} characters", MIN_MESSAGE_LEN),
            ));
        }
        if !mirror.has_staged() {
            return Err(self.reject(operation, "No files staged for commit"));
        }

        let request = transport.git_commit(message, &mirror.staged_paths())?;
        Ok(self.begin(operation, request))
    }

    /// Ask the backend for a commit message describing the staged files
    pub fn generate_message(
        &mut self,
        transport: &mut TransportClient,
        mirror: &StatusMirror,
        diff_content: Option<&str>,
    ) -> Result<RequestId> {
        let operation = WorkflowOperation::GenerateMessage;
        self.ensure_idle(operation)?;
        if !mirror.has_staged() {
            return Err(self.reject(operation, "No files staged for commit"));
        }

        let request = transport.ai_commit_message(&mirror.staged_paths(), diff_content)?;
        Ok(self.begin(operation, request))
    }

    /// Feed a transport event; returns the workflow events it produced
    pub fn observe(&mut self, event: &TransportEvent) -> Vec<WorkflowEvent> {
        let WorkflowState::Pending { operation, request } = self.state else {
            return Vec::new();
        };
        if event.request_id() != Some(request) {
            return Vec::new();
        }

        let mut produced = Vec::new();
        match event {
            TransportEvent::Response { payload, .. } => {
                let (success, message) = interpret(operation, payload);
                if operation == WorkflowOperation::GenerateMessage && success {
                    produced.push(WorkflowEvent::MessageGenerated {
                        message: message.clone(),
                    });
                }
                produced.push(WorkflowEvent::Finished {
                    operation,
                    success,
                    message,
                });
            }
            TransportEvent::RequestFailed { error, .. } => {
                produced.push(WorkflowEvent::Finished {
                    operation,
                    success: false,
                    message: error.user_message(),
                });
            }
            // Always followed by RequestFailed for the same request
            TransportEvent::ApiError { .. } => return Vec::new(),
        }

        info!("{} finished ({})", operation, request);
        self.state = WorkflowState::Idle;
        self.refresh_requested = true;
        for event in &produced {
            self.events.emit(event);
        }
        produced
    }

    fn ensure_idle(&self, operation: WorkflowOperation) -> Result<()> {
        if let WorkflowState::Pending {
            operation: running, ..
        } = self.state
        {
            warn!("Cannot {} while {} is in progress", operation, running);
            return Err(CoreError::state(format!(
                "Cannot {} while {} is in progress",
                operation, running
            )));
        }
        Ok(())
    }

    fn reject(&mut self, operation: WorkflowOperation, message: impl Into<String>) -> CoreError {
        let message = message.into();
        warn!("{} rejected: {}", operation, message);
        self.events.emit(&WorkflowEvent::ValidationFailed {
            operation,
            message: message.clone(),
        });
        CoreError::validation(message)
    }

    fn begin(&mut self, operation: WorkflowOperation, request: RequestId) -> RequestId {
        info!("{} started ({})", operation, request);
        self.state = WorkflowState::Pending { operation, request };
        self.events.emit(&WorkflowEvent::Started { operation });
        request
    }
}

impl Default for CommitWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

fn interpret(operation: WorkflowOperation, payload: &Value) -> (bool, String) {
    if operation == WorkflowOperation::GenerateMessage {
        return match payload.get("message").and_then(Value::as_str) {
            Some(message) if !message.trim().is_empty() => (true, message.trim().to_string()),
            _ => (false, "Backend returned no commit message".to_string()),
        };
    }

    match decode_payload::<OperationReply>(operation_channel(operation), payload) {
        Ok(reply) => {
            let message = if reply.message.is_empty() {
                format!("{} {}", operation, if reply.success { "succeeded" } else { "failed" })
            } else {
                reply.message
            };
            (reply.success, message)
        }
        Err(e) => (false, e.to_string()),
    }
}

fn operation_channel(operation: WorkflowOperation) -> &'static str {
    match operation {
        WorkflowOperation::Stage => "git_add",
        WorkflowOperation::Unstage => "git_restore",
        WorkflowOperation::Commit => "git_commit",
        WorkflowOperation::GenerateMessage => "ai_commit_message",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::registry::RegistryConfig;
    use crate::app::reconciler::StatusReconciler;
    use crate::domain::request::RequestKind;
    use crate::ports::http::{HttpCall, HttpCompletion, HttpPort};
    use crate::ports::time::ManualClock;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingHttp(Rc<RefCell<Vec<HttpCall>>>);

    impl HttpPort for CountingHttp {
        fn dispatch(&mut self, call: HttpCall) -> anyhow::Result<()> {
            self.0.borrow_mut().push(call);
            Ok(())
        }

        fn poll_completions(&mut self) -> Vec<HttpCompletion> {
            Vec::new()
        }

        fn release(&mut self, _id: RequestId) {}

        fn abort_all(&mut self) {}
    }

    fn transport() -> Result<(TransportClient, Rc<RefCell<Vec<HttpCall>>>)> {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let client = TransportClient::new(
            "http://localhost:8005",
            Box::new(CountingHttp(calls.clone())),
            Arc::new(ManualClock::new()),
            RegistryConfig::default(),
            Duration::from_secs(30),
        )?;
        Ok((client, calls))
    }

    fn mirror_with_staged() -> Result<StatusReconciler> {
        let mut reconciler = StatusReconciler::default();
        reconciler.apply(&json!({
            "branch": "main",
            "files": [{"path": "a.gd", "status": "M", "staged": true}]
        }))?;
        Ok(reconciler)
    }

    fn response(id: RequestId, kind: RequestKind, payload: Value) -> TransportEvent {
        TransportEvent::Response {
            id,
            channel: kind.to_string(),
            kind,
            payload,
        }
    }

    #[test]
    fn test_commit_with_nothing_staged_never_hits_network() -> Result<()> {
        let (mut transport, calls) = transport()?;
        let mut workflow = CommitWorkflow::new();
        let failures = Rc::new(RefCell::new(Vec::new()));
        let sink = failures.clone();
        workflow.subscribe("validation_failed", move |e| sink.borrow_mut().push(e.clone()));

        let result = workflow.commit_changes(&mut transport, &StatusMirror::new(), "Fix bug");
        assert_eq!(result, Err(CoreError::validation("No files staged for commit")));
        assert!(calls.borrow().is_empty());
        assert_eq!(failures.borrow().len(), 1);
        assert!(!workflow.is_pending());
        Ok(())
    }

    #[test]
    fn test_short_message_rejected() -> Result<()> {
        let (mut transport, calls) = transport()?;
        let reconciler = mirror_with_staged()?;
        let mut workflow = CommitWorkflow::new();

        assert!(workflow
            .commit_changes(&mut transport, reconciler.mirror(), "  ok  ")
            .is_err());
        assert!(workflow
            .commit_changes(&mut transport, reconciler.mirror(), "   ")
            .is_err());
        assert!(calls.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn test_single_flight_and_refresh_once() -> Result<()> {
        let (mut transport, calls) = transport()?;
        let reconciler = mirror_with_staged()?;
        let mut workflow = CommitWorkflow::new();

        let id = workflow.commit_changes(&mut transport, reconciler.mirror(), "  Add player  ")?;
        assert!(workflow.polling_suspended());
        assert_eq!(calls.borrow()[0].body, Some(json!({"message": "Add player", "files": ["a.gd"]})));

        let second = workflow.stage(&mut transport, &["b.gd".to_string()]);
        assert!(matches!(second, Err(CoreError::State { .. })));
        assert_eq!(calls.borrow().len(), 1);

        // Unrelated responses are ignored
        assert!(workflow
            .observe(&response(RequestId(999), RequestKind::GitCommit, json!({})))
            .is_empty());

        let events = workflow.observe(&response(
            id,
            RequestKind::GitCommit,
            json!({"success": true, "message": "Committed", "commit_hash": "abc"}),
        ));
        assert_eq!(
            events,
            vec![WorkflowEvent::Finished {
                operation: WorkflowOperation::Commit,
                success: true,
                message: "Committed".to_string()
            }]
        );
        assert!(!workflow.is_pending());
        assert!(workflow.take_refresh_request());
        assert!(!workflow.take_refresh_request());
        Ok(())
    }

    #[test]
    fn test_failure_returns_to_idle() -> Result<()> {
        let (mut transport, _) = transport()?;
        let mut workflow = CommitWorkflow::new();
        let id = workflow.stage(&mut transport, &["a.gd".to_string()])?;

        let error = CoreError::Http {
            status: 500,
            url: "http://localhost:8005/git/add".to_string(),
        };
        assert!(workflow
            .observe(&TransportEvent::ApiError {
                id: Some(id),
                kind: Some(RequestKind::GitAdd),
                message: error.user_message(),
                error: error.clone(),
            })
            .is_empty());
        assert!(workflow.is_pending());

        let events = workflow.observe(&TransportEvent::RequestFailed {
            id,
            kind: RequestKind::GitAdd,
            channel: "git_add".to_string(),
            error,
        });
        assert!(matches!(events[0], WorkflowEvent::Finished { success: false, .. }));
        assert!(!workflow.is_pending());
        assert!(workflow.take_refresh_request());
        Ok(())
    }

    #[test]
    fn test_generated_message_is_surfaced() -> Result<()> {
        let (mut transport, calls) = transport()?;
        let reconciler = mirror_with_staged()?;
        let mut workflow = CommitWorkflow::new();

        let id = workflow.generate_message(&mut transport, reconciler.mirror(), None)?;
        assert!(calls.borrow()[0].url.ends_with("/ai/generate/commit-message"));

        let events = workflow.observe(&response(
            id,
            RequestKind::AiCommitMessage,
            json!({"message": "Add player movement"}),
        ));
        assert_eq!(
            events[0],
            WorkflowEvent::MessageGenerated {
                message: "Add player movement".to_string()
            }
        );
        Ok(())
    }
}
