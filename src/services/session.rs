use anyhow::{Context, Result};
use minds_link_core::app::{
    AskRequest, Command, CommitWorkflow, ReconcileOutcome, StatusMirror, StatusReconciler,
    StreamChannel, TransportClient,
};
use minds_link_core::domain::{
    RequestId, RequestKind, StreamEvent, TransportEvent, WorkflowEvent,
};
use minds_link_core::ports::{AppConfig, Clock, EditorActions, HttpPort, StreamPort};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Something that happened during one tick, in the order it happened
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Transport(TransportEvent),
    Stream(StreamEvent),
    Status(ReconcileOutcome),
    Workflow(WorkflowEvent),
}

/// Composition root of the tick loop
///
/// Owns every coordinator component and wires them together: status
/// payloads go to the reconciler, completions go to the workflow, and
/// status refreshes are requested after operations, checkouts, file change
/// notifications and on the polling interval.
pub struct Session {
    transport: TransportClient,
    stream: StreamChannel,
    reconciler: StatusReconciler,
    workflow: CommitWorkflow,
    clock: Arc<dyn Clock>,
    config: AppConfig,
    polling: bool,
    last_status_poll: Option<Instant>,
    status_request: Option<RequestId>,
    /// A refresh was asked for while a fetch sent earlier was still in flight
    status_owed: bool,
    status_received: bool,
    quit: bool,
}

impl Session {
    pub fn new(
        config: AppConfig,
        http: Box<dyn HttpPort>,
        stream_port: Box<dyn StreamPort>,
        editor: Option<Box<dyn EditorActions>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let transport = TransportClient::new(
            &config.base_url(),
            http,
            clock.clone(),
            config.registry_config(),
            config.default_timeout(),
        )
        .context("Failed to create transport client")?;

        let mut stream = StreamChannel::new(stream_port, config.stream_config());
        if let Some(editor) = editor {
            stream = stream
                .with_editor(editor)
                .context("Failed to attach editor façade")?;
        }

        info!("Session ready for {}", transport.base_url());
        Ok(Self {
            transport,
            stream,
            reconciler: StatusReconciler::new(config.reconciler_config()),
            workflow: CommitWorkflow::new(),
            clock,
            polling: config.status.poll_interval_secs > 0,
            config,
            last_status_poll: None,
            status_request: None,
            status_owed: false,
            status_received: false,
            quit: false,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn mirror(&self) -> &StatusMirror {
        self.reconciler.mirror()
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut TransportClient {
        &mut self.transport
    }

    pub fn stream(&self) -> &StreamChannel {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut StreamChannel {
        &mut self.stream
    }

    pub fn reconciler(&self) -> &StatusReconciler {
        &self.reconciler
    }

    pub fn workflow(&self) -> &CommitWorkflow {
        &self.workflow
    }

    pub fn workflow_mut(&mut self) -> &mut CommitWorkflow {
        &mut self.workflow
    }

    /// Turn periodic status polling on or off
    pub fn set_polling(&mut self, enabled: bool) {
        self.polling = enabled;
    }

    pub fn status_in_flight(&self) -> bool {
        self.status_request.is_some()
    }

    /// True while a refresh waits for the in-flight fetch to finish
    pub fn status_owed(&self) -> bool {
        self.status_owed
    }

    /// True once any status snapshot has been applied
    pub fn status_received(&self) -> bool {
        self.status_received
    }

    pub fn is_quit(&self) -> bool {
        self.quit
    }

    /// Run one iteration of the loop
    pub fn tick(&mut self) -> Vec<SessionUpdate> {
        let now = self.clock.now();
        let mut updates = Vec::new();
        let mut refresh = false;

        for event in self.transport.poll(now) {
            match &event {
                TransportEvent::Response {
                    id,
                    kind: RequestKind::GitStatus,
                    payload,
                    ..
                } => {
                    self.clear_status_request(*id);
                    match self.reconciler.apply(payload) {
                        Ok(outcome) => {
                            self.status_received = true;
                            updates.push(SessionUpdate::Status(outcome));
                        }
                        Err(e) => warn!("Status payload for {} ignored: {}", id, e),
                    }
                }
                TransportEvent::RequestFailed {
                    id,
                    kind: RequestKind::GitStatus,
                    ..
                } => self.clear_status_request(*id),
                TransportEvent::Response {
                    kind: RequestKind::GitCheckout,
                    ..
                } => refresh = true,
                _ => {}
            }

            updates.extend(
                self.workflow
                    .observe(&event)
                    .into_iter()
                    .map(SessionUpdate::Workflow),
            );
            updates.push(SessionUpdate::Transport(event));
        }

        if self.workflow.take_refresh_request() {
            refresh = true;
        }

        for event in self.stream.tick(now) {
            if let StreamEvent::FileChanged { file_path, .. } = &event {
                debug!("{} changed on the backend", file_path);
                refresh = true;
            }
            updates.push(SessionUpdate::Stream(event));
        }

        if self.status_request.is_some() {
            if refresh {
                debug!("Status fetch in flight predates this change, refreshing again after it");
                self.status_owed = true;
            }
        } else if refresh || self.status_owed || self.poll_due(now) {
            self.status_owed = false;
            if let Err(e) = self.request_status() {
                warn!("Status refresh not sent: {:#}", e);
            }
        }

        updates
    }

    pub fn handle_command(&mut self, command: Command) -> Result<Option<RequestId>> {
        debug!("Handling {:?}", command);
        let id = match command {
            Command::RefreshStatus => self.request_status()?,
            Command::Stage { files } => self.workflow.stage(&mut self.transport, &files)?,
            Command::Unstage { files } => self.workflow.unstage(&mut self.transport, &files)?,
            Command::Commit { message } => {
                let mirror = self.reconciler.mirror();
                self.workflow
                    .commit_changes(&mut self.transport, mirror, &message)?
            }
            Command::GenerateMessage => {
                let mirror = self.reconciler.mirror();
                self.workflow
                    .generate_message(&mut self.transport, mirror, None)?
            }
            Command::ShowDiff { path } => self.transport.git_diff(&path)?,
            Command::Checkout { branch, create_new } => {
                self.transport.git_checkout(&branch, create_new)?
            }
            Command::ListBranches => self.transport.git_branches()?,
            Command::ShowLog { limit } => self.transport.git_log(limit)?,
            Command::Ask { prompt, file_path } => {
                let request = AskRequest {
                    file_path,
                    ..AskRequest::new(prompt)
                };
                self.transport.ai_ask(&request)?
            }
            Command::Chat { message } => self.transport.ai_chat(&message, &[])?,
            Command::Complete {
                file_path,
                file_content,
                cursor_line,
                cursor_column,
            } => self
                .transport
                .ai_complete(&file_path, &file_content, cursor_line, cursor_column)?,
            Command::IndexProject {
                project_path,
                force_reindex,
            } => self.transport.index_project(&project_path, force_reindex)?,
            Command::Search { query, max_results } => {
                self.transport.index_search(&query, max_results)?
            }
            Command::IndexStats => self.transport.index_stats()?,
            Command::ClearIndex => self.transport.index_clear()?,
            Command::StreamAsk { prompt } => {
                self.stream.ask_streaming(&prompt, None)?;
                return Ok(None);
            }
            Command::StreamComplete {
                file_path,
                file_content,
                cursor_line,
                cursor_column,
            } => {
                self.stream
                    .request_completion(&file_path, &file_content, cursor_line, cursor_column)?;
                return Ok(None);
            }
            Command::Connect => {
                self.stream.connect(self.clock.now());
                return Ok(None);
            }
            Command::Disconnect => {
                self.stream.disconnect();
                return Ok(None);
            }
            Command::Quit => {
                info!("Quit command received");
                self.quit = true;
                return Ok(None);
            }
        };
        Ok(Some(id))
    }

    /// Fetch status now unless a fetch is already in flight
    pub fn request_status(&mut self) -> Result<RequestId> {
        if let Some(id) = self.status_request {
            return Ok(id);
        }
        let id = self
            .transport
            .git_status(self.config.backend.client_id.as_deref())?;
        self.status_request = Some(id);
        self.last_status_poll = Some(self.clock.now());
        Ok(id)
    }

    /// Abort all requests, then close the stream, calling `pause` between
    /// close polls
    pub fn shutdown<F: FnMut()>(&mut self, pause: F) -> bool {
        info!("Session shutting down");
        self.transport.shutdown();
        self.status_request = None;
        self.status_owed = false;
        let attempts = self.stream.config().close_poll_attempts;
        self.stream.shutdown(attempts, pause)
    }

    fn clear_status_request(&mut self, id: RequestId) {
        if self.status_request == Some(id) {
            self.status_request = None;
        }
    }

    fn poll_due(&self, now: Instant) -> bool {
        if !self.polling || self.workflow.polling_suspended() || self.status_request.is_some() {
            return false;
        }
        let interval = self.config.poll_interval().max(Duration::from_millis(1));
        self.last_status_poll
            .map_or(true, |last| now.saturating_duration_since(last) >= interval)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("stream", &self.stream)
            .field("workflow", &self.workflow.state())
            .field("status_in_flight", &self.status_request.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minds_link_core::ports::{
        HttpCall, HttpCompletion, HttpReply, ManualClock, StreamConnectionState,
    };
    use minds_link_core::CoreError;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Backend {
        calls: Vec<HttpCall>,
        replies: VecDeque<HttpCompletion>,
    }

    struct ScriptedHttp(Rc<RefCell<Backend>>);

    impl HttpPort for ScriptedHttp {
        fn dispatch(&mut self, call: HttpCall) -> anyhow::Result<()> {
            self.0.borrow_mut().calls.push(call);
            Ok(())
        }

        fn poll_completions(&mut self) -> Vec<HttpCompletion> {
            self.0.borrow_mut().replies.drain(..).collect()
        }

        fn release(&mut self, _id: RequestId) {}

        fn abort_all(&mut self) {}
    }

    struct IdleSocket;

    impl StreamPort for IdleSocket {
        fn connect(&mut self, _url: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn poll(&mut self) {}
        fn state(&self) -> StreamConnectionState {
            StreamConnectionState::Disconnected
        }
        fn recv(&mut self) -> Option<String> {
            None
        }
        fn send_text(&mut self, _text: String) -> anyhow::Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    fn session(polling: bool) -> Result<(Session, Rc<RefCell<Backend>>, Arc<ManualClock>)> {
        let backend = Rc::new(RefCell::new(Backend::default()));
        let clock = Arc::new(ManualClock::new());
        let mut config = AppConfig::default();
        config.backend.client_id = Some("client-1".to_string());
        let mut session = Session::new(
            config,
            Box::new(ScriptedHttp(backend.clone())),
            Box::new(IdleSocket),
            None,
            clock.clone(),
        )?;
        session.set_polling(polling);
        Ok((session, backend, clock))
    }

    fn reply(backend: &Rc<RefCell<Backend>>, id: RequestId, body: serde_json::Value) {
        backend.borrow_mut().replies.push_back(HttpCompletion {
            id,
            outcome: Ok(HttpReply {
                status: 200,
                body: body.to_string(),
            }),
        });
    }

    #[test]
    fn test_status_response_reaches_mirror() -> Result<()> {
        let (mut session, backend, _clock) = session(false)?;
        let id = session
            .handle_command(Command::RefreshStatus)?
            .context("refresh returns an id")?;
        assert!(backend.borrow().calls[0].url.ends_with("/git/status?client_id=client-1"));

        reply(
            &backend,
            id,
            json!({"branch": "main", "files": [{"path": "a.gd", "status": "M", "staged": true}]}),
        );
        let updates = session.tick();

        assert!(updates.contains(&SessionUpdate::Status(ReconcileOutcome::Rebuilt {
            staged: 1,
            unstaged: 0
        })));
        assert!(session.mirror().has_staged());
        assert!(!session.status_in_flight());
        assert!(session.status_received());
        Ok(())
    }

    #[test]
    fn test_refresh_is_single_flight() -> Result<()> {
        let (mut session, backend, _clock) = session(false)?;
        let first = session.handle_command(Command::RefreshStatus)?;
        let second = session.handle_command(Command::RefreshStatus)?;
        assert_eq!(first, second);
        assert_eq!(backend.borrow().calls.len(), 1);
        Ok(())
    }

    #[test]
    fn test_periodic_poll_waits_for_interval() -> Result<()> {
        let (mut session, backend, clock) = session(true)?;
        session.tick();
        assert_eq!(backend.borrow().calls.len(), 1);

        let id = RequestId(1);
        reply(&backend, id, json!({"branch": "main", "files": []}));
        session.tick();
        assert_eq!(backend.borrow().calls.len(), 1);

        clock.advance(Duration::from_secs(2));
        session.tick();
        assert_eq!(backend.borrow().calls.len(), 2);
        Ok(())
    }

    #[test]
    fn test_commit_without_staged_files_stays_local() -> Result<()> {
        let (mut session, backend, _clock) = session(false)?;
        let error = session
            .handle_command(Command::Commit {
                message: "Add player".to_string(),
            })
            .err()
            .context("commit must be rejected")?;

        assert_eq!(
            error.downcast_ref::<CoreError>(),
            Some(&CoreError::validation("No files staged for commit"))
        );
        assert!(backend.borrow().calls.is_empty());
        Ok(())
    }

    #[test]
    fn test_finished_operation_requests_one_refresh() -> Result<()> {
        let (mut session, backend, _clock) = session(false)?;
        let id = session
            .handle_command(Command::Stage {
                files: vec!["a.gd".to_string()],
            })?
            .context("stage returns an id")?;

        reply(&backend, id, json!({"success": true, "message": "Staged 1 file"}));
        let updates = session.tick();
        assert!(updates.iter().any(|u| matches!(
            u,
            SessionUpdate::Workflow(WorkflowEvent::Finished { success: true, .. })
        )));
        assert!(session.status_in_flight());

        session.tick();
        let status_calls = backend
            .borrow()
            .calls
            .iter()
            .filter(|c| c.url.contains("/git/status"))
            .count();
        assert_eq!(status_calls, 1);
        Ok(())
    }

    #[test]
    fn test_refresh_after_operation_is_not_satisfied_by_older_fetch() -> Result<()> {
        let (mut session, backend, _clock) = session(false)?;
        let status_calls = |backend: &Rc<RefCell<Backend>>| {
            backend
                .borrow()
                .calls
                .iter()
                .filter(|c| c.url.contains("/git/status"))
                .count()
        };

        let before = session
            .handle_command(Command::RefreshStatus)?
            .context("refresh returns an id")?;
        let stage = session
            .handle_command(Command::Stage {
                files: vec!["a.gd".to_string()],
            })?
            .context("stage returns an id")?;

        // The stage finishes while the earlier fetch is still out
        reply(&backend, stage, json!({"success": true, "message": "Staged 1 file"}));
        session.tick();
        assert!(session.status_owed());
        assert_eq!(status_calls(&backend), 1);

        // The older snapshot lands, then a fresh fetch goes out
        reply(
            &backend,
            before,
            json!({"branch": "main", "files": [{"path": "a.gd", "status": "M", "staged": false}]}),
        );
        session.tick();
        assert_eq!(status_calls(&backend), 2);
        assert!(session.status_in_flight());
        assert!(!session.status_owed());

        let after = RequestId(3);
        reply(
            &backend,
            after,
            json!({"branch": "main", "files": [{"path": "a.gd", "status": "M", "staged": true}]}),
        );
        session.tick();
        assert_eq!(session.mirror().staged_paths(), vec!["a.gd"]);
        assert_eq!(status_calls(&backend), 2);
        Ok(())
    }

    #[test]
    fn test_quit_sets_flag() -> Result<()> {
        let (mut session, _backend, _clock) = session(false)?;
        assert_eq!(session.handle_command(Command::Quit)?, None);
        assert!(session.is_quit());
        assert!(session.shutdown(|| {}));
        Ok(())
    }
}
