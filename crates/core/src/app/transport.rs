use crate::app::bus::{EventBus, SubscriptionId};
use crate::app::registry::{RegistryConfig, RequestRegistry};
use crate::domain::events::TransportEvent;
use crate::domain::request::{PendingRequest, RequestId, RequestKind};
use crate::error::{CoreError, Result};
use crate::ports::http::{HttpCall, HttpMethod, HttpPort, HttpReply, TransportFailure};
use crate::ports::time::Clock;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Body of `/ai/ask`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AskRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
}

impl AskRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// One turn of an `/ai/chat` history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// HTTP/JSON client for the backend
///
/// Calls return as soon as they are dispatched. Replies, failures and
/// timeouts come out of `poll` on a later tick, exactly one per request.
pub struct TransportClient {
    http: Box<dyn HttpPort>,
    clock: Arc<dyn Clock>,
    base_url: Url,
    registry: RequestRegistry,
    routes: HashMap<RequestKind, String>,
    default_timeout: Duration,
    events: EventBus<TransportEvent>,
}

impl TransportClient {
    pub fn new(
        base_url: &str,
        http: Box<dyn HttpPort>,
        clock: Arc<dyn Clock>,
        registry_config: RegistryConfig,
        default_timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            CoreError::configuration(format!("invalid backend URL '{}': {}", base_url, e))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.host_str().is_none() {
            return Err(CoreError::configuration(format!(
                "backend URL must be http(s) with a host, got '{}'",
                base_url
            )));
        }

        registry_config.validate()?;

        let routes = RequestKind::BUILTIN
            .iter()
            .filter_map(|kind| {
                kind.default_channel()
                    .map(|channel| (kind.clone(), channel.to_string()))
            })
            .collect();

        Ok(Self {
            http,
            clock,
            base_url,
            registry: RequestRegistry::new(registry_config),
            routes,
            default_timeout,
            events: EventBus::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Route a kind to a response channel, replacing any existing route
    pub fn add_route(&mut self, kind: RequestKind, channel: impl Into<String>) {
        self.routes.insert(kind, channel.into());
    }

    pub fn route(&self, kind: &RequestKind) -> Option<&str> {
        self.routes.get(kind).map(String::as_str)
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    pub fn active_requests(&self) -> usize {
        self.registry.active_count()
    }

    pub fn subscribe<F>(&mut self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&TransportEvent) + 'static,
    {
        self.events.subscribe(name, handler)
    }

    pub fn events_mut(&mut self) -> &mut EventBus<TransportEvent> {
        &mut self.events
    }

    pub fn get(
        &mut self,
        endpoint: &str,
        kind: RequestKind,
        timeout: Option<Duration>,
    ) -> Result<RequestId> {
        self.get_with_query(endpoint, &[], kind, timeout)
    }

    pub fn get_with_query(
        &mut self,
        endpoint: &str,
        query: &[(&str, String)],
        kind: RequestKind,
        timeout: Option<Duration>,
    ) -> Result<RequestId> {
        let url = self.build_url(endpoint, query)?;
        self.dispatch(HttpMethod::Get, url, None, kind, timeout)
    }

    pub fn post(
        &mut self,
        endpoint: &str,
        body: Value,
        kind: RequestKind,
        timeout: Option<Duration>,
    ) -> Result<RequestId> {
        let url = self.build_url(endpoint, &[])?;
        self.dispatch(HttpMethod::Post, url, Some(body), kind, timeout)
    }

    pub fn delete(
        &mut self,
        endpoint: &str,
        kind: RequestKind,
        timeout: Option<Duration>,
    ) -> Result<RequestId> {
        let url = self.build_url(endpoint, &[])?;
        self.dispatch(HttpMethod::Delete, url, None, kind, timeout)
    }

    pub fn git_status(&mut self, client_id: Option<&str>) -> Result<RequestId> {
        let query: Vec<(&str, String)> = client_id
            .filter(|id| !id.is_empty())
            .map(|id| ("client_id", id.to_string()))
            .into_iter()
            .collect();
        self.get_with_query("/git/status", &query, RequestKind::GitStatus, None)
    }

    pub fn git_diff(&mut self, path: &str) -> Result<RequestId> {
        require_text("file path", path)?;
        self.get_with_query(
            "/git/diff",
            &[("file", path.to_string())],
            RequestKind::GitDiff,
            None,
        )
    }

    pub fn git_add(&mut self, files: &[String]) -> Result<RequestId> {
        require_files(files)?;
        self.post("/git/add", json!({ "files": files }), RequestKind::GitAdd, None)
    }

    pub fn git_restore(&mut self, files: &[String]) -> Result<RequestId> {
        require_files(files)?;
        self.post(
            "/git/restore",
            json!({ "files": files }),
            RequestKind::GitRestore,
            None,
        )
    }

    pub fn git_commit(&mut self, message: &str, files: &[String]) -> Result<RequestId> {
        require_text("commit message", message)?;
        require_files(files)?;
        self.post(
            "/git/commit",
            json!({ "message": message, "files": files }),
            RequestKind::GitCommit,
            None,
        )
    }

    pub fn git_checkout(&mut self, branch: &str, create_new: bool) -> Result<RequestId> {
        require_text("branch name", branch)?;
        self.post(
            "/git/checkout",
            json!({ "branch": branch, "create_new": create_new }),
            RequestKind::GitCheckout,
            None,
        )
    }

    pub fn git_branches(&mut self) -> Result<RequestId> {
        self.get("/git/branches", RequestKind::GitBranches, None)
    }

    pub fn git_log(&mut self, max_count: u32) -> Result<RequestId> {
        if !(1..=100).contains(&max_count) {
            return Err(CoreError::validation(format!(
                "max_count must be between 1 and 100, got {}",
                max_count
            )));
        }
        self.get_with_query(
            "/git/log",
            &[("max_count", max_count.to_string())],
            RequestKind::GitLog,
            None,
        )
    }

    pub fn ai_ask(&mut self, request: &AskRequest) -> Result<RequestId> {
        require_text("prompt", &request.prompt)?;
        let body = serde_json::to_value(request)
            .map_err(|e| CoreError::validation(format!("unencodable ask request: {}", e)))?;
        self.post("/ai/ask", body, RequestKind::AiAsk, None)
    }

    pub fn ai_chat(&mut self, message: &str, history: &[ChatMessage]) -> Result<RequestId> {
        require_text("chat message", message)?;
        self.post(
            "/ai/chat",
            json!({ "message": message, "history": history }),
            RequestKind::AiChat,
            None,
        )
    }

    pub fn ai_complete(
        &mut self,
        file_path: &str,
        content: &str,
        line: u32,
        column: u32,
    ) -> Result<RequestId> {
        require_text("file path", file_path)?;
        self.post(
            "/ai/complete",
            json!({
                "file_path": file_path,
                "file_content": content,
                "cursor_line": line,
                "cursor_column": column,
            }),
            RequestKind::AiComplete,
            None,
        )
    }

    pub fn ai_commit_message(
        &mut self,
        staged_files: &[String],
        diff_content: Option<&str>,
    ) -> Result<RequestId> {
        require_files(staged_files)?;
        let mut body = json!({ "staged_files": staged_files });
        if let Some(diff) = diff_content.filter(|d| !d.is_empty()) {
            body["diff_content"] = Value::String(diff.to_string());
        }
        self.post(
            "/ai/generate/commit-message",
            body,
            RequestKind::AiCommitMessage,
            None,
        )
    }

    pub fn index_project(&mut self, project_path: &str, force_reindex: bool) -> Result<RequestId> {
        require_text("project path", project_path)?;
        self.post(
            "/index/",
            json!({ "project_path": project_path, "force_reindex": force_reindex }),
            RequestKind::Index,
            None,
        )
    }

    pub fn index_search(&mut self, query: &str, max_results: u32) -> Result<RequestId> {
        require_text("search query", query)?;
        if max_results == 0 {
            return Err(CoreError::validation("max_results must be at least 1"));
        }
        self.get_with_query(
            "/index/search",
            &[("query", query.to_string()), ("max_results", max_results.to_string())],
            RequestKind::Search,
            None,
        )
    }

    pub fn index_stats(&mut self) -> Result<RequestId> {
        self.get("/index/stats", RequestKind::IndexStats, None)
    }

    pub fn index_clear(&mut self) -> Result<RequestId> {
        self.delete("/index/clear", RequestKind::IndexClear, None)
    }

    /// Collect finished calls and expired requests, emitting one terminal
    /// event set per request
    pub fn poll(&mut self, now: Instant) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        for completion in self.http.poll_completions() {
            self.http.release(completion.id);
            let Some(request) = self.registry.complete(completion.id) else {
                continue;
            };

            match classify(&request, completion.outcome) {
                Ok(payload) => match self.routes.get(&request.kind) {
                    Some(channel) => {
                        debug!("{} answered on {}", request.id, channel);
                        events.push(TransportEvent::Response {
                            id: request.id,
                            kind: request.kind,
                            channel: channel.clone(),
                            payload,
                        });
                    }
                    None => {
                        let error = CoreError::UnknownRoute {
                            kind: request.kind.to_string(),
                        };
                        warn!("Dropping response for {}: {}", request.id, error);
                    }
                },
                Err(error) => self.push_failure(&mut events, request, error),
            }
        }

        for request in self.registry.sweep(now) {
            self.http.release(request.id);
            let error = CoreError::Timeout {
                request: request.id.to_string(),
                elapsed_ms: request.elapsed(now).as_millis(),
            };
            self.push_failure(&mut events, request, error);
        }

        for event in &events {
            self.events.emit(event);
        }
        events
    }

    /// Abort every outstanding call and forget all tracked requests
    pub fn shutdown(&mut self) {
        self.http.abort_all();
        let dropped = self.registry.drain();
        if !dropped.is_empty() {
            info!("Aborted {} in-flight requests", dropped.len());
        }
    }

    fn push_failure(
        &self,
        events: &mut Vec<TransportEvent>,
        request: PendingRequest,
        error: CoreError,
    ) {
        warn!("{} ({}) failed: {}", request.id, request.kind, error);
        let channel = self
            .routes
            .get(&request.kind)
            .cloned()
            .unwrap_or_else(|| request.kind.to_string());

        events.push(TransportEvent::ApiError {
            id: Some(request.id),
            kind: Some(request.kind.clone()),
            message: error.user_message(),
            error: error.clone(),
        });
        events.push(TransportEvent::RequestFailed {
            id: request.id,
            kind: request.kind,
            channel,
            error,
        });
    }

    fn build_url(&self, endpoint: &str, query: &[(&str, String)]) -> Result<String> {
        if endpoint.is_empty() {
            return Err(CoreError::validation("endpoint must not be empty"));
        }
        if !endpoint.starts_with('/') {
            return Err(CoreError::validation(format!(
                "endpoint must start with '/', got '{}'",
                endpoint
            )));
        }

        let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), endpoint);
        let mut url = Url::parse(&joined)
            .map_err(|e| CoreError::validation(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    fn dispatch(
        &mut self,
        method: HttpMethod,
        url: String,
        body: Option<Value>,
        kind: RequestKind,
        timeout: Option<Duration>,
    ) -> Result<RequestId> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let now = self.clock.now();
        let http = &mut self.http;
        let call_url = url.clone();

        self.registry.submit_with(kind, url, timeout, now, move |id| {
            http.dispatch(HttpCall {
                id,
                method,
                url: call_url,
                body,
                timeout,
            })
        })
    }
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("base_url", &self.base_url.as_str())
            .field("active", &self.registry.active_count())
            .field("routes", &self.routes.len())
            .finish()
    }
}

fn classify(
    request: &PendingRequest,
    outcome: std::result::Result<HttpReply, TransportFailure>,
) -> Result<Value> {
    let reply = outcome.map_err(|failure| CoreError::Network {
        message: failure.message,
        refused: failure.refused,
    })?;

    if !(200..300).contains(&reply.status) {
        return Err(CoreError::Http {
            status: reply.status,
            url: request.url.clone(),
        });
    }

    let payload: Value = serde_json::from_str(&reply.body)
        .map_err(|e| CoreError::decode(format!("response is not JSON: {}", e)))?;
    if !payload.is_object() {
        return Err(CoreError::decode("response is not a JSON object"));
    }
    Ok(payload)
}

fn require_text(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn require_files(files: &[String]) -> Result<()> {
    if files.is_empty() {
        return Err(CoreError::validation("no files given"));
    }
    if files.iter().any(|f| f.trim().is_empty()) {
        return Err(CoreError::validation("file paths must not be empty"));
    }
    Ok(())
}
