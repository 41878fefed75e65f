use crate::app::bus::{EventBus, SubscriptionId};
use crate::domain::events::StreamEvent;
use crate::error::{CoreError, Result};
use crate::ports::editor::{action_error, EditorActions, EDITOR_ACTION_CATALOG};
use crate::ports::stream::{StreamConnectionState, StreamPort};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub url: String,
    /// Inbound frames handled per tick at most
    pub messages_per_tick: usize,
    pub auto_reconnect: bool,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub heartbeat_interval: Duration,
    pub close_poll_attempts: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8005/ws".to_string(),
            messages_per_tick: 10,
            auto_reconnect: true,
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            close_poll_attempts: 10,
        }
    }
}

/// Bidirectional message channel to the backend
///
/// The connection is observed by polling the port once per tick; nothing
/// here blocks or calls back.
pub struct StreamChannel {
    port: Box<dyn StreamPort>,
    config: StreamConfig,
    editor: Option<Box<dyn EditorActions>>,
    last_state: StreamConnectionState,
    connected: bool,
    wants_connection: bool,
    reconnect_attempts: u32,
    reconnect_at: Option<Instant>,
    last_heartbeat: Option<Instant>,
    events: EventBus<StreamEvent>,
}

impl StreamChannel {
    pub fn new(port: Box<dyn StreamPort>, config: StreamConfig) -> Self {
        Self {
            port,
            config,
            editor: None,
            last_state: StreamConnectionState::Disconnected,
            connected: false,
            wants_connection: false,
            reconnect_attempts: 0,
            reconnect_at: None,
            last_heartbeat: None,
            events: EventBus::new(),
        }
    }

    /// Attach the scene façade that answers `editor_action` frames
    ///
    /// Fails unless the façade declares at least one action and every
    /// declared action is a known one.
    pub fn with_editor(mut self, editor: Box<dyn EditorActions>) -> Result<Self> {
        let supported = editor.supported_actions();
        if supported.is_empty() {
            return Err(CoreError::configuration(
                "editor façade declares no supported actions",
            ));
        }
        if let Some(unknown) = supported
            .iter()
            .find(|action| !EDITOR_ACTION_CATALOG.contains(*action))
        {
            return Err(CoreError::configuration(format!(
                "editor façade declares unknown action '{}'",
                unknown
            )));
        }

        info!("Editor façade attached with {} actions", supported.len());
        self.editor = Some(editor);
        Ok(self)
    }

    pub fn state(&self) -> StreamConnectionState {
        self.last_state
    }

    pub fn is_open(&self) -> bool {
        self.last_state == StreamConnectionState::Open
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// When the next reconnect attempt is due, if one is scheduled
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn subscribe<F>(&mut self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&StreamEvent) + 'static,
    {
        self.events.subscribe(name, handler)
    }

    pub fn events_mut(&mut self) -> &mut EventBus<StreamEvent> {
        &mut self.events
    }

    pub fn connect(&mut self, now: Instant) {
        if self.is_open() {
            warn!("Stream already open, ignoring connect");
            return;
        }
        self.wants_connection = true;
        self.reconnect_at = None;
        self.open_port(now);
    }

    /// Close the connection and stop reconnecting
    pub fn disconnect(&mut self) {
        self.wants_connection = false;
        self.reconnect_at = None;
        if self.last_state != StreamConnectionState::Disconnected {
            info!("Closing stream connection");
            self.port.close();
        }
    }

    pub fn tick(&mut self, now: Instant) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        self.port.poll();
        let state = self.port.state();
        if state != self.last_state {
            debug!("Stream state {:?} -> {:?}", self.last_state, state);
            match state {
                StreamConnectionState::Open => {
                    info!("Stream connected to {}", self.config.url);
                    self.connected = true;
                    self.reconnect_attempts = 0;
                    self.last_heartbeat = Some(now);
                    events.push(StreamEvent::Connected);
                }
                StreamConnectionState::Disconnected => {
                    if self.connected {
                        info!("Stream disconnected");
                        self.connected = false;
                        events.push(StreamEvent::Disconnected);
                    }
                    self.schedule_reconnect(now);
                }
                StreamConnectionState::Connecting | StreamConnectionState::Closing => {}
            }
            self.last_state = state;
        }

        match state {
            StreamConnectionState::Open => {
                self.drain_inbound(&mut events);
                self.heartbeat(now);
            }
            StreamConnectionState::Disconnected => {
                if self.reconnect_at.is_some_and(|due| now >= due) {
                    self.reconnect_at = None;
                    info!("Reconnecting (attempt {})", self.reconnect_attempts);
                    self.open_port(now);
                }
            }
            _ => {}
        }

        for event in &events {
            self.events.emit(event);
        }
        events
    }

    /// Send `{"type": message_type, "data": data}` as one text frame
    pub fn send(&mut self, message_type: &str, data: Value) -> Result<()> {
        self.send_frame(json!({ "type": message_type, "data": data }))
    }

    /// Send an already-shaped frame
    pub fn send_frame(&mut self, frame: Value) -> Result<()> {
        if !self.is_open() {
            let err = CoreError::state(format!(
                "cannot send on a {:?} stream",
                self.last_state
            ));
            error!("{}", err);
            return Err(err);
        }

        self.port.send_text(frame.to_string()).map_err(|e| {
            error!("Stream send failed: {:#}", e);
            CoreError::Network {
                message: format!("{:#}", e),
                refused: false,
            }
        })
    }

    /// Ask the backend to stream an answer as `ai_stream` frames
    pub fn ask_streaming(&mut self, prompt: &str, context: Option<Value>) -> Result<()> {
        if prompt.trim().is_empty() {
            return Err(CoreError::validation("prompt must not be empty"));
        }
        let mut frame = json!({ "type": "ai_ask", "prompt": prompt });
        if let Some(context) = context {
            frame["context"] = context;
        }
        self.send_frame(frame)
    }

    /// Ask for an inline completion at a cursor; the answer arrives as a
    /// `completion_suggestion` frame
    pub fn request_completion(
        &mut self,
        file_path: &str,
        file_content: &str,
        cursor_line: u32,
        cursor_column: u32,
    ) -> Result<()> {
        if file_path.trim().is_empty() {
            return Err(CoreError::validation("file path must not be empty"));
        }
        self.send_frame(json!({
            "type": "completion",
            "file_path": file_path,
            "file_content": file_content,
            "cursor_line": cursor_line,
            "cursor_column": cursor_column,
        }))
    }

    /// Cancel reconnects, close and poll until closed; `pause` runs between polls
    pub fn shutdown<F: FnMut()>(&mut self, attempts: usize, mut pause: F) -> bool {
        self.disconnect();
        for _ in 0..attempts {
            self.port.poll();
            if self.port.state() == StreamConnectionState::Disconnected {
                self.last_state = StreamConnectionState::Disconnected;
                self.connected = false;
                return true;
            }
            pause();
        }
        warn!("Stream did not close after {} polls", attempts);
        false
    }

    /// Delay before the next reconnect attempt
    pub fn backoff_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.reconnect_attempts);
        self.config
            .reconnect_base
            .saturating_mul(factor)
            .min(self.config.reconnect_max)
    }

    fn open_port(&mut self, now: Instant) {
        if let Err(e) = self.port.connect(&self.config.url) {
            warn!("Stream connect to {} failed: {:#}", self.config.url, e);
            self.schedule_reconnect(now);
        }
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if !self.wants_connection || !self.config.auto_reconnect {
            return;
        }
        let delay = self.backoff_delay();
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.reconnect_at = Some(now + delay);
        info!("Stream reconnect scheduled in {:?}", delay);
    }

    fn heartbeat(&mut self, now: Instant) {
        let due = self
            .last_heartbeat
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.heartbeat_interval);
        if due {
            self.last_heartbeat = Some(now);
            if let Err(e) = self.send_frame(json!({ "type": "ping" })) {
                warn!("Heartbeat not sent: {}", e);
            }
        }
    }

    fn drain_inbound(&mut self, events: &mut Vec<StreamEvent>) {
        for _ in 0..self.config.messages_per_tick {
            let Some(text) = self.port.recv() else {
                break;
            };
            if let Some(event) = self.dispatch(&text) {
                events.push(event);
            }
        }
    }

    fn dispatch(&mut self, text: &str) -> Option<StreamEvent> {
        let frame: Value = match serde_json::from_str(text) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => {
                warn!("{}", CoreError::decode("stream frame is not a JSON object"));
                return None;
            }
            Err(e) => {
                warn!("{}", CoreError::decode(format!("stream frame is not JSON: {}", e)));
                return None;
            }
        };

        let Some(message_type) = frame.get("type").and_then(Value::as_str) else {
            warn!("Stream frame without a type: {}", text);
            return None;
        };

        match message_type {
            "ai_stream_token" | "ai_stream" => Some(StreamEvent::Token {
                token: text_field(&frame, "token").unwrap_or_default(),
                accumulated: text_field(&frame, "accumulated"),
            }),
            "ai_stream_complete" | "ai_stream_end" => Some(StreamEvent::Complete {
                full_response: text_field(&frame, "full_response"),
            }),
            "ai_stream_start" => Some(StreamEvent::StreamStarted),
            "completion_suggestion" => Some(StreamEvent::Completion {
                completion: text_field(&frame, "completion").unwrap_or_default(),
                multi_line: field(&frame, "multi_line")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            "file_changed" => match text_field(&frame, "file_path") {
                Some(file_path) => Some(StreamEvent::FileChanged {
                    file_path,
                    chunks_updated: field(&frame, "chunks_updated")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                }),
                None => {
                    warn!("file_changed frame without file_path");
                    None
                }
            },
            "editor_action" => self.run_editor_action(&frame),
            "error" => Some(StreamEvent::Error {
                message: text_field(&frame, "message")
                    .or_else(|| text_field(&frame, "error"))
                    .unwrap_or_else(|| "unknown stream error".to_string()),
            }),
            "pong" => {
                debug!("Heartbeat acknowledged");
                None
            }
            other => {
                warn!("Ignoring stream message of type '{}'", other);
                None
            }
        }
    }

    fn run_editor_action(&mut self, frame: &Value) -> Option<StreamEvent> {
        let Some(request_id) = text_field(frame, "request_id") else {
            warn!("editor_action frame without request_id");
            return None;
        };
        let action = text_field(frame, "action").unwrap_or_default();
        let params = frame
            .get("data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);

        let result = match self.editor.as_mut() {
            Some(editor) if editor.supported_actions().iter().any(|a| *a == action) => {
                editor.perform(&action, &params)
            }
            Some(_) => action_error(format!("Unsupported action: {}", action)),
            None => action_error("No editor attached"),
        };

        let reply = json!({
            "type": "editor_response",
            "request_id": request_id,
            "result": result,
        });
        if let Err(e) = self.send_frame(reply) {
            warn!("editor_response for {} not sent: {}", request_id, e);
        }

        Some(StreamEvent::EditorAction {
            request_id,
            action,
            result,
        })
    }
}

impl std::fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel")
            .field("url", &self.config.url)
            .field("state", &self.last_state)
            .field("editor", &self.editor.is_some())
            .finish()
    }
}

/// Read a field from the frame root, falling back to its `data` object
fn field<'a>(frame: &'a Value, key: &str) -> Option<&'a Value> {
    frame
        .get(key)
        .or_else(|| frame.get("data").and_then(|data| data.get(key)))
}

fn text_field(frame: &Value, key: &str) -> Option<String> {
    field(frame, key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Wire {
        state: StreamConnectionState,
        inbound: VecDeque<String>,
        sent: Vec<String>,
        connects: usize,
        fail_connect: bool,
    }

    struct FakeSocket(Rc<RefCell<Wire>>);

    impl StreamPort for FakeSocket {
        fn connect(&mut self, _url: &str) -> anyhow::Result<()> {
            let mut wire = self.0.borrow_mut();
            wire.connects += 1;
            if wire.fail_connect {
                anyhow::bail!("connection refused");
            }
            wire.state = StreamConnectionState::Connecting;
            Ok(())
        }

        fn poll(&mut self) {
            let mut wire = self.0.borrow_mut();
            if wire.state == StreamConnectionState::Closing {
                wire.state = StreamConnectionState::Disconnected;
            }
        }

        fn state(&self) -> StreamConnectionState {
            self.0.borrow().state
        }

        fn recv(&mut self) -> Option<String> {
            self.0.borrow_mut().inbound.pop_front()
        }

        fn send_text(&mut self, text: String) -> anyhow::Result<()> {
            self.0.borrow_mut().sent.push(text);
            Ok(())
        }

        fn close(&mut self) {
            self.0.borrow_mut().state = StreamConnectionState::Closing;
        }
    }

    struct EchoEditor;

    impl EditorActions for EchoEditor {
        fn supported_actions(&self) -> Vec<&'static str> {
            vec!["get_selection"]
        }

        fn perform(&mut self, action: &str, _data: &Map<String, Value>) -> Value {
            json!({ "success": true, "action": action })
        }
    }

    struct BogusEditor;

    impl EditorActions for BogusEditor {
        fn supported_actions(&self) -> Vec<&'static str> {
            vec!["format_disk"]
        }

        fn perform(&mut self, _action: &str, _data: &Map<String, Value>) -> Value {
            Value::Null
        }
    }

    fn open_channel() -> (StreamChannel, Rc<RefCell<Wire>>, Instant) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let mut channel = StreamChannel::new(Box::new(FakeSocket(wire.clone())), StreamConfig::default());
        let now = Instant::now();
        channel.connect(now);
        wire.borrow_mut().state = StreamConnectionState::Open;
        (channel, wire, now)
    }

    #[test]
    fn test_send_rejected_unless_open() {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let mut channel = StreamChannel::new(Box::new(FakeSocket(wire.clone())), StreamConfig::default());
        let result = channel.send("ai_ask", json!({"prompt": "hi"}));
        assert!(matches!(result, Err(CoreError::State { .. })));
        assert!(wire.borrow().sent.is_empty());
    }

    #[test]
    fn test_connected_fires_once_and_frames_are_budgeted() {
        let (mut channel, wire, now) = open_channel();
        for i in 0..15 {
            wire.borrow_mut()
                .inbound
                .push_back(json!({"type": "ai_stream_token", "data": {"token": i.to_string()}}).to_string());
        }

        let first = channel.tick(now);
        assert_eq!(first[0], StreamEvent::Connected);
        let tokens: Vec<_> = first[1..]
            .iter()
            .map(|e| match e {
                StreamEvent::Token { token, .. } => token.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(tokens, (0..10).map(|i| i.to_string()).collect::<Vec<_>>());

        let second = channel.tick(now);
        assert_eq!(second.len(), 5);
        assert_eq!(
            second[0],
            StreamEvent::Token {
                token: "10".to_string(),
                accumulated: None
            }
        );
    }

    #[test]
    fn test_backend_frame_shapes() {
        let (mut channel, wire, now) = open_channel();
        {
            let mut wire = wire.borrow_mut();
            wire.inbound.push_back(r#"{"type":"ai_stream_start","message":"Starting"}"#.into());
            wire.inbound.push_back(r#"{"type":"ai_stream","token":"Hi","accumulated":"Hi"}"#.into());
            wire.inbound.push_back(r#"{"type":"ai_stream_end","full_response":"Hi"}"#.into());
            wire.inbound.push_back(r#"{"type":"pong"}"#.into());
            wire.inbound.push_back("not json".into());
            wire.inbound.push_back(r#"{"type":"mystery"}"#.into());
            wire.inbound.push_back(r#"{"type":"file_changed","file_path":"a.gd","chunks_updated":3}"#.into());
        }

        let events = channel.tick(now);
        assert_eq!(
            events,
            vec![
                StreamEvent::Connected,
                StreamEvent::StreamStarted,
                StreamEvent::Token {
                    token: "Hi".to_string(),
                    accumulated: Some("Hi".to_string())
                },
                StreamEvent::Complete {
                    full_response: Some("Hi".to_string())
                },
                StreamEvent::FileChanged {
                    file_path: "a.gd".to_string(),
                    chunks_updated: 3
                },
            ]
        );
    }

    #[test]
    fn test_editor_action_gets_reply() -> Result<()> {
        let (channel, wire, now) = open_channel();
        let mut channel = channel.with_editor(Box::new(EchoEditor))?;
        wire.borrow_mut().inbound.push_back(
            json!({"type": "editor_action", "request_id": "req_7", "action": "get_selection", "data": {}})
                .to_string(),
        );
        wire.borrow_mut().inbound.push_back(
            json!({"type": "editor_action", "request_id": "req_8", "action": "save_scene", "data": {}})
                .to_string(),
        );
        channel.tick(now);

        let sent: Vec<Value> = wire
            .borrow()
            .sent
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .filter(|v: &Value| v["type"] == "editor_response")
            .collect();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["request_id"], "req_7");
        assert_eq!(sent[0]["result"]["success"], true);
        assert_eq!(sent[1]["result"]["success"], false);
        Ok(())
    }

    #[test]
    fn test_unknown_editor_capability_rejected() {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let result = StreamChannel::new(Box::new(FakeSocket(wire)), StreamConfig::default())
            .with_editor(Box::new(BogusEditor));
        assert!(matches!(result, Err(CoreError::Configuration { .. })));
    }

    #[test]
    fn test_reconnect_backoff_doubles_and_caps() {
        let wire = Rc::new(RefCell::new(Wire {
            fail_connect: true,
            ..Wire::default()
        }));
        let mut channel = StreamChannel::new(Box::new(FakeSocket(wire.clone())), StreamConfig::default());
        let mut now = Instant::now();
        channel.connect(now);

        let mut delays = Vec::new();
        for _ in 0..7 {
            let due = match channel.reconnect_at() {
                Some(due) => due,
                None => panic!("reconnect not scheduled"),
            };
            delays.push(due.duration_since(now).as_secs());
            now = due;
            channel.tick(now);
        }
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(wire.borrow().connects, 8);
    }

    #[test]
    fn test_disconnect_event_only_after_connected_and_shutdown_closes() {
        let (mut channel, wire, now) = open_channel();
        channel.tick(now);
        wire.borrow_mut().state = StreamConnectionState::Disconnected;
        let events = channel.tick(now);
        assert_eq!(events, vec![StreamEvent::Disconnected]);
        assert!(channel.reconnect_at().is_some());

        let events = channel.tick(now);
        assert!(events.is_empty());

        wire.borrow_mut().state = StreamConnectionState::Open;
        channel.tick(now);
        let mut pauses = 0;
        assert!(channel.shutdown(10, || pauses += 1));
        assert_eq!(pauses, 0);
        assert_eq!(channel.state(), StreamConnectionState::Disconnected);
        assert!(channel.reconnect_at().is_none());
    }

    fn sent_frames(wire: &Rc<RefCell<Wire>>) -> Vec<Value> {
        wire.borrow()
            .sent
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .collect()
    }

    #[test]
    fn test_ask_streaming_sends_flat_frame() -> Result<()> {
        let (mut channel, wire, now) = open_channel();
        channel.tick(now);

        channel.ask_streaming("Why is the player falling?", Some(json!({"file": "player.gd"})))?;
        channel.ask_streaming("And now?", None)?;
        assert!(matches!(
            channel.ask_streaming("   ", None),
            Err(CoreError::Validation { .. })
        ));

        let asks: Vec<Value> = sent_frames(&wire)
            .into_iter()
            .filter(|v| v["type"] == "ai_ask")
            .collect();
        assert_eq!(asks.len(), 2);
        assert_eq!(
            asks[0],
            json!({"type": "ai_ask", "prompt": "Why is the player falling?", "context": {"file": "player.gd"}})
        );
        assert!(asks[1].get("context").is_none());
        assert!(asks[1].get("data").is_none());
        Ok(())
    }

    #[test]
    fn test_completion_request_and_suggestion() -> Result<()> {
        let (mut channel, wire, now) = open_channel();
        channel.tick(now);

        channel.request_completion("player.gd", "func _ready():\n\t", 2, 1)?;
        assert!(matches!(
            channel.request_completion("", "x", 0, 0),
            Err(CoreError::Validation { .. })
        ));

        let completions: Vec<Value> = sent_frames(&wire)
            .into_iter()
            .filter(|v| v["type"] == "completion")
            .collect();
        assert_eq!(
            completions,
            vec![json!({
                "type": "completion",
                "file_path": "player.gd",
                "file_content": "func _ready():\n\t",
                "cursor_line": 2,
                "cursor_column": 1
            })]
        );

        wire.borrow_mut().inbound.push_back(
            json!({"type": "completion_suggestion", "completion": "pass", "multi_line": false})
                .to_string(),
        );
        assert_eq!(
            channel.tick(now),
            vec![StreamEvent::Completion {
                completion: "pass".to_string(),
                multi_line: false
            }]
        );
        Ok(())
    }

    #[test]
    fn test_completion_needs_open_stream() {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let mut channel = StreamChannel::new(Box::new(FakeSocket(wire.clone())), StreamConfig::default());
        let result = channel.request_completion("player.gd", "", 0, 0);
        assert!(matches!(result, Err(CoreError::State { .. })));
        assert!(wire.borrow().sent.is_empty());
    }

    #[test]
    fn test_heartbeat_sent_on_interval() {
        let (mut channel, wire, now) = open_channel();
        channel.tick(now);
        channel.tick(now + Duration::from_secs(10));
        channel.tick(now + Duration::from_secs(31));
        let pings = wire
            .borrow()
            .sent
            .iter()
            .filter(|s| s.contains("\"ping\""))
            .count();
        assert_eq!(pings, 1);
    }
}
