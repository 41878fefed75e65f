use crate::domain::request::RequestId;
use anyhow::Result;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

/// An outbound call handed to the HTTP port
#[derive(Debug, Clone, PartialEq)]
pub struct HttpCall {
    pub id: RequestId,
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
    pub timeout: Duration,
}

/// Raw reply; the transport client decides what counts as success
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// The call never produced an HTTP reply
#[derive(Debug, Clone, PartialEq)]
pub struct TransportFailure {
    pub message: String,
    /// Connection refused / host unreachable
    pub refused: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpCompletion {
    pub id: RequestId,
    pub outcome: std::result::Result<HttpReply, TransportFailure>,
}

/// Port for non-blocking HTTP dispatch
///
/// `dispatch` must return immediately; the reply is collected later by
/// `poll_completions` on a subsequent tick.
pub trait HttpPort {
    /// Start a call. An error means the call was not accepted at all.
    fn dispatch(&mut self, call: HttpCall) -> Result<()>;

    /// Completions that arrived since the last poll, in arrival order
    fn poll_completions(&mut self) -> Vec<HttpCompletion>;

    /// Drop whatever is still held for a request (finished or timed out)
    fn release(&mut self, id: RequestId);

    /// Abort every outstanding call
    fn abort_all(&mut self);
}
