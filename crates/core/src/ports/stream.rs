use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Connection state of the streaming channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Port for a duplex text-frame connection (a WebSocket in production)
///
/// The port never calls back; the stream channel observes it by polling once
/// per tick.
pub trait StreamPort {
    /// Begin connecting; returns once the attempt has started
    fn connect(&mut self, url: &str) -> Result<()>;

    /// Advance the underlying transport and collect arrived frames
    fn poll(&mut self);

    /// State as of the last poll
    fn state(&self) -> StreamConnectionState;

    /// Next queued inbound text frame, oldest first
    fn recv(&mut self) -> Option<String>;

    /// Queue one outbound text frame
    fn send_text(&mut self, text: String) -> Result<()>;

    /// Begin closing the connection
    fn close(&mut self);
}
