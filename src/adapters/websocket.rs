use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use futures_util::{SinkExt, StreamExt};
use minds_link_core::ports::{StreamConnectionState, StreamPort};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const DISCONNECTED: u8 = 0;
const CONNECTING: u8 = 1;
const OPEN: u8 = 2;
const CLOSING: u8 = 3;

fn decode_state(raw: u8) -> StreamConnectionState {
    match raw {
        CONNECTING => StreamConnectionState::Connecting,
        OPEN => StreamConnectionState::Open,
        CLOSING => StreamConnectionState::Closing,
        _ => StreamConnectionState::Disconnected,
    }
}

/// `StreamPort` backed by tokio-tungstenite
///
/// A background task owns the socket. Inbound text frames are queued on a
/// crossbeam channel that lives for one connection; outbound frames go
/// through a tokio channel whose sender is dropped to request a close.
pub struct TungsteniteStreamAdapter {
    runtime: Handle,
    state: Arc<AtomicU8>,
    inbound_rx: Receiver<String>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl TungsteniteStreamAdapter {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            state: Arc::new(AtomicU8::new(DISCONNECTED)),
            inbound_rx: crossbeam_channel::never(),
            outbound: None,
            task: None,
        }
    }

    fn raw_state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }
}

impl StreamPort for TungsteniteStreamAdapter {
    fn connect(&mut self, url: &str) -> Result<()> {
        if self.raw_state() != DISCONNECTED {
            bail!("stream connection already active");
        }
        let url = url.to_string();
        url::Url::parse(&url).with_context(|| format!("Invalid stream URL: {}", url))?;

        // Frames left over from an earlier connection go with its receiver
        let (inbound, inbound_rx) = crossbeam_channel::unbounded();
        let stale = std::mem::replace(&mut self.inbound_rx, inbound_rx).len();
        if stale > 0 {
            debug!("Dropped {} unread frames from the previous connection", stale);
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.outbound = Some(out_tx);
        self.state.store(CONNECTING, Ordering::Release);

        let state = self.state.clone();
        self.task = Some(self.runtime.spawn(async move {
            run_socket(url, state.clone(), inbound, out_rx).await;
            state.store(DISCONNECTED, Ordering::Release);
        }));
        Ok(())
    }

    fn poll(&mut self) {
        if self.task.as_ref().is_some_and(|task| task.is_finished()) {
            debug!("Stream task finished");
            self.task = None;
            self.outbound = None;
        }
    }

    fn state(&self) -> StreamConnectionState {
        decode_state(self.raw_state())
    }

    fn recv(&mut self) -> Option<String> {
        self.inbound_rx.try_recv().ok()
    }

    fn send_text(&mut self, text: String) -> Result<()> {
        let outbound = self.outbound.as_ref().context("stream is not connected")?;
        outbound
            .send(Message::Text(text.into()))
            .map_err(|_| anyhow!("stream connection closed"))
    }

    fn close(&mut self) {
        match self.raw_state() {
            CONNECTING => {
                if let Some(task) = self.task.take() {
                    task.abort();
                }
                self.outbound = None;
                self.state.store(DISCONNECTED, Ordering::Release);
            }
            OPEN => {
                self.state.store(CLOSING, Ordering::Release);
                self.outbound = None;
            }
            _ => {}
        }
    }
}

impl Drop for TungsteniteStreamAdapter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_socket(
    url: String,
    state: Arc<AtomicU8>,
    inbound: Sender<String>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(e) => {
            warn!("WebSocket connect to {} failed: {}", url, e);
            return;
        }
    };
    info!("WebSocket open: {}", url);
    state.store(OPEN, Ordering::Release);

    let (mut sink, mut source) = socket.split();
    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        warn!("WebSocket send failed: {}", e);
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(text.as_str().to_owned()).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket read failed: {}", e);
                    break;
                }
            },
        }
    }
    info!("WebSocket closed: {}", url);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_failed_connect_returns_to_disconnected() -> Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        let mut adapter = TungsteniteStreamAdapter::new(runtime.handle().clone());

        adapter.connect("ws://127.0.0.1:9/ws")?;

        let deadline = Instant::now() + Duration::from_secs(10);
        while adapter.state() != StreamConnectionState::Disconnected && Instant::now() < deadline {
            adapter.poll();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(adapter.state(), StreamConnectionState::Disconnected);
        assert!(adapter.recv().is_none());
        Ok(())
    }

    #[test]
    fn test_reconnect_starts_with_empty_inbound_queue() -> Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        let mut adapter = TungsteniteStreamAdapter::new(runtime.handle().clone());
        let (old_tx, old_rx) = crossbeam_channel::unbounded();
        old_tx.send(r#"{"type":"ai_stream","token":"late"}"#.to_string())?;
        adapter.inbound_rx = old_rx;

        adapter.connect("ws://127.0.0.1:9/ws")?;
        assert!(adapter.recv().is_none());
        assert!(old_tx.send("after".to_string()).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_url_is_rejected() -> Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        let mut adapter = TungsteniteStreamAdapter::new(runtime.handle().clone());
        assert!(adapter.connect("not a url").is_err());
        assert_eq!(adapter.state(), StreamConnectionState::Disconnected);
        Ok(())
    }
}
