use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use minds_link_core::domain::RequestId;
use minds_link_core::ports::{
    HttpCall, HttpCompletion, HttpMethod, HttpPort, HttpReply, TransportFailure,
};
use std::collections::HashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// `HttpPort` backed by reqwest on a background tokio runtime
///
/// Each call runs as its own task; the finished reply is handed back over a
/// crossbeam channel that `poll_completions` drains without blocking.
pub struct ReqwestHttpAdapter {
    runtime: Handle,
    client: reqwest::Client,
    tx: Sender<HttpCompletion>,
    rx: Receiver<HttpCompletion>,
    tasks: HashMap<RequestId, JoinHandle<()>>,
}

impl ReqwestHttpAdapter {
    pub fn new(runtime: Handle) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("minds-link/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        let (tx, rx) = crossbeam_channel::unbounded();

        Ok(Self {
            runtime,
            client,
            tx,
            rx,
            tasks: HashMap::new(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }
}

impl HttpPort for ReqwestHttpAdapter {
    fn dispatch(&mut self, call: HttpCall) -> Result<()> {
        let client = self.client.clone();
        let tx = self.tx.clone();
        let id = call.id;

        debug!("Dispatching {} {:?} {}", id, call.method, call.url);
        let handle = self.runtime.spawn(async move {
            let outcome = execute(&client, call).await;
            // The receiver only goes away with the adapter itself
            let _ = tx.send(HttpCompletion { id, outcome });
        });
        self.tasks.insert(id, handle);
        Ok(())
    }

    fn poll_completions(&mut self) -> Vec<HttpCompletion> {
        self.rx.try_iter().collect()
    }

    fn release(&mut self, id: RequestId) {
        if let Some(handle) = self.tasks.remove(&id) {
            handle.abort();
        }
    }

    fn abort_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

async fn execute(
    client: &reqwest::Client,
    call: HttpCall,
) -> std::result::Result<HttpReply, TransportFailure> {
    let mut request = match call.method {
        HttpMethod::Get => client.get(&call.url),
        HttpMethod::Post => client.post(&call.url),
        HttpMethod::Delete => client.delete(&call.url),
    };
    if let Some(body) = &call.body {
        request = request.json(body);
    }

    let response = request.send().await.map_err(failure)?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(failure)?;
    Ok(HttpReply { status, body })
}

fn failure(e: reqwest::Error) -> TransportFailure {
    TransportFailure {
        message: e.to_string(),
        refused: e.is_connect(),
    }
}
