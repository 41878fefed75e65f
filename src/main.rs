use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use minds_link::adapters::{FileConfigStore, ReqwestHttpAdapter, TungsteniteStreamAdapter};
use minds_link::cli::{CliArgs, CliCommand};
use minds_link::services::{
    render_response, render_status, render_stream_event, render_workflow_event, Session,
    SessionUpdate,
};
use minds_link_core::app::{Command, ReconcileOutcome};
use minds_link_core::domain::{RequestId, StreamEvent, TransportEvent};
use minds_link_core::ports::{Clock, ConfigStore, SystemClock};
use minds_link_core::scene::HeadlessScene;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Logs go to stderr so command output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let store = match &args.config {
        Some(path) => FileConfigStore::with_path(path),
        None => FileConfigStore::new()?,
    };
    let mut config = store.load().context("Failed to load configuration")?;
    args.apply_overrides(&mut config);
    info!("Using backend {}", config.base_url());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("minds-link-io")
        .build()
        .context("Failed to start async runtime")?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::Release);
        }
    });

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let http = ReqwestHttpAdapter::new(runtime.handle().clone())?;
    let stream = TungsteniteStreamAdapter::new(runtime.handle().clone());
    let mut session = Session::new(
        config,
        Box::new(http),
        Box::new(stream),
        Some(Box::new(HeadlessScene::new())),
        clock,
    )?;

    let result = match args.command.resolve() {
        Ok(Some(command)) if args.command.uses_stream() => {
            run_streamed(&mut session, command, &interrupted)
        }
        Ok(Some(command)) => run_once(&mut session, &args.command, command, &interrupted),
        Ok(None) => run_watch(&mut session, &interrupted),
        Err(e) => Err(e),
    };

    let tick = session.config().tick_interval();
    session.shutdown(|| thread::sleep(tick));
    runtime.shutdown_timeout(Duration::from_secs(1));

    info!("minds-link shut down");
    result
}

/// Issue one command and print its answer
fn run_once(
    session: &mut Session,
    cli_command: &CliCommand,
    command: Command,
    interrupted: &AtomicBool,
) -> Result<()> {
    session.set_polling(false);

    if cli_command.needs_status() {
        let id = session.request_status()?;
        wait_for(session, id, interrupted)?;
        if !session.status_received() {
            bail!("Could not load git status");
        }
    }

    let id = session
        .handle_command(command)?
        .context("command did not start a request")?;
    let (channel, payload) = wait_for(session, id, interrupted)?;

    let output = if channel == "git_status" {
        render_status(session.mirror())
    } else {
        render_response(&channel, &payload)?
    };
    print!("{}", output);

    if payload.get("success").and_then(|v| v.as_bool()) == Some(false) {
        bail!("{} reported failure", channel);
    }
    Ok(())
}

/// Tick until the request with `id` reaches its terminal event
fn wait_for(
    session: &mut Session,
    id: RequestId,
    interrupted: &AtomicBool,
) -> Result<(String, serde_json::Value)> {
    let tick = session.config().tick_interval();
    loop {
        if interrupted.load(Ordering::Acquire) {
            bail!("Interrupted");
        }
        for update in session.tick() {
            match update {
                SessionUpdate::Transport(TransportEvent::Response {
                    id: done,
                    channel,
                    payload,
                    ..
                }) if done == id => return Ok((channel, payload)),
                SessionUpdate::Transport(TransportEvent::RequestFailed {
                    id: done, error, ..
                }) if done == id => return Err(anyhow!(error.user_message())),
                _ => {}
            }
        }
        thread::sleep(tick);
    }
}

/// Connect the stream, send one command and print its answer as it arrives
fn run_streamed(session: &mut Session, command: Command, interrupted: &AtomicBool) -> Result<()> {
    session.set_polling(false);
    session.handle_command(Command::Connect)?;
    let tick = session.config().tick_interval();
    let idle_limit = session.config().default_timeout();
    let mut deadline = Instant::now() + idle_limit;
    let mut stdout = std::io::stdout();
    let mut sent = false;

    loop {
        if interrupted.load(Ordering::Acquire) {
            bail!("Interrupted");
        }
        if Instant::now() >= deadline {
            bail!("No answer from {} in time", session.config().stream_url());
        }
        if !sent && session.stream().is_open() {
            session.handle_command(command.clone())?;
            sent = true;
        }
        for update in session.tick() {
            let SessionUpdate::Stream(event) = update else {
                continue;
            };
            match &event {
                StreamEvent::Token { token, .. } => {
                    deadline = Instant::now() + idle_limit;
                    print!("{}", token);
                }
                StreamEvent::Complete { .. } => {
                    println!();
                    return Ok(());
                }
                StreamEvent::Completion { completion, .. } => {
                    println!("{}", completion);
                    return Ok(());
                }
                StreamEvent::Error { message } => bail!("{}", message),
                _ => {}
            }
        }
        stdout.flush().context("Failed to flush stdout")?;
        thread::sleep(tick);
    }
}

/// Connect the stream and print everything until interrupted
fn run_watch(session: &mut Session, interrupted: &AtomicBool) -> Result<()> {
    session.handle_command(Command::Connect)?;
    let tick = session.config().tick_interval();
    let mut stdout = std::io::stdout();

    while !interrupted.load(Ordering::Acquire) && !session.is_quit() {
        for update in session.tick() {
            match update {
                SessionUpdate::Status(ReconcileOutcome::Skipped) => {}
                SessionUpdate::Status(_) => print!("{}", render_status(session.mirror())),
                SessionUpdate::Stream(event) => {
                    if let Some(text) = render_stream_event(&event) {
                        print!("{}", text);
                    }
                }
                SessionUpdate::Workflow(event) => {
                    if let Some(text) = render_workflow_event(&event) {
                        println!("{}", text);
                    }
                }
                SessionUpdate::Transport(TransportEvent::ApiError { message, .. }) => {
                    eprintln!("{}", message);
                }
                SessionUpdate::Transport(_) => {}
            }
        }
        stdout.flush().context("Failed to flush stdout")?;
        thread::sleep(tick);
    }
    Ok(())
}
