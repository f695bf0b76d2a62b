use std::future::Future;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use slavelink::backoff::{DEFAULT_MAX_BACKOFF_SECS, DEFAULT_MIN_BACKOFF_SECS};
use slavelink::config::{DEFAULT_PAGE_URL, DEFAULT_PORT};
use slavelink::protocol::{EVENT_CLOSE, EVENT_OPEN, EVENT_RECONNECT};
use slavelink::{
    BackoffBounds, ClientConfig, ClientError, ConfigError, ConnectionState, Event, Notification, SlaveClient,
    SlaveDirectory, SlaveId, WsConnector,
};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Client(#[from] ClientError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "slavelink", about = "Slave dispatcher websocket client")]
struct Cli {
    /// URL of the page hosting the client; the endpoint is derived from it.
    #[arg(long, env = "SLAVELINK_PAGE_URL", default_value = DEFAULT_PAGE_URL)]
    page_url: String,

    /// Explicit websocket endpoint, overrides --page-url.
    #[arg(long, env = "SLAVELINK_WS_URL")]
    ws_url: Option<String>,

    #[arg(long, env = "SLAVELINK_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, env = "SLAVELINK_MIN_BACKOFF_SECS", default_value_t = DEFAULT_MIN_BACKOFF_SECS)]
    min_backoff_secs: f64,

    #[arg(long, env = "SLAVELINK_MAX_BACKOFF_SECS", default_value_t = DEFAULT_MAX_BACKOFF_SECS)]
    max_backoff_secs: f64,

    /// Deadline for connecting and for each request.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every slave known to the dispatcher.
    Slaves,
    /// List the sources of one slave.
    Sources { id: u64 },
    /// Follow topology changes until the dispatcher goes away.
    Watch,
}

enum WatchEvent {
    Opened,
    Changed(Notification),
    Lifecycle(Event),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let backoff = BackoffBounds { min_secs: cli.min_backoff_secs, max_secs: cli.max_backoff_secs };
    let config = ClientConfig::build(&cli.page_url, cli.ws_url, cli.port, backoff)?;
    let timeout = Duration::from_secs(cli.timeout_secs);
    tracing::info!(endpoint = %config.endpoint, "using dispatcher endpoint");

    match cli.command {
        Command::Slaves => run_slaves(&config, timeout).await,
        Command::Sources { id } => run_sources(&config, timeout, SlaveId(id)).await,
        Command::Watch => run_watch(&config, timeout).await,
    }
}

async fn run_slaves(config: &ClientConfig, timeout: Duration) -> Result<(), CliError> {
    let client = connect(config, timeout).await?;
    let slaves = with_timeout(timeout, client.list_slaves()).await??;
    print_json(&serde_json::to_value(slaves)?)
}

async fn run_sources(config: &ClientConfig, timeout: Duration, id: SlaveId) -> Result<(), CliError> {
    let client = connect(config, timeout).await?;
    let sources = with_timeout(timeout, client.list_sources(id)).await??;
    print_json(&serde_json::to_value(sources)?)
}

async fn run_watch(config: &ClientConfig, timeout: Duration) -> Result<(), CliError> {
    let client = SlaveClient::new(config.backoff);
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Subscribe before opening so the first `open` is not missed.
    let opened = tx.clone();
    client.bus().subscribe(EVENT_OPEN, move |_: &Event| {
        opened.send(WatchEvent::Opened)?;
        Ok(())
    });
    for kind in [EVENT_CLOSE, EVENT_RECONNECT] {
        let lifecycle = tx.clone();
        client.bus().subscribe(kind, move |event: &Event| {
            lifecycle.send(WatchEvent::Lifecycle(event.clone()))?;
            Ok(())
        });
    }
    client.on_notification(move |notification| {
        tx.send(WatchEvent::Changed(notification))?;
        Ok(())
    });

    let mut task = client.open(WsConnector, config.endpoint.clone())?;
    let mut directory = SlaveDirectory::new();

    loop {
        tokio::select! {
            _ = &mut task => {
                tracing::info!("connection finished");
                return Ok(());
            }
            Some(event) = rx.recv() => match event {
                // Every (re)open starts from a fresh snapshot.
                WatchEvent::Opened => match with_timeout(timeout, client.list_slaves()).await {
                    Ok(Ok(slaves)) => {
                        directory = SlaveDirectory::from_snapshot(slaves);
                        println!("snapshot: {} slaves", directory.len());
                        print_json(&serde_json::to_value(directory.slaves())?)?;
                    }
                    Ok(Err(error)) => tracing::warn!(%error, "listSlaves failed"),
                    Err(error) => tracing::warn!(%error, "listSlaves failed"),
                },
                WatchEvent::Changed(notification) => {
                    let id = notification.slave_id();
                    if directory.apply(&notification) {
                        println!("{} {id}", notification.kind());
                        if let Some(slave) = directory.get(id) {
                            print_json(&serde_json::to_value(slave)?)?;
                        }
                    }
                }
                WatchEvent::Lifecycle(event) => println!("{} {}", event.kind, event.data),
            },
        }
    }
}

/// Start a websocket client and wait until it is open.
async fn connect(config: &ClientConfig, timeout: Duration) -> Result<SlaveClient, CliError> {
    let (client, _task) = SlaveClient::connect(config)?;
    with_timeout(timeout, client.connection().wait_for(ConnectionState::Open)).await?;
    Ok(client)
}

async fn with_timeout<F: Future>(timeout: Duration, fut: F) -> Result<F::Output, CliError> {
    tokio::time::timeout(timeout, fut).await.map_err(|_| CliError::Timeout(timeout))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
