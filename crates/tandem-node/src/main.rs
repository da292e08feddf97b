//! Tandem node binary.
//!
//! Runs local chat engines and logs every event they publish.
//!
//! # Usage
//!
//! ```bash
//! # Random chat against a simulated partner
//! tandem-node random
//!
//! # Two engines meeting in a private room
//! tandem-node room --code AB12CD
//!
//! # Force discovery failures to watch the retry path
//! tandem-node random --success-probability 0 --max-retries 2
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tandem_core::{EventKind, HexTransform, SessionConfig, SessionEvent, StatusKind};
use tandem_node::{Relay, SessionEngine, SystemEnv, load_config};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tandem chat pairing demo
#[derive(Parser, Debug)]
#[command(name = "tandem-node")]
#[command(about = "Anonymous two-party chat pairing demo")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Session configuration file (JSON, durations in milliseconds)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the discovery success probability
    #[arg(long, global = true)]
    success_probability: Option<f64>,

    /// Override the number of automatic discovery attempts
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Seconds to wait for a partner before giving up
    #[arg(long, global = true, default_value = "30")]
    timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Start a random chat
    Random,

    /// Create a private room and join it from a second engine
    Room {
        /// Room code; generated when omitted
        #[arg(short, long)]
        code: Option<String>,
    },
}

/// Time left for in-flight deliveries after the demo exchange.
const LINGER: Duration = Duration::from_secs(4);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => SessionConfig::default(),
    };
    if let Some(p) = args.success_probability {
        config.discovery_success_probability = p;
    }
    if let Some(n) = args.max_retries {
        config.max_retries = n;
    }
    config.validate()?;

    let relay = Relay::new();
    let wait = Duration::from_secs(args.timeout);

    match args.mode {
        Mode::Random => run_random(config, &relay, wait).await?,
        Mode::Room { code } => run_room(config, &relay, code, wait).await?,
    }

    Ok(())
}

async fn run_random(
    config: SessionConfig,
    relay: &Relay,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = spawn(config, relay, "you")?;
    let mut found = signal_on(&engine, EventKind::PartnerFound);

    engine.bootstrap();

    if tokio::time::timeout(wait, found.recv()).await.is_ok_and(|r| r.is_some()) {
        engine.send_typing(true);
        engine.send_message("Hello there!");
        tokio::time::sleep(LINGER).await;
    } else {
        tracing::warn!("no partner found within {}s", wait.as_secs());
    }

    tracing::info!(state = ?engine.state().await?, "final state");
    stop(&[engine]).await;
    Ok(())
}

async fn run_room(
    config: SessionConfig,
    relay: &Relay,
    code: Option<String>,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let host = spawn(config.clone(), relay, "host")?;
    let guest = spawn(config, relay, "guest")?;

    let (tx, mut created) = mpsc::unbounded_channel();
    host.on(EventKind::RoomCreated, move |event| {
        if let SessionEvent::RoomCreated { code, success: true } = event {
            let _ = tx.send(code.clone());
        }
    });
    let mut host_found = signal_on(&host, EventKind::PartnerFound);
    let mut guest_found = signal_on(&guest, EventKind::PartnerFound);

    host.create_room(code);
    let Ok(Some(code)) = tokio::time::timeout(wait, created.recv()).await else {
        stop(&[host, guest]).await;
        return Err("room creation failed".into());
    };

    guest.join_room(code);

    let paired = tokio::time::timeout(wait, async {
        host_found.recv().await.is_some() && guest_found.recv().await.is_some()
    })
    .await;

    if matches!(paired, Ok(true)) {
        host.send_message(format!("Hi, I am {}", host.label()));
        guest.send_typing(true);
        guest.send_message(format!("Hello, I am {}", guest.label()));
        tokio::time::sleep(LINGER).await;
    } else {
        tracing::warn!("partners did not meet within {}s", wait.as_secs());
    }

    stop(&[host, guest]).await;
    Ok(())
}

fn spawn(
    config: SessionConfig,
    relay: &Relay,
    name: &'static str,
) -> Result<SessionEngine, tandem_node::EngineError> {
    let engine = SessionEngine::spawn(SystemEnv::new(), config, relay, Arc::new(HexTransform))?;
    tracing::info!(name, identity = %engine.identity(), label = %engine.label(), "engine started");

    engine.events().subscribe_all(move |event| log_event(name, event));
    Ok(engine)
}

/// Channel that yields once per event of `kind`.
fn signal_on(engine: &SessionEngine, kind: EventKind) -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    engine.on(kind, move |_| {
        let _ = tx.send(());
    });
    rx
}

async fn stop(engines: &[SessionEngine]) {
    for engine in engines {
        engine.shutdown();
    }

    // Let the actors run their final disconnect
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn log_event(name: &str, event: &SessionEvent) {
    match event {
        SessionEvent::Connect => tracing::info!(name, "connected"),
        SessionEvent::PartnerFound { identity, label } => {
            tracing::info!(name, partner = %identity, %label, "partner found");
        },
        SessionEvent::MessageReceived(message) => {
            tracing::info!(name, from = %message.sender, content = %message.content, "message");
        },
        SessionEvent::Disconnect => tracing::info!(name, "disconnected"),
        SessionEvent::PartnerTyping(typing) => tracing::info!(name, typing, "partner typing"),
        SessionEvent::RoomCreated { code, success } => {
            tracing::info!(name, %code, success, "room created");
        },
        SessionEvent::RoomJoined { code, success, error } => {
            tracing::info!(name, %code, success, error = ?error, "room joined");
        },
        SessionEvent::ConnectionStatus(status) => match status.kind {
            StatusKind::Info => tracing::info!(name, "{}", status.message),
            StatusKind::Error => tracing::error!(name, "{}", status.message),
        },
    }
}
