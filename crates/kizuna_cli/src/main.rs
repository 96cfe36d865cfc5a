use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kizuna_behavior::{BehaviorMachine, BehaviorRuntime, Cue, HeartbeatConfig, Observer, RuntimeClock};
use kizuna_core::{EventEnvelope, KizunaConfig, Mode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Feed JSON-lines events to the behaviour core and print what it does.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "kizuna.toml", env = "KIZUNA_CONFIG")]
    config: PathBuf,

    /// Emit logs as JSON on stderr
    #[arg(long)]
    json: bool,

    /// Heartbeat interval in milliseconds (overrides the config)
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Seed for idle presence choices, for reproducible sessions
    #[arg(long)]
    seed: Option<u64>,
}

/// Writes mode changes and cues to stdout, one JSON object per line.
struct StdoutObserver;

impl Observer for StdoutObserver {
    fn on_mode_changed(&self, mode: Mode) {
        println!("{}", serde_json::json!({ "mode": mode }));
    }

    fn on_cue(&self, cue: &Cue) {
        match serde_json::to_string(cue) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to encode cue: {}", e),
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.json);

    let config = KizunaConfig::load_or_default(&args.config);
    let heartbeat = HeartbeatConfig::from_millis(args.tick_ms.unwrap_or(config.runtime.tick_interval_ms));

    let mut machine = BehaviorMachine::new(config, Arc::new(RuntimeClock::new()));
    if let Some(seed) = args.seed {
        machine = machine.with_presence_seed(seed);
    }
    machine.add_observer(Arc::new(StdoutObserver));

    let (handle, task) = BehaviorRuntime::spawn(machine, heartbeat);
    info!("Kizuna is listening for events on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let envelope: EventEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Skipping unreadable line: {}", e);
                continue;
            }
        };
        match envelope.event.as_str() {
            "utterance_boundary" => handle.utterance_boundary().await?,
            "snapshot" => {
                let snapshot = handle.snapshot().await?;
                println!("{}", serde_json::to_string(&snapshot)?);
            }
            "quit" => break,
            _ => handle.submit_named(envelope.event, envelope.payload).await?,
        }
    }

    handle.shutdown().await?;
    let machine = task.await?;
    info!(mode = %machine.mode(), "Shutting down");
    Ok(())
}
