//! tracer-agent - attach to a page inspector and follow its tracer.
//!
//! Usage: `tracer-agent [--config <path>] [--inspector <ws-url>] [--poll-ms <ms>]`
//!
//! Logs connection events and scripts as they are reported, and polls hit
//! counts while connected.
//!
//! # Environment Variables
//!
//! - `TRACER_AGENT_LOG` - Log level (default: "info")

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracer_agent::cdp::{CdpRuntime, InspectorLink};
use tracer_agent::{launcher_from_config, Agent, AgentConfig, AgentEvent, RelayLauncher};
use tracing::{info, warn};

const USAGE: &str = "Usage: tracer-agent [--config <path>] [--inspector <ws-url>] [--poll-ms <ms>]";

struct Args {
    config: Option<PathBuf>,
    inspector: Option<String>,
    poll: Duration,
}

fn parse_args() -> Result<Args> {
    let mut args = env::args().skip(1);
    let mut parsed = Args {
        config: None,
        inspector: None,
        poll: Duration::from_secs(2),
    };
    while let Some(a) = args.next() {
        match a.as_str() {
            "--config" => {
                parsed.config = Some(PathBuf::from(
                    args.next().context("--config requires a path")?,
                ));
            }
            "--inspector" => {
                parsed.inspector = Some(args.next().context("--inspector requires a URL")?);
            }
            "--poll-ms" => {
                let ms = args.next().context("--poll-ms requires a value")?;
                parsed.poll = Duration::from_millis(
                    ms.parse().with_context(|| format!("invalid --poll-ms: {}", ms))?,
                );
            }
            "-h" | "--help" => anyhow::bail!(USAGE),
            other => anyhow::bail!("Unknown argument `{}`\n{}", other, USAGE),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_env("TRACER_AGENT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AgentConfig::default(),
    };
    if let Some(url) = args.inspector {
        config.inspector_url = url;
    }
    config.validate().context("Invalid configuration")?;

    let relay: Arc<dyn RelayLauncher> = Arc::from(launcher_from_config(&config.relay)?);
    let runtime = Arc::new(CdpRuntime::new());

    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let link = InspectorLink::new(&config, runtime.clone()).spawn(notify_tx);

    let agent = Agent::new(config, runtime, relay);
    let mut events = agent.subscribe();
    let worker = agent.init(notify_rx)?;

    info!("Tracer agent started");

    let mut poll = tokio::time::interval(args.poll);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if !on_event(&agent, event) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = poll.tick(), if agent.is_ready() => {
                match agent.refresh_hit_counts().await {
                    Ok((totals, deltas)) if !deltas.is_empty() => {
                        info!(
                            functions = totals.functions.len(),
                            call_sites = totals.call_sites.len(),
                            "Hit counts updated"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Hit count refresh failed"),
                }
            }
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    link.abort();
    worker.abort();
    Ok(())
}

/// Log an agent event; returns false when the agent cannot continue
fn on_event(agent: &Agent, event: AgentEvent) -> bool {
    match event {
        AgentEvent::Connect => {
            info!(relay = ?agent.relay_prefix(), "Tracer connected");
        }
        AgentEvent::Disconnect => info!("Tracer disconnected"),
        AgentEvent::ReceivedScriptInfo(path) => {
            let functions = agent.functions_in_file(&path).len();
            info!(path = %path, functions, "Script instrumented");
        }
        AgentEvent::RelayFailed(reason) => {
            tracing::error!(reason = %reason, "Relay failed to start");
            return false;
        }
    }
    true
}
