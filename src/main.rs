use std::collections::{HashMap, HashSet};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use switchboard_core::config::AppConfig;
use switchboard_core::error::Result;
use switchboard_core::event::EventBus;
use switchboard_core::hooks::{NoHooks, ShellHooks};
use switchboard_core::traits::{CallControl, DialogBridge, SessionHooks};
use switchboard_core::types::{CallId, DialogRequest, Directive, FlowEvent, InboundEvent, Outcome};

use switchboard_flow::{hours_from_config, storefront_flow, FlowDefinition, SessionExecutor};
use switchboard_runtime::CallDispatcher;

#[derive(Parser)]
#[command(name = "switchboard", version, about = "Call-flow engine for telephony bots")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "switchboard.toml", env = "SWITCHBOARD_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines event script and print the directives issued
    Simulate {
        /// Script file, one inbound event per line (`-` for stdin)
        script: PathBuf,
        /// How long to wait for a session to reach its dialog before sending a turn
        #[arg(long, default_value = "5")]
        turn_timeout_secs: u64,
    },
    /// Build the flow and report its nodes
    Check,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("switchboard=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "switchboard", &mut io::stdout());
        return Ok(());
    }

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Check => {
            let flow = build_flow(&config)?;
            print_flow(&flow);
        }
        Commands::Simulate {
            script,
            turn_timeout_secs,
        } => {
            let events = read_script(&script)?;
            simulate(&config, events, Duration::from_secs(turn_timeout_secs)).await?;
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn build_flow(config: &AppConfig) -> Result<FlowDefinition> {
    let hooks: Arc<dyn SessionHooks> = match &config.hooks {
        Some(hooks) if !hooks.is_empty() => Arc::new(ShellHooks::new(hooks.clone())),
        _ => Arc::new(NoHooks),
    };
    storefront_flow(config, hours_from_config(config), hooks)
}

fn print_flow(flow: &FlowDefinition) {
    let graph = flow.graph();
    println!(
        "Flow OK: {} nodes, initial {}, default error {}",
        graph.len(),
        graph.initial(),
        graph.default_error()
    );
    for (id, node) in graph.iter() {
        let next: Vec<String> = node
            .next_edge()
            .map(|e| e.targets().iter().map(|t| t.to_string()).collect())
            .unwrap_or_default();
        println!(
            "  {:>4}  {:<13} {:<20} -> [{}]",
            id.to_string(),
            node.action.kind().to_string(),
            node.description,
            next.join(", ")
        );
    }
    for tag in flow.locales().tags() {
        let entry = flow
            .locales()
            .get(&tag)
            .and_then(|v| v.dialog_entry)
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into());
        let marker = if &tag == flow.locales().default_tag() {
            " (default)"
        } else {
            ""
        };
        println!("  locale {}{} enters dialog at {}", tag, marker, entry);
    }
    println!(
        "  transfers to {} use {:?}",
        flow.transfer().main_number(),
        flow.transfer().trunk()
    );
}

fn read_script(path: &Path) -> anyhow::Result<Vec<InboundEvent>> {
    let lines: Vec<String> = if path == Path::new("-") {
        io::stdin().lock().lines().collect::<io::Result<_>>()?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?
            .lines()
            .map(str::to_string)
            .collect()
    };
    let mut events = Vec::new();
    for (n, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: InboundEvent = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid event", path.display(), n + 1))?;
        events.push(event);
    }
    Ok(events)
}

/// Prints every directive and accepts it.
struct LoggingPlatform;

impl LoggingPlatform {
    fn print(call_id: &CallId, directive: &Directive) {
        let json = serde_json::to_string(directive).unwrap_or_else(|_| directive.name().into());
        println!("[{}] {}", call_id, json);
    }
}

impl CallControl for LoggingPlatform {
    fn execute(&self, call_id: &CallId, directive: &Directive) -> BoxFuture<'_, Result<Outcome>> {
        Self::print(call_id, directive);
        Box::pin(async { Ok(Outcome::success()) })
    }
}

impl DialogBridge for LoggingPlatform {
    fn start_dialog(&self, call_id: &CallId, request: &DialogRequest) -> BoxFuture<'_, Result<()>> {
        Self::print(call_id, &request.directive());
        Box::pin(async { Ok(()) })
    }
}

async fn simulate(
    config: &AppConfig,
    events: Vec<InboundEvent>,
    turn_timeout: Duration,
) -> anyhow::Result<()> {
    let flow = Arc::new(build_flow(config)?);
    let event_bus = Arc::new(EventBus::new(config.runtime.event_bus_capacity));
    let mut bus_rx = event_bus.subscribe();
    let platform = Arc::new(LoggingPlatform);
    let executor = Arc::new(SessionExecutor::new(
        flow,
        platform.clone(),
        platform,
        event_bus,
    ));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down simulation...");
        cancel_clone.cancel();
    });

    let (tx, rx) = mpsc::channel(config.runtime.inbound_buffer);
    let dispatcher = CallDispatcher::new(executor, cancel.clone())
        .with_lane_buffer(config.runtime.lane_buffer)
        .keep_reports();
    let task = tokio::spawn(dispatcher.run(rx));

    // Dialog turns are only meaningful once the session is waiting for one.
    let mut waits = DialogWaits::default();
    for event in events {
        if let InboundEvent::DialogTurnComplete { call_id, .. } = &event {
            waits.wait_for(call_id, &mut bus_rx, turn_timeout).await;
        }
        if tx.send(event).await.is_err() {
            break;
        }
    }
    drop(tx);

    let summary = task.await?;
    println!();
    for report in &summary.reports {
        println!(
            "{}: {} after {} hops, {} directives",
            report.call_id,
            report.reason,
            report.hops,
            report.directives.len()
        );
    }
    println!(
        "{} sessions, {} stale events",
        summary.sessions_started, summary.stale_events
    );
    Ok(())
}

/// Tracks how many dialog suspensions each call has that no turn has answered.
#[derive(Default)]
struct DialogWaits {
    open: HashMap<CallId, usize>,
    ended: HashSet<CallId>,
}

impl DialogWaits {
    fn observe(&mut self, event: FlowEvent) {
        match event {
            FlowEvent::DialogSuspended { call_id, .. } => {
                *self.open.entry(call_id).or_default() += 1;
            }
            FlowEvent::SessionEnded { call_id, .. } => {
                self.open.remove(&call_id);
                self.ended.insert(call_id);
            }
            _ => {}
        }
    }

    async fn wait_for(
        &mut self,
        call_id: &CallId,
        bus_rx: &mut broadcast::Receiver<FlowEvent>,
        timeout: Duration,
    ) {
        // Catch up on anything already published.
        while let Ok(event) = bus_rx.try_recv() {
            self.observe(event);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(open) = self.open.get_mut(call_id) {
                if *open > 0 {
                    *open -= 1;
                    return;
                }
            }
            if self.ended.contains(call_id) {
                return;
            }
            match tokio::time::timeout_at(deadline, bus_rx.recv()).await {
                Ok(Ok(event)) => self.observe(event),
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!(skipped = n, "Simulation fell behind the event bus");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => {
                    warn!(call_id = %call_id, "No dialog waiting, sending turn anyway");
                    return;
                }
            }
        }
    }
}
