use anyhow::Context;
use clap::{Parser, Subcommand};
use conductor_a2a::{AgentRegistry, TaskEventKind, TaskRequest, TaskTransport};
use conductor_core::logging::{init_tracing, LogFormat};
use conductor_orchestrator::{
    parse_plan, ConductorConfig, Orchestrator, RunOutcome, RunRequest, StaticPlanner,
};
use conductor_tools::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor: routes tasks between A2A agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    /// Emit logs as JSON regardless of the config
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print it
    Check,
    /// Register configured agents (with card discovery) and list them
    Agents,
    /// Send one task to one agent
    Send {
        /// Registered agent name
        #[arg(long)]
        agent: String,
        /// Task description
        #[arg(long)]
        text: String,
        /// Context passed alongside the description
        #[arg(long, default_value = "")]
        context: String,
        /// Subscribe to the event stream instead of waiting for the result
        #[arg(long)]
        stream: bool,
    },
    /// Run a query through the scheduler with a fixed plan
    Run {
        /// The originating query
        #[arg(long)]
        query: String,
        /// JSON file with the task list (`[{"agent", "description"}]`)
        #[arg(long)]
        plan: PathBuf,
        #[arg(long, default_value = "cli")]
        user: String,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConductorConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config file '{}'", cli.config.display()))?;

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        config.log_format
    };
    init_tracing(format);

    match cli.command {
        Commands::Check => check(&config),
        Commands::Agents => {
            let registry = build_registry(&config).await;
            let agents = registry.status().await;
            if agents.is_empty() {
                println!("No agents registered.");
                println!("Configure agents in conductor.toml under [[agents]]");
            } else {
                println!("Registered agents:");
                for agent in &agents {
                    println!("  {} -> {}", agent.name, agent.endpoint);
                    if agent.streaming {
                        println!("    streaming: yes");
                    }
                    if !agent.skills.is_empty() {
                        println!("    skills: {}", agent.skills.join(", "));
                    }
                }
                println!("\nTotal: {} agent(s)", agents.len());
            }
        }
        Commands::Send {
            agent,
            text,
            context,
            stream,
        } => {
            let registry = build_registry(&config).await;
            let handle = registry.resolve(&agent).await?;
            let transport = TaskTransport::new(config.transport.request_timeout());
            let request = TaskRequest::new(format!("cli-{}", uuid::Uuid::new_v4().simple()), text)
                .with_context(context);

            if stream {
                let subscription = transport.send_streaming(&handle, &request).await?;
                let events = subscription.timeout(transport.timeout());
                tokio::pin!(events);
                while let Some(event) = events.next().await {
                    let Ok(event) = event else {
                        anyhow::bail!(
                            "no event from '{agent}' within {}s",
                            transport.timeout().as_secs()
                        );
                    };
                    match &event.kind {
                        TaskEventKind::Status { state, message } => {
                            println!("[{state}] {}", message.as_deref().unwrap_or_default());
                        }
                        TaskEventKind::ArtifactChunk { text, .. } => print!("{text}"),
                        TaskEventKind::Completed { result } => {
                            println!();
                            println!("{}", serde_json::to_string_pretty(result)?);
                        }
                        TaskEventKind::Error { kind, message } => {
                            anyhow::bail!("{kind} error from '{agent}': {message}");
                        }
                    }
                }
            } else {
                let result = transport.send_sync(&handle, &request).await?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
        Commands::Run {
            query,
            plan,
            user,
            json,
        } => {
            let plan_text = tokio::fs::read_to_string(&plan)
                .await
                .with_context(|| format!("Failed to read plan file '{}'", plan.display()))?;
            let tasks = parse_plan(&plan_text)?;

            let registry = Arc::new(build_registry(&config).await);
            let mut orchestrator = Orchestrator::new(
                &config,
                registry,
                Arc::new(ToolRegistry::new()),
                Arc::new(StaticPlanner::new(tasks)),
            );
            if config.transport.prefer_streaming {
                let (tx, mut rx) = mpsc::channel(64);
                orchestrator = orchestrator.with_progress(tx);
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let TaskEventKind::ArtifactChunk { text, .. } = event.kind {
                            eprintln!("[{}] {text}", event.agent);
                        }
                    }
                });
            }
            let orchestrator = Arc::new(orchestrator);

            let handle = orchestrator.spawn(RunRequest::new(query, user));
            let request_id = handle.request_id().to_string();
            let token = handle.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!(request_id = %request_id, "Interrupted, cancelling query");
                    token.cancel();
                }
            });
            let report = handle.join().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary);
            }
            if report.outcome != RunOutcome::Finished {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn check(config: &ConductorConfig) {
    let s = &config.scheduler;
    println!("Configuration OK");
    println!(
        "  scheduler: max_failures={} max_replans={} backoff={}..{}ms context_max_chars={}",
        s.max_failures,
        s.max_replans,
        s.retry_backoff_base_ms,
        s.retry_backoff_max_ms,
        s.context_max_chars
    );
    println!(
        "  transport: timeout={}s prefer_streaming={}",
        config.transport.request_timeout_secs, config.transport.prefer_streaming
    );
    println!("  monitor: retain_finished={}", config.monitor.retain_finished);
    println!("  agents:");
    for agent in &config.agents {
        let discovery = agent
            .card_path
            .as_deref()
            .map(|p| format!(" (card {p})"))
            .unwrap_or_default();
        println!("    {} -> {}{discovery}", agent.name, agent.url);
    }
}

/// Register configured agents, logging the ones that could not be reached.
async fn build_registry(config: &ConductorConfig) -> AgentRegistry {
    let (registry, errors) = AgentRegistry::from_config(&config.agents).await;
    for e in &errors {
        warn!(error = %e, "Agent not registered");
    }
    info!(agents = registry.len().await, "Agent registry ready");
    registry
}
