//! rprtd - coordinate a parallel test run.
//!
//! Serves the relay workers post their events and logs to, and optionally
//! reads a local JSON-lines event stream as one more runner. Exits once the
//! last runner has finished and the launch is closed.

use anyhow::{Context, Result};
use clap::Parser;
use rprt_common::logging::{self, LogFormat};
use rprt_common::util::parse_attributes;
use rprt_common::{
    Dispatcher, HttpTransport, ReporterConfig, ReportingClient, RunnerEvent, parse_event_line,
};
use rprtd::{ParallelAgent, start_server};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "rprtd")]
#[command(author, version, about = "rprtd - merge parallel test runners into one reported launch")]
struct Cli {
    /// Path to the reporter configuration (TOML)
    #[arg(short, long, env = "RPRT_CONFIG")]
    config: Option<PathBuf>,

    /// Local JSON-lines event stream ("-" for stdin)
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Reporting service base URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Project name
    #[arg(long)]
    project: Option<String>,

    /// API token
    #[arg(long)]
    token: Option<String>,

    /// Launch name
    #[arg(long)]
    launch: Option<String>,

    /// Launch attributes, "key:value;tag"
    #[arg(long)]
    attributes: Option<String>,

    /// Report before/after hooks as items
    #[arg(long)]
    report_hooks: bool,

    /// Relay port
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not start the relay
    #[arg(long)]
    no_relay: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, config: &mut ReporterConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(project) = &self.project {
            config.project = project.clone();
        }
        if let Some(token) = &self.token {
            config.token = token.clone();
        }
        if let Some(launch) = &self.launch {
            config.launch = launch.clone();
        }
        if let Some(attributes) = &self.attributes {
            config.attributes = parse_attributes(attributes);
        }
        if self.report_hooks {
            config.report_hooks = true;
        }
        if let Some(port) = self.port {
            config.relay.port = port;
        }
        if self.no_relay {
            config.dont_launch_server = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    logging::init(cli.verbose, format);

    let mut config = ReporterConfig::from_sources(cli.config.as_deref())
        .context("Failed to load reporter configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid reporter configuration")?;
    if config.dont_launch_server && cli.events.is_none() {
        anyhow::bail!("Relay disabled and no --events stream given, nothing to coordinate");
    }

    let transport = HttpTransport::new(&config.endpoint, &config.project, &config.token)
        .context("Failed to build reporting client")?;
    info!("Reporting to {}", transport.base_url());
    let dispatcher = Dispatcher::new(transport, config.wait.children);
    let client: Arc<dyn ReportingClient> = Arc::new(dispatcher.clone());

    let relay = config.relay.clone();
    let serve = !config.dont_launch_server;
    let agent = ParallelAgent::new(client, config);
    let mut finished = agent.shutdown_signal();

    let server = if serve {
        Some(
            start_server(&relay, agent.clone())
                .await
                .context("Failed to start relay")?,
        )
    } else {
        None
    };

    if let Some(events) = cli.events.as_deref() {
        read_stream(&agent, events).await?;
    }
    if server.is_none() && agent.launch_data().launch().is_none() {
        warn!("Event stream never began a run, nothing was reported");
        return Ok(());
    }

    tokio::select! {
        _ = finished.wait_for(|done| *done) => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted before the launch finished"),
    }

    agent.flush().await;
    if let Some(server) = server {
        server.task.abort();
    }
    dispatcher.flush().await;
    info!("All reporting calls settled");
    Ok(())
}

async fn read_stream(agent: &ParallelAgent, events: &Path) -> Result<()> {
    let input: Box<dyn AsyncRead + Unpin + Send> = if events == Path::new("-") {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(events)
                .await
                .with_context(|| format!("Failed to open event stream {}", events.display()))?,
        )
    };
    let mut lines = BufReader::new(input).lines();
    let mut open = false;
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read event stream")?
    {
        if line.trim().is_empty() {
            continue;
        }
        match parse_event_line(&line) {
            Ok(event) => {
                match event {
                    RunnerEvent::RunBegin => open = true,
                    RunnerEvent::RunEnd => open = false,
                    _ => {}
                }
                agent.handle(event);
            }
            Err(err) => warn!("Skipping event: {err}"),
        }
    }

    if open {
        debug!("Event stream ended without run_end, leaving the launch");
        agent.handle(RunnerEvent::RunEnd);
    }
    Ok(())
}
