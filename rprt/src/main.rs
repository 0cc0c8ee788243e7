//! rprt - report a test runner's event stream.
//!
//! Reads JSON-lines runner events (and annotations) from a file or stdin and
//! reports them to the configured reporting service.

use anyhow::{Context, Result};
use clap::Parser;
use rprt::{Reporter, StreamLine, parse_stream_line};
use rprt_common::logging::{self, LogFormat};
use rprt_common::util::{load_attachment, parse_attributes};
use rprt_common::{Dispatcher, HttpTransport, ReporterConfig, ReportingClient, RunnerEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "rprt")]
#[command(author, version, about = "rprt - report test runner events to a reporting service")]
struct Cli {
    /// Path to the reporter configuration (TOML)
    #[arg(short, long, env = "RPRT_CONFIG")]
    config: Option<PathBuf>,

    /// JSON-lines event stream to read (stdin when omitted)
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

    /// Launch description
    #[arg(long)]
    description: Option<String>,

    /// Launch attributes, "key:value;tag"
    #[arg(long)]
    attributes: Option<String>,

    /// Report before/after hooks as items
    #[arg(long)]
    report_hooks: bool,

    /// Whether skipped tests count as issues
    #[arg(long)]
    skipped_issue: Option<bool>,

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
        if let Some(description) = &self.description {
            config.description = Some(description.clone());
        }
        if let Some(attributes) = &self.attributes {
            config.attributes = parse_attributes(attributes);
        }
        if self.report_hooks {
            config.report_hooks = true;
        }
        if self.skipped_issue.is_some() {
            config.skipped_issue = self.skipped_issue;
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

    let transport = HttpTransport::new(&config.endpoint, &config.project, &config.token)
        .context("Failed to build reporting client")?;
    info!("Reporting to {}", transport.base_url());
    let dispatcher = Dispatcher::new(transport, config.wait.children);
    let client: Arc<dyn ReportingClient> = Arc::new(dispatcher.clone());

    let mut reporter = Reporter::new(client, config);
    read_stream(&mut reporter, cli.events.as_deref()).await?;

    dispatcher.flush().await;
    info!("All reporting calls settled");
    Ok(())
}

async fn read_stream(reporter: &mut Reporter, events: Option<&Path>) -> Result<()> {
    let input: Box<dyn AsyncRead + Unpin + Send> = match events {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open event stream {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let api = reporter.api();
    let mut lines = BufReader::new(input).lines();
    let mut run_ended = false;

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read event stream")?
    {
        if line.trim().is_empty() {
            continue;
        }
        match parse_stream_line(&line) {
            Ok(StreamLine::Event(event)) => {
                run_ended = matches!(event, RunnerEvent::RunEnd);
                reporter.handle(event);
            }
            Ok(StreamLine::Annotation(mut annotation)) => {
                if let Some(file) = annotation.file().map(PathBuf::from) {
                    match load_attachment(&file) {
                        Ok(attachment) => annotation.set_attachment(attachment),
                        Err(err) => warn!("Failed to read attachment {}: {err}", file.display()),
                    }
                }
                api.send(annotation);
            }
            Err(err) => warn!("Skipping event: {err}"),
        }
    }

    if !run_ended {
        debug!("Event stream ended without run_end, finishing the run");
        reporter.handle(RunnerEvent::RunEnd);
    }
    Ok(())
}
