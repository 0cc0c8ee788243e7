//! Reporter configuration.
//!
//! Settings come from three layers, later layers winning:
//! - a TOML file (`--config`)
//! - `RPRT_*` environment variables (see [`env`])
//! - command-line flags, applied by the binaries
//!
//! [`ReporterConfig::validate`] runs before any remote call is made.

pub mod env;

pub use env::{EnvError, EnvParser};

use crate::errors::ConfigError;
use crate::types::{Attribute, LaunchMode};
use crate::util::parse_attributes;
use crate::wait::PollPolicy;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::debug;

/// Full reporter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Base URL of the reporting service, e.g. `https://reports.example.com`.
    pub endpoint: String,
    pub project: String,
    /// API token sent as a bearer credential.
    pub token: String,
    /// Launch name.
    pub launch: String,
    pub description: Option<String>,
    /// Launch attributes; a `"k:v;tag"` string or an array of tables.
    #[serde(deserialize_with = "deserialize_attributes")]
    pub attributes: Vec<Attribute>,
    pub mode: LaunchMode,
    pub rerun: bool,
    pub rerun_of: Option<String>,
    /// Report before/after hooks as items.
    pub report_hooks: bool,
    /// `Some(false)` marks skipped items as not needing investigation.
    pub skipped_issue: Option<bool>,
    /// Parallel mode: do not start the local relay.
    pub dont_launch_server: bool,
    /// Parallel mode: dump launch data at debug level on finish.
    pub debug: bool,
    pub relay: RelayConfig,
    pub wait: WaitConfig,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            project: String::new(),
            token: String::new(),
            launch: String::new(),
            description: None,
            attributes: Vec::new(),
            mode: LaunchMode::Default,
            rerun: false,
            rerun_of: None,
            report_hooks: false,
            skipped_issue: None,
            dont_launch_server: false,
            debug: false,
            relay: RelayConfig::default(),
            wait: WaitConfig::default(),
        }
    }
}

/// Address of the local relay used in parallel mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8089,
        }
    }
}

impl RelayConfig {
    /// `host:port` for binding or connecting.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL workers post to.
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr())
    }
}

/// Poll settings for each wait site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Parent finish waiting on its children inside the dispatcher.
    pub children: PollPolicy,
    /// Launch finish waiting for its suites' finish calls to be dispatched.
    pub launch_children: PollPolicy,
    /// Suite finish waiting for its children's finish calls to complete.
    pub suite_children: PollPolicy,
    /// Relay log target lookup by suite and test name.
    pub find_item: PollPolicy,
    /// Lookup of a test or suite record that may not be registered yet.
    pub item_info: PollPolicy,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            children: PollPolicy::from_millis(100, 10_000),
            launch_children: PollPolicy::from_millis(100, 10_000),
            suite_children: PollPolicy::from_millis(1_000, 10_000),
            find_item: PollPolicy::from_millis(500, 10_000),
            item_info: PollPolicy::from_millis(100, 10_000),
        }
    }
}

impl ReporterConfig {
    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the optional file, then apply `RPRT_*` overrides from the process
    /// environment.
    pub fn from_sources(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        let mut parser = EnvParser::new();
        config.apply_env(&mut parser);
        if parser.has_errors() {
            let messages: Vec<String> = parser.errors().iter().map(ToString::to_string).collect();
            return Err(ConfigError::Env(messages.join("; ")));
        }
        Ok(config)
    }

    /// Apply environment overrides. Invalid values are left in `parser`.
    pub fn apply_env(&mut self, parser: &mut EnvParser) {
        if let Some(v) = parser.get_string("ENDPOINT") {
            self.endpoint = v;
        }
        if let Some(v) = parser.get_string("TOKEN") {
            self.token = v;
        }
        if let Some(v) = parser.get_string("PROJECT") {
            self.project = v;
        }
        if let Some(v) = parser.get_string("LAUNCH") {
            self.launch = v;
        }
        if let Some(v) = parser.get_string("DESCRIPTION") {
            self.description = Some(v);
        }
        if let Some(v) = parser.get_string("ATTRIBUTES") {
            self.attributes = parse_attributes(&v);
        }
        if let Some(v) = parser.get_parsed("MODE", "DEFAULT or DEBUG", parse_mode) {
            self.mode = v;
        }
        if let Some(v) = parser.get_bool("RERUN") {
            self.rerun = v;
        }
        if let Some(v) = parser.get_string("RERUN_OF") {
            self.rerun_of = Some(v);
        }
        if let Some(v) = parser.get_bool("REPORT_HOOKS") {
            self.report_hooks = v;
        }
        if let Some(v) = parser.get_bool("SKIPPED_ISSUE") {
            self.skipped_issue = Some(v);
        }
        if let Some(v) = parser.get_bool("DONT_LAUNCH_SERVER") {
            self.dont_launch_server = v;
        }
        if let Some(v) = parser.get_string("RELAY_HOST") {
            self.relay.host = v;
        }
        if let Some(v) = parser.get_u16_range("RELAY_PORT", 1, u16::MAX) {
            self.relay.port = v;
        }
        if let Some(v) = parser.get_bool("DEBUG") {
            self.debug = v;
        }
    }

    /// Check that everything needed to talk to the service is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("endpoint", &self.endpoint),
            ("project", &self.project),
            ("token", &self.token),
            ("launch", &self.launch),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }
        Ok(())
    }

    /// System attributes identifying the reporting agent.
    pub fn system_attributes(&self, agent_name: &str, agent_version: &str) -> Vec<Attribute> {
        let mut attributes = vec![Attribute::system(
            "agent",
            format!("{agent_name}|{agent_version}"),
        )];
        if self.skipped_issue == Some(false) {
            attributes.push(Attribute::system("skippedIssue", "false"));
        }
        attributes
    }

    /// Configured attributes followed by the system attributes.
    pub fn launch_attributes(&self, agent_name: &str, agent_version: &str) -> Vec<Attribute> {
        let mut attributes = self.attributes.clone();
        attributes.extend(self.system_attributes(agent_name, agent_version));
        attributes
    }

    /// Whether skipped items get the NOT_ISSUE marker.
    pub fn skips_without_issue(&self) -> bool {
        self.skipped_issue == Some(false)
    }
}

fn parse_mode(value: &str) -> Option<LaunchMode> {
    match value.to_ascii_uppercase().as_str() {
        "DEFAULT" => Some(LaunchMode::Default),
        "DEBUG" => Some(LaunchMode::Debug),
        _ => None,
    }
}

fn deserialize_attributes<'de, D>(deserializer: D) -> Result<Vec<Attribute>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AttributesSetting {
        Inline(String),
        List(Vec<Attribute>),
    }

    Ok(match AttributesSetting::deserialize(deserializer)? {
        AttributesSetting::Inline(raw) => parse_attributes(&raw),
        AttributesSetting::List(list) => list,
    })
}
