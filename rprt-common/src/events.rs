//! Runner lifecycle events.
//!
//! The test runner drives the reporter with one event at a time. Each event
//! carries the node it refers to; nodes reference their parents by runner id
//! instead of by pointer.

use crate::errors::EventError;
use crate::types::{ItemStatus, RunnerId};
use serde::{Deserialize, Serialize};

/// Execution state the runner assigned to a test or hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Passed,
    Failed,
    Pending,
}

impl TestState {
    /// Remote status for this runner state.
    pub fn status(self) -> ItemStatus {
        match self {
            Self::Passed => ItemStatus::Passed,
            Self::Failed => ItemStatus::Failed,
            Self::Pending => ItemStatus::Skipped,
        }
    }
}

/// Error reported by the runner for a failed test or hook.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestError {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    /// Text sent as the error log: the stack when present, else the message.
    pub fn log_text(&self) -> &str {
        match &self.stack {
            Some(stack) if !stack.is_empty() => stack,
            _ => &self.message,
        }
    }
}

/// A suite (describe block) as seen by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SuiteNode {
    pub id: RunnerId,
    #[serde(default)]
    pub title: String,
    /// The implicit top-level scope. Never reported as an item.
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub parent: Option<RunnerId>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub title_path: Vec<String>,
    #[serde(default)]
    pub suites: Vec<SuiteNode>,
    #[serde(default)]
    pub tests: Vec<TestNode>,
    #[serde(default)]
    pub before_all: Vec<HookNode>,
}

/// A test (it block) as seen by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestNode {
    pub id: RunnerId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub parent: Option<RunnerId>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub title_path: Vec<String>,
    #[serde(default)]
    pub state: Option<TestState>,
    #[serde(default)]
    pub pending: bool,
    /// Retry attempt counter; greater than zero on a re-execution.
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub err: Option<TestError>,
}

/// A hook (before/after each/all) as seen by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HookNode {
    pub id: RunnerId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub parent: Option<RunnerId>,
    #[serde(default)]
    pub state: Option<TestState>,
    /// Test the runner context was executing when this hook ran.
    #[serde(default)]
    pub current_test: Option<TestNode>,
}

/// Payload of a failure event: either a test or a hook failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Runnable {
    Test(TestNode),
    Hook(HookNode),
}

impl Runnable {
    pub fn id(&self) -> &RunnerId {
        match self {
            Self::Test(test) => &test.id,
            Self::Hook(hook) => &hook.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Test(test) => &test.title,
            Self::Hook(hook) => &hook.title,
        }
    }
}

/// One runner lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunnerEvent {
    RunBegin,
    RunEnd,
    SuiteBegin { suite: SuiteNode },
    SuiteEnd { suite: SuiteNode },
    TestBegin { test: TestNode },
    TestEnd { test: TestNode },
    TestFail { node: Runnable, error: TestError },
    TestPending { test: TestNode },
    HookBegin { hook: HookNode },
    HookEnd { hook: HookNode },
}

impl RunnerEvent {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunBegin => "run_begin",
            Self::RunEnd => "run_end",
            Self::SuiteBegin { .. } => "suite_begin",
            Self::SuiteEnd { .. } => "suite_end",
            Self::TestBegin { .. } => "test_begin",
            Self::TestEnd { .. } => "test_end",
            Self::TestFail { .. } => "test_fail",
            Self::TestPending { .. } => "test_pending",
            Self::HookBegin { .. } => "hook_begin",
            Self::HookEnd { .. } => "hook_end",
        }
    }
}

/// Parse one JSON line of a runner event stream.
pub fn parse_event_line(line: &str) -> Result<RunnerEvent, EventError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(EventError::Empty);
    }
    serde_json::from_str(trimmed).map_err(|source| EventError::Malformed {
        line: truncate(trimmed, 120),
        source,
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push('…');
        out
    }
}
