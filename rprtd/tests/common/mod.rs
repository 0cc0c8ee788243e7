//! Shared helpers for rprtd integration tests.

#![allow(dead_code)]

use rprt_common::{
    HookNode, MockClient, PollPolicy, ReporterConfig, RunnerEvent, RunnerId, SuiteNode, TestNode,
    TestState, WaitConfig,
};
use rprtd::ParallelAgent;
use std::sync::{Arc, Once};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_line_number(true),
            )
            .with(filter)
            .init();
    });
}

/// Short polls so timeouts cost milliseconds.
pub fn fast_waits() -> WaitConfig {
    let policy = PollPolicy::from_millis(5, 300);
    WaitConfig {
        children: policy,
        launch_children: policy,
        suite_children: policy,
        find_item: policy,
        item_info: policy,
    }
}

pub fn config() -> ReporterConfig {
    ReporterConfig {
        endpoint: "http://reporting.test".into(),
        project: "demo".into(),
        token: "secret".into(),
        launch: "ci".into(),
        wait: fast_waits(),
        ..ReporterConfig::default()
    }
}

pub fn agent(config: ReporterConfig) -> (ParallelAgent, Arc<MockClient>) {
    agent_with(Arc::new(MockClient::new()), config)
}

pub fn agent_with(
    client: Arc<MockClient>,
    config: ReporterConfig,
) -> (ParallelAgent, Arc<MockClient>) {
    init_test_logging();
    (ParallelAgent::new(client.clone(), config), client)
}

/// The container suite a worker reports around one file's top suite.
pub fn wrapper(worker: &str, suite: SuiteNode) -> SuiteNode {
    SuiteNode {
        id: RunnerId::new(format!("{worker}-wrapper")),
        root: true,
        suites: vec![suite],
        ..SuiteNode::default()
    }
}

pub fn suite(id: &str, title: &str) -> SuiteNode {
    SuiteNode {
        id: RunnerId::new(id),
        title: title.to_string(),
        parent: Some(RunnerId::new("root")),
        title_path: vec![title.to_string()],
        ..SuiteNode::default()
    }
}

pub fn test(id: &str, title: &str, parent: &str) -> TestNode {
    TestNode {
        id: RunnerId::new(id),
        title: title.to_string(),
        parent: Some(RunnerId::new(parent)),
        ..TestNode::default()
    }
}

pub fn with_state(mut test: TestNode, state: TestState) -> TestNode {
    test.state = Some(state);
    test
}

pub fn hook(id: &str, title: &str, parent: &str) -> HookNode {
    HookNode {
        id: RunnerId::new(id),
        title: title.to_string(),
        parent: Some(RunnerId::new(parent)),
        ..HookNode::default()
    }
}

/// One worker's complete run of a single suite with one passing test.
pub fn worker_run(worker: &str, suite_title: &str, test_title: &str) -> Vec<RunnerEvent> {
    let suite_id = format!("{worker}-suite");
    let test_id = format!("{worker}-test");
    let wrapped = wrapper(worker, suite(&suite_id, suite_title));
    let t = test(&test_id, test_title, &suite_id);
    vec![
        RunnerEvent::RunBegin,
        RunnerEvent::SuiteBegin {
            suite: wrapped.clone(),
        },
        RunnerEvent::TestBegin { test: t.clone() },
        RunnerEvent::TestEnd {
            test: with_state(t, TestState::Passed),
        },
        RunnerEvent::SuiteEnd { suite: wrapped },
        RunnerEvent::RunEnd,
    ]
}
