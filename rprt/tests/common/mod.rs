use rprt::Reporter;
use rprt_common::{
    HookNode, MockClient, ReporterConfig, RunnerEvent, RunnerId, SuiteNode, TestError, TestNode,
    TestState,
};
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

pub fn config() -> ReporterConfig {
    ReporterConfig {
        endpoint: "http://reporting.test".into(),
        project: "demo".into(),
        token: "secret".into(),
        launch: "ci".into(),
        ..ReporterConfig::default()
    }
}

/// Reporter over a fresh mock client.
pub fn reporter(config: ReporterConfig) -> (Reporter, Arc<MockClient>) {
    let client = Arc::new(MockClient::new());
    (reporter_with(client.clone(), config), client)
}

/// Reporter over `client`, with a clock ticking 10ms per read.
pub fn reporter_with(client: Arc<MockClient>, config: ReporterConfig) -> Reporter {
    let mut tick = 1_000;
    Reporter::new(client, config)
        .with_base_dir("/work")
        .with_clock(move || {
            tick += 10;
            tick
        })
}

pub fn root() -> SuiteNode {
    SuiteNode {
        id: RunnerId::new("root"),
        root: true,
        ..SuiteNode::default()
    }
}

pub fn suite(id: &str, title: &str, parent: &str) -> SuiteNode {
    SuiteNode {
        id: RunnerId::new(id),
        title: title.to_string(),
        parent: Some(RunnerId::new(parent)),
        file: Some("/work/spec/cart.spec.js".into()),
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

pub fn error(message: &str) -> TestError {
    TestError {
        message: message.to_string(),
        stack: Some(format!("AssertionError: {message}\n    at spec.js:1:1")),
    }
}

pub fn suite_begin(suite: SuiteNode) -> RunnerEvent {
    RunnerEvent::SuiteBegin { suite }
}

pub fn suite_end(suite: SuiteNode) -> RunnerEvent {
    RunnerEvent::SuiteEnd { suite }
}

pub fn test_begin(test: TestNode) -> RunnerEvent {
    RunnerEvent::TestBegin { test }
}

pub fn test_end(test: TestNode) -> RunnerEvent {
    RunnerEvent::TestEnd { test }
}

pub fn test_pending(test: TestNode) -> RunnerEvent {
    RunnerEvent::TestPending { test }
}

pub fn hook_begin(hook: HookNode) -> RunnerEvent {
    RunnerEvent::HookBegin { hook }
}

pub fn hook_end(hook: HookNode) -> RunnerEvent {
    RunnerEvent::HookEnd { hook }
}

/// Run-begin, root suite begin, then `events`, then root end and run-end.
pub fn run(reporter: &mut Reporter, events: Vec<RunnerEvent>) {
    reporter.handle(RunnerEvent::RunBegin);
    reporter.handle(suite_begin(root()));
    for event in events {
        reporter.handle(event);
    }
    reporter.handle(suite_end(root()));
    reporter.handle(RunnerEvent::RunEnd);
}
