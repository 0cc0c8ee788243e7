//! End-to-end reporting scenarios for the sequential reporter.
//!
//! Each test feeds runner events into a [`Reporter`] backed by the mock
//! client and checks the resulting call sequence.

mod common;

use common::{
    config, error, hook, hook_begin, hook_end, init_test_logging, reporter, reporter_with, root,
    run, suite, suite_begin, suite_end, test, test_begin, test_end, test_pending, with_state,
};
use proptest::prelude::*;
use rprt_common::client::CallKind;
use rprt_common::{
    Attribute, Issue, ItemStatus, ItemType, MockClient, ReporterConfig, Runnable, RunnerEvent,
    TestState,
};
use std::sync::Arc;

fn hooks_enabled() -> ReporterConfig {
    ReporterConfig {
        report_hooks: true,
        ..config()
    }
}

// ============================================================================
// Basic scenarios
// ============================================================================

#[test]
fn test_passing_and_failing_test_in_one_suite() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    let pass = test("t1", "pass", "s1");
    let fail = test("t2", "fail", "s1");

    run(
        &mut reporter,
        vec![
            suite_begin(suite("s1", "Suite", "root")),
            test_begin(pass.clone()),
            test_end(with_state(pass, TestState::Passed)),
            test_begin(fail.clone()),
            RunnerEvent::TestFail {
                node: Runnable::Test(fail.clone()),
                error: error("expected 1 to equal 2"),
            },
            test_end(with_state(fail, TestState::Failed)),
            suite_end(suite("s1", "Suite", "root")),
        ],
    );

    assert_eq!(
        client.timeline(),
        [
            "start_launch ci",
            "start SUITE Suite",
            "start STEP pass",
            "finish pass passed",
            "start STEP fail",
            "log fail ERROR",
            "finish fail failed",
            "finish Suite failed",
            "finish_launch -",
        ]
    );
}

#[test]
fn test_root_suite_is_not_reported() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    run(&mut reporter, vec![]);
    assert_eq!(client.timeline(), ["start_launch ci", "finish_launch -"]);
}

#[test]
fn test_top_level_suite_has_no_parent_and_a_code_ref() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    run(
        &mut reporter,
        vec![
            suite_begin(suite("s1", "Suite", "root")),
            suite_end(suite("s1", "Suite", "root")),
        ],
    );

    let (request, parent) = client.start_named("Suite").unwrap();
    assert_eq!(parent, None);
    assert_eq!(request.item_type, ItemType::Suite);
    assert_eq!(request.code_ref.as_deref(), Some("spec/cart.spec.js/Suite"));
    assert_eq!(client.finishes_named("Suite")[0].status, Some(ItemStatus::Passed));
}

#[test]
fn test_nested_suite_is_created_under_its_parent() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    run(
        &mut reporter,
        vec![
            suite_begin(suite("outer", "Outer", "root")),
            suite_begin(suite("inner", "Inner", "outer")),
            suite_end(suite("inner", "Inner", "outer")),
            suite_end(suite("outer", "Outer", "root")),
        ],
    );

    let outer = client.ids_named("Outer")[0].clone();
    assert_eq!(client.start_named("Inner").unwrap().1, Some(outer));
}

#[test]
fn test_failed_test_description_carries_error_block() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    let mut failing = with_state(test("t1", "boom", "s1"), TestState::Failed);
    failing.err = Some(error("kaput"));

    run(
        &mut reporter,
        vec![
            suite_begin(suite("s1", "Suite", "root")),
            test_begin(test("t1", "boom", "s1")),
            test_end(failing),
            suite_end(suite("s1", "Suite", "root")),
        ],
    );

    let description = client.finishes_named("boom")[0].description.clone().unwrap();
    assert!(description.starts_with("\n```error\nAssertionError: kaput"), "{description}");
    assert!(description.ends_with("\n```"), "{description}");
}

// ============================================================================
// Retries
// ============================================================================

#[test]
fn test_second_begin_closes_open_attempt_as_failed_retry() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    let first = test("t1", "flaky", "s1");
    let mut second = first.clone();
    second.retries = 1;

    run(
        &mut reporter,
        vec![
            suite_begin(suite("s1", "S", "root")),
            test_begin(first.clone()),
            RunnerEvent::TestFail {
                node: Runnable::Test(first),
                error: error("timeout"),
            },
            test_begin(second.clone()),
            test_end(with_state(second, TestState::Passed)),
            suite_end(suite("s1", "S", "root")),
        ],
    );

    assert_eq!(
        client.timeline(),
        [
            "start_launch ci",
            "start SUITE S",
            "start STEP flaky",
            "log flaky ERROR",
            "finish flaky failed retry",
            "start STEP flaky retry",
            "finish flaky passed retry",
            "finish S passed",
            "finish_launch -",
        ]
    );
}

// ============================================================================
// Pending tests and skipped issues
// ============================================================================

#[test]
fn test_pending_test_without_begin_is_started_then_skipped() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    let mut pending = test("t1", "later", "s1");
    pending.pending = true;

    run(
        &mut reporter,
        vec![
            suite_begin(suite("s1", "S", "root")),
            test_pending(pending.clone()),
            test_end(pending),
            suite_end(suite("s1", "S", "root")),
        ],
    );

    assert_eq!(client.count(CallKind::StartItem), 2);
    let finishes = client.finishes_named("later");
    assert_eq!(finishes.len(), 1);
    assert_eq!(finishes[0].status, Some(ItemStatus::Skipped));
    assert_eq!(finishes[0].issue, None);
}

#[test]
fn test_skipped_without_issue_marks_not_issue() {
    init_test_logging();
    let config = ReporterConfig {
        skipped_issue: Some(false),
        ..config()
    };
    let (mut reporter, client) = reporter(config);

    run(
        &mut reporter,
        vec![
            suite_begin(suite("s1", "S", "root")),
            test_pending(test("t1", "later", "s1")),
            test_begin(test("t2", "now", "s1")),
            test_end(with_state(test("t2", "now", "s1"), TestState::Passed)),
            suite_end(suite("s1", "S", "root")),
        ],
    );

    assert_eq!(client.finishes_named("later")[0].issue, Some(Issue::not_issue()));
    assert_eq!(client.finishes_named("now")[0].issue, None);
}

#[test]
fn test_skipped_issue_true_leaves_skips_alone() {
    init_test_logging();
    let config = ReporterConfig {
        skipped_issue: Some(true),
        ..config()
    };
    let (mut reporter, client) = reporter(config);
    run(
        &mut reporter,
        vec![test_pending(test("t1", "later", "root"))],
    );
    assert_eq!(client.finishes_named("later")[0].issue, None);
}

// ============================================================================
// Hooks
// ============================================================================

#[test]
fn test_failed_hook_cascades_skip_to_current_test() {
    init_test_logging();
    let (mut reporter, client) = reporter(hooks_enabled());
    let guarded = test("t1", "checkout", "s1");
    let mut setup = hook("h1", "\"before each\" hook: login", "s1");
    setup.current_test = Some(guarded.clone());

    run(
        &mut reporter,
        vec![
            suite_begin(suite("s1", "S", "root")),
            test_begin(guarded),
            hook_begin(setup.clone()),
            RunnerEvent::TestFail {
                node: Runnable::Hook(setup),
                error: error("login failed"),
            },
            suite_end(suite("s1", "S", "root")),
        ],
    );

    assert_eq!(
        client.timeline(),
        [
            "start_launch ci",
            "start SUITE S",
            "start STEP checkout",
            "start BEFORE_METHOD login",
            "log checkout ERROR",
            "log login ERROR",
            "finish login failed",
            "finish checkout skipped",
            "finish S failed",
            "finish_launch -",
        ]
    );

    let test_start = client.start_named("checkout").unwrap().0.start_time;
    assert_eq!(client.start_named("login").unwrap().0.start_time, test_start - 1);
}

#[test]
fn test_cascade_skip_without_hook_reporting() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    let guarded = test("t1", "checkout", "s1");
    let mut setup = hook("h1", "\"before all\" hook: seed", "s1");
    setup.current_test = Some(guarded);

    run(
        &mut reporter,
        vec![
            suite_begin(suite("s1", "S", "root")),
            hook_begin(setup.clone()),
            RunnerEvent::TestFail {
                node: Runnable::Hook(setup),
                error: error("seed failed"),
            },
            suite_end(suite("s1", "S", "root")),
        ],
    );

    assert_eq!(
        client.timeline(),
        [
            "start_launch ci",
            "start SUITE S",
            "start STEP checkout",
            "finish checkout skipped",
            "finish S passed",
            "finish_launch -",
        ]
    );
}

#[test]
fn test_failed_after_each_hook_leaves_finished_test_alone() {
    init_test_logging();
    let (mut reporter, client) = reporter(hooks_enabled());
    let checkout = test("t1", "checkout", "s1");
    let mut teardown = hook("h1", "\"after each\" hook: logout", "s1");
    teardown.current_test = Some(checkout.clone());

    run(
        &mut reporter,
        vec![
            suite_begin(suite("s1", "S", "root")),
            test_begin(checkout.clone()),
            test_end(with_state(checkout, TestState::Passed)),
            hook_begin(teardown.clone()),
            RunnerEvent::TestFail {
                node: Runnable::Hook(teardown),
                error: error("logout failed"),
            },
            suite_end(suite("s1", "S", "root")),
        ],
    );

    assert_eq!(client.ids_named("checkout").len(), 1);
    let finishes = client.finishes_named("checkout");
    assert_eq!(finishes.len(), 1);
    assert_eq!(finishes[0].status, Some(ItemStatus::Passed));
    assert_eq!(client.finishes_named("logout")[0].status, Some(ItemStatus::Failed));
    assert!(!client.timeline().contains(&"finish checkout skipped".to_string()));
}

#[test]
fn test_before_all_hook_reports_under_grandparent() {
    init_test_logging();
    let (mut reporter, client) = reporter(hooks_enabled());
    let setup = hook("h1", "\"before all\" hook: setup", "s");

    run(
        &mut reporter,
        vec![
            suite_begin(suite("r", "R", "root")),
            suite_begin(suite("s", "S", "r")),
            hook_begin(setup.clone()),
            hook_end(setup),
            suite_end(suite("s", "S", "r")),
            suite_end(suite("r", "R", "root")),
        ],
    );

    let r_item = client.ids_named("R")[0].clone();
    let s_start = client.start_named("S").unwrap().0.start_time;
    let (request, parent) = client.start_named("setup").unwrap();
    assert_eq!(parent, Some(r_item));
    assert_eq!(request.item_type, ItemType::BeforeSuite);
    assert_eq!(request.start_time, s_start - 1);
    assert_eq!(client.finishes_named("setup")[0].status, Some(ItemStatus::Passed));
}

#[test]
fn test_each_hook_reports_under_declaring_suite() {
    init_test_logging();
    let (mut reporter, client) = reporter(hooks_enabled());
    let cleanup = hook("h1", "\"after each\" hook: cleanup", "s");

    run(
        &mut reporter,
        vec![
            suite_begin(suite("r", "R", "root")),
            suite_begin(suite("s", "S", "r")),
            hook_begin(cleanup.clone()),
            hook_end(cleanup),
            suite_end(suite("s", "S", "r")),
            suite_end(suite("r", "R", "root")),
        ],
    );

    let s_item = client.ids_named("S")[0].clone();
    let (request, parent) = client.start_named("cleanup").unwrap();
    assert_eq!(parent, Some(s_item));
    assert_eq!(request.item_type, ItemType::AfterMethod);
}

#[test]
fn test_hooks_are_filtered() {
    init_test_logging();
    let (mut reporter, client) = reporter(hooks_enabled());
    let generated = hook("h1", "\"before all\" hook: generated_wrapper", "s");
    let rooted = hook("h2", "\"before each\" hook in \"{root}\"", "s");
    let unknown = hook("h3", "\"around\" hook: nope", "s");

    run(
        &mut reporter,
        vec![
            suite_begin(suite("s", "S", "root")),
            hook_begin(generated.clone()),
            hook_end(generated),
            hook_begin(rooted.clone()),
            hook_end(rooted),
            hook_begin(unknown.clone()),
            hook_end(unknown),
            suite_end(suite("s", "S", "root")),
        ],
    );

    assert_eq!(client.count(CallKind::StartItem), 1);
}

#[test]
fn test_hooks_ignored_when_disabled() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    let setup = hook("h1", "\"before each\" hook: login", "s");
    run(
        &mut reporter,
        vec![
            suite_begin(suite("s", "S", "root")),
            hook_begin(setup.clone()),
            hook_end(setup),
            suite_end(suite("s", "S", "root")),
        ],
    );
    assert!(client.start_named("login").is_none());
}

// ============================================================================
// Annotations
// ============================================================================

#[test]
fn test_annotations_land_on_active_test_and_are_cleared() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    let api = reporter.api();

    reporter.handle(RunnerEvent::RunBegin);
    reporter.handle(suite_begin(root()));
    reporter.handle(suite_begin(suite("s", "S", "root")));
    reporter.handle(test_begin(test("a", "first", "s")));
    api.add_attributes(vec![Attribute::new("browser", "firefox")]);
    api.set_description("checks the cart");
    api.set_test_case_id("cart-001");
    reporter.handle(test_end(with_state(test("a", "first", "s"), TestState::Passed)));
    reporter.handle(test_begin(test("b", "second", "s")));
    reporter.handle(test_end(with_state(test("b", "second", "s"), TestState::Passed)));
    reporter.handle(suite_end(suite("s", "S", "root")));
    reporter.handle(RunnerEvent::RunEnd);

    let first = &client.finishes_named("first")[0];
    assert_eq!(first.attributes, Some(vec![Attribute::new("browser", "firefox")]));
    assert_eq!(first.description.as_deref(), Some("checks the cart"));
    assert_eq!(first.test_case_id.as_deref(), Some("cart-001"));

    let second = &client.finishes_named("second")[0];
    assert_eq!(second.attributes, None);
    assert_eq!(second.description, None);
    assert_eq!(second.test_case_id, None);

    let suite_finish = &client.finishes_named("S")[0];
    assert_eq!(suite_finish.attributes, None);
}

#[test]
fn test_status_override_and_suite_annotations() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    let api = reporter.api();

    reporter.handle(RunnerEvent::RunBegin);
    reporter.handle(suite_begin(suite("s", "S", "root")));
    api.set_description("suite level");
    reporter.handle(test_begin(test("a", "first", "s")));
    api.set_status_failed();
    reporter.handle(test_end(with_state(test("a", "first", "s"), TestState::Passed)));
    reporter.handle(suite_end(suite("s", "S", "root")));
    reporter.handle(RunnerEvent::RunEnd);

    assert_eq!(client.finishes_named("first")[0].status, Some(ItemStatus::Failed));
    let suite_finish = &client.finishes_named("S")[0];
    assert_eq!(suite_finish.status, Some(ItemStatus::Failed));
    assert_eq!(suite_finish.description.as_deref(), Some("suite level"));
}

#[test]
fn test_logs_and_launch_status_annotations() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    let api = reporter.api();

    reporter.handle(RunnerEvent::RunBegin);
    api.info("before any suite");
    reporter.handle(suite_begin(suite("s", "S", "root")));
    api.warn("inside the suite");
    api.launch_error("launch wide");
    api.set_launch_status_stopped();
    reporter.handle(suite_end(suite("s", "S", "root")));
    reporter.handle(RunnerEvent::RunEnd);

    assert_eq!(
        client.timeline(),
        [
            "start_launch ci",
            "log launch INFO",
            "start SUITE S",
            "log S WARN",
            "log launch ERROR",
            "finish S passed",
            "finish_launch stopped",
        ]
    );
    assert!(!api.info("after the run"));
}

#[test]
fn test_empty_attributes_are_rejected() {
    init_test_logging();
    let (mut reporter, client) = reporter(config());
    let api = reporter.api();

    reporter.handle(RunnerEvent::RunBegin);
    reporter.handle(suite_begin(suite("s", "S", "root")));
    api.add_attributes(vec![]);
    reporter.handle(suite_end(suite("s", "S", "root")));

    assert_eq!(client.finishes_named("S")[0].attributes, None);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn test_backend_failures_do_not_stop_reporting() {
    init_test_logging();
    let client = Arc::new(
        MockClient::new()
            .failing(CallKind::StartItem)
            .failing(CallKind::FinishItem)
            .failing(CallKind::SendLog),
    );
    let mut reporter = reporter_with(client.clone(), config());
    let fail = test("t1", "fail", "s");

    run(
        &mut reporter,
        vec![
            suite_begin(suite("s", "S", "root")),
            test_begin(fail.clone()),
            RunnerEvent::TestFail {
                node: Runnable::Test(fail.clone()),
                error: error("nope"),
            },
            test_end(with_state(fail, TestState::Failed)),
            suite_end(suite("s", "S", "root")),
        ],
    );

    assert_eq!(client.timeline().len(), 7);
    assert_eq!(client.count(CallKind::FinishLaunch), 1);
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum SuiteOp {
    Begin(usize),
    End(usize),
}

/// (id, title, parent) of the suites the generated sequences play with.
const SUITES: [(&str, &str, &str); 4] = [
    ("root", "", "none"),
    ("a", "A", "root"),
    ("b", "B", "a"),
    ("c", "C", "root"),
];

fn suite_op() -> impl Strategy<Value = SuiteOp> {
    prop_oneof![
        (0..SUITES.len()).prop_map(SuiteOp::Begin),
        (0..SUITES.len()).prop_map(SuiteOp::End),
    ]
}

fn node(index: usize) -> rprt_common::SuiteNode {
    if index == 0 {
        return root();
    }
    let (id, title, parent) = SUITES[index];
    suite(id, title, parent)
}

proptest! {
    #[test]
    fn prop_root_never_created_and_suites_created_once(
        ops in prop::collection::vec(suite_op(), 0..40)
    ) {
        let (mut reporter, client) = reporter(config());
        reporter.handle(RunnerEvent::RunBegin);
        for op in ops {
            let event = match op {
                SuiteOp::Begin(index) => suite_begin(node(index)),
                SuiteOp::End(index) => suite_end(node(index)),
            };
            reporter.handle(event);
        }
        reporter.handle(RunnerEvent::RunEnd);

        prop_assert!(client.start_named("").is_none());
        for (_, title, _) in &SUITES[1..] {
            prop_assert!(client.ids_named(title).len() <= 1);
            prop_assert!(client.finishes_named(title).len() <= 1);
        }
    }
}
