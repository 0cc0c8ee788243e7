//! Event reconciler for a single runner process.
//!
//! [`Reporter::handle`] takes runner events one at a time and turns them into
//! reporting-client calls. Handling is synchronous: client calls are
//! dispatched and never awaited, so a slow or broken backend cannot hold the
//! run back. Parents wait for their children inside the client, not here.

use crate::annotations::{Annotation, AnnotationBus, ReportingApi};
use crate::registry::{ItemRegistry, RecordKind, Registration};
use rprt_common::overlay::Annotations;
use rprt_common::util::{code_ref, now_millis};
use rprt_common::{
    Attachment, FinishItemRequest, FinishLaunchRequest, HookKind, HookNode, Issue, ItemId,
    ItemStatus, ItemType, LogLevel, LogRequest, ReporterConfig, ReportingClient, ReportingParent,
    Runnable, RunnerEvent, StartItemRequest, StartLaunchRequest, SuiteNode, TestError, TestNode,
    TestState, classify, is_internal,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const AGENT_NAME: &str = env!("CARGO_PKG_NAME");
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

type Clock = Box<dyn FnMut() -> i64 + Send>;

pub struct Reporter {
    client: Arc<dyn ReportingClient>,
    config: ReporterConfig,
    registry: ItemRegistry,
    bus: AnnotationBus,
    api: ReportingApi,
    base_dir: PathBuf,
    clock: Clock,
    launch_finished: bool,
}

impl Reporter {
    pub fn new(client: Arc<dyn ReportingClient>, config: ReporterConfig) -> Self {
        let (bus, api) = AnnotationBus::new();
        Self {
            client,
            config,
            registry: ItemRegistry::new(),
            bus,
            api,
            base_dir: std::env::current_dir().unwrap_or_default(),
            clock: Box::new(now_millis),
            launch_finished: false,
        }
    }

    /// Directory code references are made relative to.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Replace the wall clock, in epoch milliseconds.
    pub fn with_clock(mut self, clock: impl FnMut() -> i64 + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Handle test code uses to annotate the running item.
    pub fn api(&self) -> ReportingApi {
        self.api.clone()
    }

    pub fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    pub fn launch(&self) -> Option<&ItemId> {
        self.registry.launch()
    }

    /// Reconcile one runner event.
    pub fn handle(&mut self, event: RunnerEvent) {
        self.apply_annotations();
        debug!(event = event.name(), "Handling runner event");
        match event {
            RunnerEvent::RunBegin => self.on_run_begin(),
            RunnerEvent::RunEnd => self.on_run_end(),
            RunnerEvent::SuiteBegin { suite } => self.on_suite_begin(&suite),
            RunnerEvent::SuiteEnd { suite } => self.on_suite_end(&suite),
            RunnerEvent::TestBegin { test } => {
                self.start_test(&test);
            }
            RunnerEvent::TestEnd { test } => self.on_test_end(&test),
            RunnerEvent::TestFail { node, error } => self.on_test_fail(&node, &error),
            RunnerEvent::TestPending { test } => self.on_test_pending(&test),
            RunnerEvent::HookBegin { hook } => self.on_hook_begin(&hook),
            RunnerEvent::HookEnd { hook } => self.on_hook_end(&hook),
        }
    }

    fn now(&mut self) -> i64 {
        (self.clock)()
    }

    // ---- launch ----

    fn on_run_begin(&mut self) {
        if self.registry.launch().is_some() {
            warn!("Run began twice, keeping the existing launch");
            return;
        }
        let request = StartLaunchRequest {
            name: self.config.launch.clone(),
            start_time: self.now(),
            description: self.config.description.clone(),
            attributes: self.config.launch_attributes(AGENT_NAME, AGENT_VERSION),
            mode: Some(self.config.mode),
            rerun: self.config.rerun,
            rerun_of: self.config.rerun_of.clone(),
        };
        let dispatched = self.client.start_launch(request);
        info!(launch = %dispatched.id, "Started launch {:?}", self.config.launch);
        self.registry.set_launch(dispatched.id);
    }

    fn on_run_end(&mut self) {
        self.bus.close();
        self.apply_annotations();

        let Some(launch) = self.registry.launch().cloned() else {
            warn!("Run ended without a launch, nothing to finish");
            return;
        };
        if self.launch_finished {
            debug!("Launch {launch} already finished");
            return;
        }
        self.launch_finished = true;
        let request = FinishLaunchRequest {
            end_time: self.now(),
            status: self.registry.launch_status(),
        };
        self.client.finish_launch(&launch, request);
        info!(launch = %launch, "Finished launch");
    }

    // ---- suites ----

    fn on_suite_begin(&mut self, suite: &SuiteNode) {
        let Some(launch) = self.registry.launch().cloned() else {
            warn!("Suite {:?} began before the run, not reporting it", suite.title);
            return;
        };
        let start_time = self.now();
        let code_ref = suite
            .file
            .as_deref()
            .map(|file| code_ref(file, &suite.title_path, &self.base_dir));
        let client = &self.client;
        let registration = self
            .registry
            .register_suite_if_absent(suite, start_time, |parent| {
                let mut request = StartItemRequest::new(&suite.title, ItemType::Suite, start_time);
                request.code_ref = code_ref;
                client.start_item(request, &launch, parent).id
            });

        match registration {
            Registration::Created(item) => debug!(item = %item, "Started suite {:?}", suite.title),
            Registration::UnknownParent => warn!(
                "Parent of suite {:?} was never reported, skipping it",
                suite.title
            ),
            Registration::Existing(_) | Registration::Root => {}
        }
    }

    fn on_suite_end(&mut self, suite: &SuiteNode) {
        if suite.root {
            return;
        }
        let end_time = self.now();
        let Some(finish) = self.registry.finish_suite(&suite.id, end_time) else {
            debug!("Suite {:?} has no open item", suite.title);
            return;
        };
        let request = finish_request(end_time, finish.status, finish.annotations);
        self.client.finish_item(&finish.item, request);
    }

    // ---- tests ----

    /// Create the test's item. A second begin for an open attempt closes that
    /// attempt as a failed retry first.
    fn start_test(&mut self, test: &TestNode) -> Option<ItemId> {
        let Some(launch) = self.registry.launch().cloned() else {
            warn!("Test {:?} began before the run, not reporting it", test.title);
            return None;
        };

        let mut retry = test.retries > 0;
        if self.registry.open_test(&test.id).is_some() {
            let end_time = self.now();
            if let Some(finish) = self
                .registry
                .finish_test(&test.id, end_time, ItemStatus::Failed)
            {
                let mut request = finish_request(end_time, finish.status, finish.annotations);
                request.retry = Some(true);
                self.client.finish_item(&finish.record.item, request);
            }
            retry = true;
        }

        let parent = test
            .parent
            .as_ref()
            .and_then(|parent| self.registry.suite(parent))
            .map(|suite| suite.identity);
        let start_time = self.now();
        let code_ref = test
            .file
            .as_deref()
            .map(|file| code_ref(file, &test.title_path, &self.base_dir));
        let client = &self.client;
        let registration = self.registry.register_test_if_absent(
            &test.id,
            &test.title,
            parent,
            RecordKind::Test,
            start_time,
            retry,
            |parent_item| {
                let mut request = StartItemRequest::new(&test.title, ItemType::Step, start_time);
                request.retry = retry;
                request.code_ref = code_ref;
                client.start_item(request, &launch, parent_item).id
            },
        );
        registration.item().cloned()
    }

    fn on_test_end(&mut self, test: &TestNode) {
        let status = match test.state {
            Some(state) => state.status(),
            None if test.pending => ItemStatus::Skipped,
            None => ItemStatus::Passed,
        };
        self.finish_test(test, status);
    }

    fn on_test_pending(&mut self, test: &TestNode) {
        if self.registry.open_test(&test.id).is_none() {
            self.start_test(test);
        }
        self.finish_test(test, ItemStatus::Skipped);
    }

    fn finish_test(&mut self, test: &TestNode, status: ItemStatus) {
        let end_time = self.now();
        let Some(finish) = self.registry.finish_test(&test.id, end_time, status) else {
            debug!("Test {:?} has no open item", test.title);
            return;
        };
        let status = finish.status;
        let retry = test.retries > 0 || finish.record.retry;
        let mut request = finish_request(end_time, status, finish.annotations);
        request.retry = Some(retry);
        if let Some(err) = &test.err {
            let mut description = request.description.take().unwrap_or_default();
            description.push_str(&format!("\n```error\n{}\n```", err.log_text()));
            request.description = Some(description);
        }
        if status == ItemStatus::Skipped && self.config.skips_without_issue() {
            request.issue = Some(Issue::not_issue());
        }
        self.client.finish_item(&finish.record.item, request);
    }

    fn on_test_fail(&mut self, node: &Runnable, error: &TestError) {
        if let Some(current) = self.registry.current_test().map(|record| record.item.clone()) {
            self.send_error(&current, error);
        }

        let Runnable::Hook(hook) = node else {
            return;
        };
        if self.config.report_hooks {
            self.finish_hook(hook, ItemStatus::Failed, Some(error));
        }
        if let Some(current_test) = &hook.current_test {
            // A test that already ended keeps its own result.
            if self.registry.test(&current_test.id).is_none() {
                self.start_test(current_test);
            }
            self.finish_test(current_test, ItemStatus::Skipped);
        }
    }

    // ---- hooks ----

    fn on_hook_begin(&mut self, hook: &HookNode) {
        if !self.config.report_hooks || is_internal(&hook.title) {
            return;
        }
        let class = match classify(&hook.title) {
            Ok(class) => class,
            Err(err) => {
                debug!("{err}, not reporting it");
                return;
            }
        };
        let Some(launch) = self.registry.launch().cloned() else {
            warn!("Hook {:?} began before the run, not reporting it", hook.title);
            return;
        };

        let declaring = hook
            .parent
            .as_ref()
            .and_then(|parent| self.registry.suite(parent))
            .cloned();
        let parent = match class.parent {
            ReportingParent::Suite => declaring.as_ref().map(|suite| suite.identity),
            ReportingParent::GrandparentSuite => declaring.as_ref().and_then(|suite| suite.parent),
        };
        let now = self.now();
        let parent_start = parent
            .and_then(|parent| self.registry.suite_by_identity(parent))
            .map(|suite| suite.start_time);
        let anchor = match class.kind {
            HookKind::BeforeEach => self.registry.current_test().map(|test| test.start_time),
            HookKind::BeforeAll => declaring.as_ref().map(|suite| suite.start_time),
            HookKind::AfterEach | HookKind::AfterAll => None,
        };
        // Before hooks are backdated so they sort ahead of what they prepare.
        let start_time = match anchor {
            Some(anchor) => parent_start.map_or(anchor - 1, |p| (anchor - 1).max(p)),
            None => now,
        };

        let name = if class.name.is_empty() {
            hook.title.clone()
        } else {
            class.name
        };
        let client = &self.client;
        self.registry.register_test_if_absent(
            &hook.id,
            &name,
            parent,
            RecordKind::Hook(class.kind),
            start_time,
            false,
            |parent_item| {
                let request = StartItemRequest::new(&name, class.kind.item_type(), start_time);
                client.start_item(request, &launch, parent_item).id
            },
        );
    }

    fn on_hook_end(&mut self, hook: &HookNode) {
        if !self.config.report_hooks {
            return;
        }
        let status = match hook.state {
            Some(TestState::Failed) => ItemStatus::Failed,
            _ => ItemStatus::Passed,
        };
        self.finish_hook(hook, status, None);
    }

    fn finish_hook(&mut self, hook: &HookNode, status: ItemStatus, error: Option<&TestError>) {
        let Some(item) = self.registry.open_test(&hook.id).map(|record| record.item.clone()) else {
            return;
        };
        if let Some(error) = error {
            self.send_error(&item, error);
        }
        let end_time = self.now();
        if let Some(finish) = self.registry.finish_test(&hook.id, end_time, status) {
            let request = finish_request(end_time, finish.status, finish.annotations);
            self.client.finish_item(&item, request);
        }
    }

    // ---- logs and annotations ----

    fn send_error(&mut self, item: &ItemId, error: &TestError) {
        let time = self.now();
        self.client.send_log(
            item,
            LogRequest {
                level: LogLevel::Error,
                message: error.log_text().to_string(),
                time,
            },
            None,
        );
    }

    fn send_log(
        &mut self,
        target: Option<ItemId>,
        level: LogLevel,
        message: String,
        attachment: Option<Attachment>,
    ) {
        let Some(target) = target else {
            warn!("No launch to attach log {message:?} to, dropping it");
            return;
        };
        let time = self.now();
        self.client
            .send_log(&target, LogRequest { level, message, time }, attachment);
    }

    fn apply_annotations(&mut self) {
        for annotation in self.bus.drain() {
            self.apply_annotation(annotation);
        }
    }

    fn apply_annotation(&mut self, annotation: Annotation) {
        let name = annotation.name();
        let active = self.registry.current_active_item();
        match annotation {
            Annotation::Log {
                level,
                message,
                attachment,
                ..
            } => {
                let target = active.or_else(|| self.registry.launch().cloned());
                self.send_log(target, level, message, attachment);
            }
            Annotation::LaunchLog {
                level,
                message,
                attachment,
                ..
            } => {
                let target = self.registry.launch().cloned();
                self.send_log(target, level, message, attachment);
            }
            Annotation::SetLaunchStatus { status } => self.registry.set_launch_status(status),
            Annotation::AddAttributes { attributes } if attributes.is_empty() => {
                error!("Attributes annotation must carry at least one attribute");
            }
            annotation => {
                let Some(item) = active else {
                    warn!("No active item for {name} annotation, dropping it");
                    return;
                };
                let overlay = self.registry.overlay_mut();
                match annotation {
                    Annotation::AddAttributes { attributes } => {
                        overlay.add_attributes(&item, attributes)
                    }
                    Annotation::SetDescription { text } => overlay.set_description(&item, text),
                    Annotation::SetTestCaseId { test_case_id } => {
                        overlay.set_test_case_id(&item, test_case_id)
                    }
                    Annotation::SetStatus { status } => overlay.set_status(&item, status),
                    Annotation::Log { .. }
                    | Annotation::LaunchLog { .. }
                    | Annotation::SetLaunchStatus { .. } => {}
                }
            }
        }
    }
}

/// Finish payload carrying `status` and whatever was annotated on the item.
fn finish_request(
    end_time: i64,
    status: ItemStatus,
    annotations: Annotations,
) -> FinishItemRequest {
    FinishItemRequest {
        attributes: annotations.attributes(),
        description: annotations.description,
        test_case_id: annotations.test_case_id,
        ..FinishItemRequest::with_status(end_time, status)
    }
}
