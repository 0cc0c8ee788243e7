//! Parallel agent: one logical launch for many runner processes.
//!
//! Every worker process feeds its runner events here. The synchronous part
//! of each event (registry updates, create and finish dispatch) runs inline
//! in arrival order; anything that has to wait for another worker or for
//! the backend runs in a task of its own, so a slow wait never holds up the
//! events behind it.

use crate::launch::{InfoKind, LaunchData, SuiteInfo, TestInfo};
use rprt_common::protocol::RelayRequest;
use rprt_common::util::{code_ref, load_attachment, now_millis};
use rprt_common::{
    ChildFinishSignal, FinishItemRequest, FinishLaunchRequest, HookNode, Issue, ItemId,
    ItemStatus, ItemType, LogLevel, LogRequest, ReporterConfig, ReportingClient, Runnable,
    RunnerEvent, RunnerId, StartItemRequest, StartLaunchRequest, SuiteNode, TestError, TestNode,
    classify, is_internal,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const AGENT_NAME: &str = env!("CARGO_PKG_NAME");
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

struct AgentInner {
    client: Arc<dyn ReportingClient>,
    config: ReporterConfig,
    launch: LaunchData,
    base_dir: PathBuf,
    tasks: Mutex<JoinSet<()>>,
    launch_finished: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ParallelAgent {
    inner: Arc<AgentInner>,
}

impl ParallelAgent {
    pub fn new(client: Arc<dyn ReportingClient>, config: ReporterConfig) -> Self {
        let launch = LaunchData::new(client.clone(), config.wait, config.report_hooks);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(AgentInner {
                client,
                config,
                launch,
                base_dir: std::env::current_dir().unwrap_or_default(),
                tasks: Mutex::new(JoinSet::new()),
                launch_finished: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    pub fn launch_data(&self) -> &LaunchData {
        &self.inner.launch
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.inner.config
    }

    /// Flips to `true` once the shared launch has been finished.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Wait for every spawned wait task, including ones spawned meanwhile.
    pub async fn flush(&self) {
        loop {
            let mut tasks = {
                let mut guard = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *guard)
            };
            if tasks.is_empty() {
                return;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(err) = result {
                    warn!("Agent task failed: {err}");
                }
            }
        }
    }

    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(task);
    }

    /// Reconcile one runner event from any worker.
    pub fn handle(&self, event: RunnerEvent) {
        debug!(event = event.name(), "Handling parallel runner event");
        match event {
            RunnerEvent::RunBegin => self.on_launch_start(),
            RunnerEvent::RunEnd => self.on_launch_finish(),
            RunnerEvent::SuiteBegin { suite } => self.on_suite_start(&suite),
            RunnerEvent::SuiteEnd { suite } => self.on_suite_finish(&suite),
            RunnerEvent::TestBegin { test } => self.start_test(&test),
            RunnerEvent::TestEnd { test } => {
                let status = match test.state {
                    Some(state) => state.status(),
                    None if test.pending => ItemStatus::Skipped,
                    None => ItemStatus::Passed,
                };
                self.finish_test(&test, status);
            }
            RunnerEvent::TestFail { node, error } => self.on_test_fail(node, error),
            RunnerEvent::TestPending { test } => {
                if self.inner.launch.passed_test_creation_filter(&test.id) {
                    self.start_test(&test);
                }
                self.finish_test(&test, ItemStatus::Skipped);
            }
            RunnerEvent::HookBegin { hook } => self.on_hook_start(&hook),
            RunnerEvent::HookEnd { hook } => {
                if self.inner.config.report_hooks {
                    self.finish_hook(&hook.id, ItemStatus::Passed);
                }
            }
        }
    }

    /// Resolve a relay log's target and send it, in the background.
    pub fn dispatch_log(&self, request: RelayRequest) {
        let agent = self.clone();
        self.spawn(async move { agent.relay_log(request).await });
    }

    // ---- launch ----

    fn on_launch_start(&self) {
        let inner = &self.inner;
        let runners = inner.launch.bump_launch_counter(|| {
            let config = &inner.config;
            let dispatched = inner.client.start_launch(StartLaunchRequest {
                name: config.launch.clone(),
                start_time: now_millis(),
                description: config.description.clone(),
                attributes: config.launch_attributes(AGENT_NAME, AGENT_VERSION),
                mode: Some(config.mode),
                rerun: config.rerun,
                rerun_of: config.rerun_of.clone(),
            });
            info!(launch = %dispatched.id, "Started launch {:?}", config.launch);
            dispatched.id
        });
        debug!(runners, "Runner joined the launch");
    }

    fn on_launch_finish(&self) {
        let remaining = self.inner.launch.decrease_launch_counter();
        if remaining > 0 {
            debug!(remaining, "Runner left the launch");
            return;
        }
        if self.inner.launch_finished.swap(true, Ordering::SeqCst) {
            debug!("Launch already finishing");
            return;
        }
        let agent = self.clone();
        self.spawn(async move { agent.finish_launch().await });
    }

    async fn finish_launch(&self) {
        let inner = &self.inner;
        let Some(launch) = inner.launch.launch() else {
            warn!("Last runner finished without a launch");
            inner.shutdown.send_replace(true);
            return;
        };
        inner
            .launch
            .wait_till_all_children_finished(
                &launch,
                ChildFinishSignal::Dispatched,
                inner.config.wait.launch_children,
            )
            .await;

        let request = FinishLaunchRequest {
            end_time: now_millis(),
            status: Some(inner.launch.launch_status()),
        };
        if inner.client.finish_launch(&launch, request).wait().await {
            info!(launch = %launch, "Finished launch");
        }
        inner.launch.print_launch_data();
        inner.shutdown.send_replace(true);
    }

    // ---- suites ----

    fn on_suite_start(&self, suite: &SuiteNode) {
        let Some(converted) = LaunchData::convert_parallel_run_suite(suite) else {
            debug!("Suite {:?} wraps no suite, ignoring it", suite.title);
            return;
        };
        let Some(launch) = self.inner.launch.launch() else {
            warn!("Suite {:?} began before the launch, not reporting it", converted.title);
            return;
        };
        let start_time = now_millis();
        let code_ref = converted
            .file
            .as_deref()
            .map(|file| code_ref(file, &converted.title_path, &self.inner.base_dir));
        let client = &self.inner.client;
        let created = self.inner.launch.create_suite_if_absent(&converted, |parent| {
            let mut request = StartItemRequest::new(&converted.title, ItemType::Suite, start_time);
            request.code_ref = code_ref;
            SuiteInfo {
                name: converted.title.clone(),
                item: client.start_item(request, &launch, parent).id,
                start_time,
                end_time: None,
                members: SuiteInfo::members_of(&converted),
            }
        });
        if let Some(item) = created {
            debug!(item = %item, "Started suite {:?}", converted.title);
        }
    }

    fn on_suite_finish(&self, suite: &SuiteNode) {
        let Some(converted) = LaunchData::convert_parallel_run_suite(suite) else {
            return;
        };
        let end_time = now_millis();
        let mut claimed: Option<ItemId> = None;
        self.inner.launch.update_suite_info(&converted.id, |info| {
            if info.end_time.is_none() {
                info.end_time = Some(end_time);
                claimed = Some(info.item.clone());
            }
        });
        let Some(item) = claimed else {
            debug!("Suite {:?} has no open item", converted.title);
            return;
        };

        let agent = self.clone();
        self.spawn(async move {
            let inner = &agent.inner;
            inner
                .launch
                .wait_till_all_children_finished(
                    &item,
                    ChildFinishSignal::Completed,
                    inner.config.wait.suite_children,
                )
                .await;
            let status = inner.launch.suite_status(&item);
            inner
                .client
                .finish_item(&item, FinishItemRequest::with_status(now_millis(), status));
        });
    }

    // ---- tests ----

    fn start_test(&self, test: &TestNode) {
        let Some(launch) = self.inner.launch.launch() else {
            warn!("Test {:?} began before the launch, not reporting it", test.title);
            return;
        };
        let start_time = now_millis();
        let code_ref = test
            .file
            .as_deref()
            .map(|file| code_ref(file, &test.title_path, &self.inner.base_dir));
        let client = &self.inner.client;
        self.inner
            .launch
            .create_test_if_absent(&test.id, test.parent.as_ref(), |parent| {
                let mut request = StartItemRequest::new(&test.title, ItemType::Step, start_time);
                request.code_ref = code_ref;
                TestInfo {
                    name: test.title.clone(),
                    item: client.start_item(request, &launch, parent).id,
                    start_time,
                    end_time: None,
                    status: None,
                    kind: InfoKind::Test,
                    hook_title: None,
                }
            });
    }

    fn finish_test(&self, test: &TestNode, status: ItemStatus) {
        let end_time = now_millis();
        let Some(info) = self.inner.launch.claim_finish(&test.id, end_time, status) else {
            debug!("Test {:?} has no open item", test.title);
            return;
        };
        let mut request = FinishItemRequest::with_status(end_time, status);
        request.retry = Some(test.retries > 0);
        if status == ItemStatus::Skipped && self.inner.config.skips_without_issue() {
            request.issue = Some(Issue::not_issue());
        }
        self.inner.client.finish_item(&info.item, request);
    }

    fn on_test_fail(&self, node: Runnable, error: TestError) {
        self.inner.launch.set_launch_status(ItemStatus::Failed);

        if let Runnable::Hook(hook) = &node {
            if let Some(current) = &hook.current_test {
                if self.inner.launch.passed_test_creation_filter(&current.id) {
                    self.start_test(current);
                }
                self.finish_test(current, ItemStatus::Skipped);
            }
            if !self.inner.config.report_hooks
                || hook.parent.is_none()
                || is_internal(&hook.title)
            {
                return;
            }
        }

        if let Some(info) = self.inner.launch.test_info(node.id()) {
            self.report_failure(&node, &error, &info);
            return;
        }
        let agent = self.clone();
        self.spawn(async move {
            if let Some(info) = agent.inner.launch.wait_test_info(node.id()).await {
                agent.report_failure(&node, &error, &info);
            }
        });
    }

    fn report_failure(&self, node: &Runnable, error: &TestError, info: &TestInfo) {
        self.inner.client.send_log(
            &info.item,
            LogRequest {
                level: LogLevel::Error,
                message: error.log_text().to_string(),
                time: now_millis(),
            },
            None,
        );
        match node {
            Runnable::Hook(hook) => self.finish_hook(&hook.id, ItemStatus::Failed),
            Runnable::Test(test) => self.finish_test(test, ItemStatus::Failed),
        }
    }

    // ---- hooks ----

    fn on_hook_start(&self, hook: &HookNode) {
        if !self.inner.launch.passed_hook_creation_filter(hook) {
            return;
        }
        let class = match classify(&hook.title) {
            Ok(class) => class,
            Err(err) => {
                debug!("{err}, not reporting it");
                return;
            }
        };
        let Some(launch) = self.inner.launch.launch() else {
            warn!("Hook {:?} began before the launch, not reporting it", hook.title);
            return;
        };
        let start_time = now_millis();
        let name = if class.name.is_empty() {
            hook.title.clone()
        } else {
            class.name.clone()
        };
        let client = &self.inner.client;
        self.inner
            .launch
            .create_test_if_absent(&hook.id, hook.parent.as_ref(), |parent| {
                let request = StartItemRequest::new(&name, class.kind.item_type(), start_time);
                TestInfo {
                    name: name.clone(),
                    item: client.start_item(request, &launch, parent).id,
                    start_time,
                    end_time: None,
                    status: None,
                    kind: InfoKind::Hook,
                    hook_title: Some(class.kind.label().to_string()),
                }
            });
    }

    fn finish_hook(&self, id: &RunnerId, status: ItemStatus) {
        let end_time = now_millis();
        if let Some(info) = self.inner.launch.claim_finish(id, end_time, status) {
            self.inner
                .client
                .finish_item(&info.item, FinishItemRequest::with_status(end_time, status));
        }
    }

    // ---- relay logs ----

    async fn relay_log(&self, request: RelayRequest) {
        let Some(log) = request.log else {
            warn!("Log request without a log body, ignoring it");
            return;
        };
        let target = request.test_object_data;
        let Some(item) = self.inner.launch.find_item_by_name(&target).await else {
            warn!(
                "No item matches log target {:?}/{:?}, dropping log",
                target.suite, target.test
            );
            return;
        };

        let attachment = log.file.as_deref().and_then(|file| {
            load_attachment(Path::new(file))
                .map_err(|err| warn!("Failed to read attachment {file}: {err}"))
                .ok()
        });
        self.inner.client.send_log(
            &item,
            LogRequest {
                level: log.level,
                message: log.message,
                time: now_millis(),
            },
            attachment,
        );
    }
}
