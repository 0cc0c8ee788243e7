//! Launch data shared by every runner process of a parallel run.
//!
//! Runner identities are only unique within one worker process, so the
//! coordinator keys its tables by the runner id it receives and falls back
//! to display names when a worker addresses an item it cannot identify
//! (relay logs). All state sits behind one lock that is never held across
//! an await; the wait operations re-take it on every poll.

use rprt_common::protocol::HOOK_TARGET_TITLE;
use rprt_common::protocol::TestObjectData;
use rprt_common::{
    ChildFinishSignal, HookNode, ItemId, ItemStatus, PollPolicy, ReportingClient, RunnerId,
    SuiteNode, TestNode, WaitConfig, is_internal, poll_until, wait_for,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Marker in hook titles generated by the parallel wrapper.
const GENERATED_MARKER: &str = "generated_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteInfo {
    pub name: String,
    pub item: ItemId,
    pub start_time: i64,
    pub end_time: Option<i64>,
    /// Declared test and lifted hook titles, by runner id.
    pub members: Vec<(String, RunnerId)>,
}

impl SuiteInfo {
    /// Name index over a converted suite's tests and lifted hooks.
    pub fn members_of(suite: &SuiteNode) -> Vec<(String, RunnerId)> {
        suite
            .tests
            .iter()
            .map(|test| (test.title.clone(), test.id.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InfoKind {
    Test,
    Hook,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestInfo {
    pub name: String,
    pub item: ItemId,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: Option<ItemStatus>,
    pub kind: InfoKind,
    /// Title relay logs use to address a hook (`before all`).
    pub hook_title: Option<String>,
}

impl TestInfo {
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}

#[derive(Debug)]
struct LaunchState {
    counter: u32,
    launch: Option<ItemId>,
    launch_status: ItemStatus,
    suites: HashMap<RunnerId, SuiteInfo>,
    tests: HashMap<RunnerId, TestInfo>,
}

impl LaunchState {
    fn suite_passes(&self, suite: &SuiteNode) -> bool {
        !suite.root && !self.suites.contains_key(&suite.id)
    }

    fn suite_item(&self, suite: Option<&RunnerId>) -> Option<ItemId> {
        suite
            .and_then(|id| self.suites.get(id))
            .map(|info| info.item.clone())
    }
}

pub struct LaunchData {
    state: Mutex<LaunchState>,
    client: Arc<dyn ReportingClient>,
    wait: WaitConfig,
    report_hooks: bool,
}

impl LaunchData {
    pub fn new(client: Arc<dyn ReportingClient>, wait: WaitConfig, report_hooks: bool) -> Self {
        Self {
            state: Mutex::new(LaunchState {
                counter: 0,
                launch: None,
                launch_status: ItemStatus::Passed,
                suites: HashMap::new(),
                tests: HashMap::new(),
            }),
            client,
            wait,
            report_hooks,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LaunchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- launch reference counting ----

    /// Count one more runner in the launch. The runner that takes the count
    /// from 0 to 1 creates the launch through `start`.
    ///
    /// Returns the new count.
    pub fn bump_launch_counter(&self, start: impl FnOnce() -> ItemId) -> u32 {
        let mut state = self.lock();
        state.counter += 1;
        if state.counter == 1 && state.launch.is_none() {
            state.launch = Some(start());
        }
        state.counter
    }

    /// Count one runner out. Returns the remaining count.
    pub fn decrease_launch_counter(&self) -> u32 {
        let mut state = self.lock();
        if state.counter == 0 {
            warn!("Run ended more often than it began");
            return 0;
        }
        state.counter -= 1;
        state.counter
    }

    pub fn is_first_launch(&self) -> bool {
        self.lock().counter == 1
    }

    pub fn is_last_launch(&self) -> bool {
        self.lock().counter == 0
    }

    /// Runners currently inside the launch.
    pub fn runners(&self) -> u32 {
        self.lock().counter
    }

    pub fn launch(&self) -> Option<ItemId> {
        self.lock().launch.clone()
    }

    pub fn launch_status(&self) -> ItemStatus {
        self.lock().launch_status
    }

    pub fn set_launch_status(&self, status: ItemStatus) {
        self.lock().launch_status = status;
    }

    // ---- waits ----

    pub async fn wait_test_info(&self, id: &RunnerId) -> Option<TestInfo> {
        let label = format!("test info for {id}");
        poll_until(&label, self.wait.item_info, || self.test_info(id))
            .await
            .map_err(|err| warn!("{err}"))
            .ok()
    }

    pub async fn wait_suite_info(&self, id: &RunnerId) -> Option<SuiteInfo> {
        let label = format!("suite info for {id}");
        poll_until(&label, self.wait.item_info, || self.suite_info(id))
            .await
            .map_err(|err| warn!("{err}"))
            .ok()
    }

    /// Wait until every child of `item` shows `signal`. Gives up after
    /// `policy.timeout` and returns `false`.
    pub async fn wait_till_all_children_finished(
        &self,
        item: &ItemId,
        signal: ChildFinishSignal,
        policy: PollPolicy,
    ) -> bool {
        let label = format!("children of {item}");
        wait_for(&label, policy, || self.client.children_finished(item, signal)).await
    }

    /// Resolve a relay target by display names.
    ///
    /// Only a suite: that suite's item. Suite and test: the suite member
    /// declared under that title, else the suite's child test or hook whose
    /// name (or hook title) matches. Only a test: any test with that name.
    /// Neither: the launch.
    pub async fn find_item_by_name(&self, target: &TestObjectData) -> Option<ItemId> {
        let label = format!(
            "item named {:?} in suite {:?}",
            target.test.as_deref().unwrap_or("-"),
            target.suite.as_deref().unwrap_or("-")
        );
        poll_until(&label, self.wait.find_item, || self.lookup_by_name(target))
            .await
            .map_err(|err| warn!("{err}"))
            .ok()
    }

    fn lookup_by_name(&self, target: &TestObjectData) -> Option<ItemId> {
        let state = self.lock();
        let matches = |info: &TestInfo, name: &str| {
            info.name == name || info.hook_title.as_deref() == Some(name)
        };

        match (&target.suite, &target.test) {
            (None, None) => state.launch.clone(),
            (None, Some(test)) => state
                .tests
                .values()
                .find(|info| matches(info, test))
                .map(|info| info.item.clone()),
            (Some(suite), test) => {
                let suite = state.suites.values().find(|info| &info.name == suite)?;
                let Some(test) = test else {
                    return Some(suite.item.clone());
                };
                let indexed = suite
                    .members
                    .iter()
                    .filter(|(title, _)| title == test)
                    .find_map(|(_, id)| state.tests.get(id));
                if let Some(info) = indexed {
                    return Some(info.item.clone());
                }
                let children = self.client.item_state(&suite.item)?.children;
                state
                    .tests
                    .values()
                    .filter(|info| children.contains(&info.item))
                    .find(|info| matches(info, test))
                    .map(|info| info.item.clone())
            }
        }
    }

    // ---- suites ----

    /// Unwrap the synthetic container suite a parallel worker reports.
    ///
    /// The first child suite is the logical one. It loses its parent and
    /// gains the wrapper-declared before-all hooks as tests, titled
    /// `before all` so relay logs can address them. `None` when the wrapper
    /// has no child suite.
    pub fn convert_parallel_run_suite(suite: &SuiteNode) -> Option<SuiteNode> {
        let mut converted = suite.suites.first()?.clone();
        converted.parent = None;
        let hooks: Vec<TestNode> = converted
            .before_all
            .iter()
            .filter(|hook| !hook.title.contains(GENERATED_MARKER))
            .map(|hook| TestNode {
                id: hook.id.clone(),
                title: if hook.title.contains(HOOK_TARGET_TITLE) {
                    HOOK_TARGET_TITLE.to_string()
                } else {
                    hook.title.clone()
                },
                parent: Some(converted.id.clone()),
                ..TestNode::default()
            })
            .collect();
        converted.tests.extend(hooks);
        Some(converted)
    }

    /// FAILED if any test or hook under `item` finished as failed.
    pub fn suite_status(&self, item: &ItemId) -> ItemStatus {
        let Some(children) = self.client.item_state(item).map(|state| state.children) else {
            return ItemStatus::Passed;
        };
        let failed = self.lock().tests.values().any(|info| {
            children.contains(&info.item) && info.status == Some(ItemStatus::Failed)
        });
        if failed {
            ItemStatus::Failed
        } else {
            ItemStatus::Passed
        }
    }

    pub fn passed_suite_creation_filter(&self, suite: &SuiteNode) -> bool {
        self.lock().suite_passes(suite)
    }

    /// Create `suite` once. `create` gets the parent suite's item and runs
    /// under the lock, so concurrent begins cannot both create it.
    pub fn create_suite_if_absent(
        &self,
        suite: &SuiteNode,
        create: impl FnOnce(Option<&ItemId>) -> SuiteInfo,
    ) -> Option<ItemId> {
        let mut state = self.lock();
        if !state.suite_passes(suite) {
            return None;
        }
        let parent = state.suite_item(suite.parent.as_ref());
        let info = create(parent.as_ref());
        let item = info.item.clone();
        state.suites.insert(suite.id.clone(), info);
        Some(item)
    }

    pub fn add_suite_info(&self, id: &RunnerId, info: SuiteInfo) {
        debug!("Adding suite info {id}: {info:?}");
        self.lock().suites.insert(id.clone(), info);
    }

    /// Apply `update` to a suite's info. `false` if the suite is unknown.
    pub fn update_suite_info(&self, id: &RunnerId, update: impl FnOnce(&mut SuiteInfo)) -> bool {
        match self.lock().suites.get_mut(id) {
            Some(info) => {
                update(info);
                true
            }
            None => false,
        }
    }

    pub fn suite_info(&self, id: &RunnerId) -> Option<SuiteInfo> {
        self.lock().suites.get(id).cloned()
    }

    pub fn suite_item_id(&self, id: Option<&RunnerId>) -> Option<ItemId> {
        self.lock().suite_item(id)
    }

    // ---- tests and hooks ----

    pub fn passed_test_creation_filter(&self, id: &RunnerId) -> bool {
        !self.lock().tests.contains_key(id)
    }

    pub fn passed_hook_creation_filter(&self, hook: &HookNode) -> bool {
        self.report_hooks
            && hook.parent.is_some()
            && !is_internal(&hook.title)
            && self.passed_test_creation_filter(&hook.id)
    }

    /// Create a test or hook once, under the lock. `create` gets the item
    /// of the suite named by `parent`.
    pub fn create_test_if_absent(
        &self,
        id: &RunnerId,
        parent: Option<&RunnerId>,
        create: impl FnOnce(Option<&ItemId>) -> TestInfo,
    ) -> Option<ItemId> {
        let mut state = self.lock();
        if state.tests.contains_key(id) {
            return None;
        }
        let parent = state.suite_item(parent);
        let info = create(parent.as_ref());
        let item = info.item.clone();
        state.tests.insert(id.clone(), info);
        Some(item)
    }

    pub fn add_test_info(&self, id: &RunnerId, info: TestInfo) {
        debug!("Adding test info {id}: {info:?}");
        self.lock().tests.insert(id.clone(), info);
    }

    pub fn update_test_info(&self, id: &RunnerId, update: impl FnOnce(&mut TestInfo)) -> bool {
        match self.lock().tests.get_mut(id) {
            Some(info) => {
                update(info);
                true
            }
            None => false,
        }
    }

    pub fn test_info(&self, id: &RunnerId) -> Option<TestInfo> {
        self.lock().tests.get(id).cloned()
    }

    /// Mark a test or hook finished with `status`, once. Returns its info as
    /// it was before, or `None` if it is unknown or already finished.
    pub fn claim_finish(
        &self,
        id: &RunnerId,
        end_time: i64,
        status: ItemStatus,
    ) -> Option<TestInfo> {
        let mut state = self.lock();
        let info = state.tests.get_mut(id).filter(|info| !info.is_finished())?;
        let before = info.clone();
        info.end_time = Some(end_time);
        info.status = Some(status);
        Some(before)
    }

    /// Dump the tables at debug level.
    pub fn print_launch_data(&self) {
        let state = self.lock();
        debug!(
            counter = state.counter,
            launch = ?state.launch,
            status = %state.launch_status,
            "Launch data"
        );
        for (id, info) in &state.suites {
            debug!("suite {id}: {}", serde_json::to_string(info).unwrap_or_default());
        }
        for (id, info) in &state.tests {
            debug!("test {id}: {}", serde_json::to_string(info).unwrap_or_default());
        }
        if let Some(launch) = &state.launch {
            debug!("launch item state: {:?}", self.client.item_state(launch));
        }
    }
}
