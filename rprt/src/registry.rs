//! Item registry: which runner nodes have remote items, and in what state.
//!
//! Two tables keyed by [`NodeId`]: one for suites and one for tests and
//! hooks. The registry also tracks the suite stack and the running test,
//! which together decide the "currently active item" annotations apply to,
//! and owns the [`AnnotationOverlay`] consumed at finish time.
//!
//! The registry never talks to the reporting client itself. Creation goes
//! through a caller-supplied closure so the creation filter and the
//! bookkeeping stay in one place.

use crate::identity::{IdentityTable, NodeId};
use rprt_common::{
    AnnotationOverlay, Annotations, HookKind, ItemId, ItemStatus, RunnerId, SuiteNode,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteRecord {
    pub identity: NodeId,
    pub title: String,
    pub item: ItemId,
    /// Parent suite; `None` at the top level.
    pub parent: Option<NodeId>,
    pub start_time: i64,
    pub end_time: Option<i64>,
    /// Latest terminal status of each finished child (tests, hooks, suites).
    child_statuses: HashMap<NodeId, ItemStatus>,
}

impl SuiteRecord {
    /// FAILED if any child's latest attempt failed, else PASSED.
    pub fn computed_status(&self) -> ItemStatus {
        if self
            .child_statuses
            .values()
            .any(|status| *status == ItemStatus::Failed)
        {
            ItemStatus::Failed
        } else {
            ItemStatus::Passed
        }
    }
}

/// What a test-table record models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Test,
    Hook(HookKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    pub identity: NodeId,
    pub title: String,
    pub item: ItemId,
    /// Suite the item was created under.
    pub parent: Option<NodeId>,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub retry: bool,
    pub status: Option<ItemStatus>,
    pub kind: RecordKind,
}

impl TestRecord {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Outcome of a register call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// A remote item was created.
    Created(ItemId),
    /// The node already has an open item; nothing was created.
    Existing(ItemId),
    /// The root suite is never reported.
    Root,
    /// The parent suite was never registered, so the node is not reported.
    UnknownParent,
}

impl Registration {
    pub fn item(&self) -> Option<&ItemId> {
        match self {
            Self::Created(item) | Self::Existing(item) => Some(item),
            Self::Root | Self::UnknownParent => None,
        }
    }
}

/// A test or hook closed by [`ItemRegistry::finish_test`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFinish {
    pub record: TestRecord,
    /// Runner status, replaced by an annotated override if there was one.
    pub status: ItemStatus,
    pub annotations: Annotations,
}

/// A suite closed by [`ItemRegistry::finish_suite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteFinish {
    pub item: ItemId,
    pub status: ItemStatus,
    pub annotations: Annotations,
}

#[derive(Debug, Default)]
pub struct ItemRegistry {
    identities: IdentityTable,
    roots: HashSet<NodeId>,
    suites: HashMap<NodeId, SuiteRecord>,
    tests: HashMap<NodeId, TestRecord>,
    suite_stack: Vec<NodeId>,
    current_test: Option<NodeId>,
    overlay: AnnotationOverlay,
    launch: Option<ItemId>,
    launch_status: Option<ItemStatus>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_of(&mut self, runner_id: &RunnerId) -> NodeId {
        self.identities.identity_of(runner_id)
    }

    pub fn launch(&self) -> Option<&ItemId> {
        self.launch.as_ref()
    }

    pub fn set_launch(&mut self, launch: ItemId) {
        self.launch = Some(launch);
    }

    pub fn launch_status(&self) -> Option<ItemStatus> {
        self.launch_status
    }

    pub fn set_launch_status(&mut self, status: ItemStatus) {
        self.launch_status = Some(status);
    }

    pub fn overlay_mut(&mut self) -> &mut AnnotationOverlay {
        &mut self.overlay
    }

    pub fn overlay(&self) -> &AnnotationOverlay {
        &self.overlay
    }

    // ---- suites ----

    /// Whether `suite` would get a remote item: not the root, not seen yet.
    pub fn passed_suite_creation_filter(&self, suite: &SuiteNode) -> bool {
        !suite.root
            && self
                .identities
                .get(&suite.id)
                .is_none_or(|identity| !self.suites.contains_key(&identity))
    }

    /// Register `suite` and create its remote item once per identity.
    ///
    /// `create` receives the parent suite's item (`None` at the top level)
    /// and returns the new item's id.
    pub fn register_suite_if_absent(
        &mut self,
        suite: &SuiteNode,
        start_time: i64,
        create: impl FnOnce(Option<&ItemId>) -> ItemId,
    ) -> Registration {
        let identity = self.identity_of(&suite.id);
        if suite.root {
            self.roots.insert(identity);
            return Registration::Root;
        }
        if let Some(existing) = self.suites.get(&identity) {
            return Registration::Existing(existing.item.clone());
        }

        let parent = match &suite.parent {
            None => None,
            Some(parent_id) => {
                let parent = self.identity_of(parent_id);
                if self.roots.contains(&parent) {
                    None
                } else if self.suites.contains_key(&parent) {
                    Some(parent)
                } else {
                    return Registration::UnknownParent;
                }
            }
        };

        let parent_item = parent.and_then(|p| self.suites.get(&p)).map(|s| s.item.clone());
        let item = create(parent_item.as_ref());
        self.suites.insert(
            identity,
            SuiteRecord {
                identity,
                title: suite.title.clone(),
                item: item.clone(),
                parent,
                start_time,
                end_time: None,
                child_statuses: HashMap::new(),
            },
        );
        self.suite_stack.push(identity);
        debug!("Registered suite {:?} as {}", suite.title, identity);
        Registration::Created(item)
    }

    /// Close a suite's record.
    ///
    /// Returns `None` for the root, unknown suites and suites already
    /// finished. The status is the annotated override if any, else the
    /// computed one.
    pub fn finish_suite(&mut self, suite_id: &RunnerId, end_time: i64) -> Option<SuiteFinish> {
        let identity = self.identities.get(suite_id)?;
        let record = self.suites.get_mut(&identity)?;
        if record.end_time.is_some() {
            return None;
        }
        record.end_time = Some(end_time);
        let item = record.item.clone();
        let computed = record.computed_status();
        let parent = record.parent;

        let annotations = self.overlay.take(&item);
        let status = annotations.status.unwrap_or(computed);
        self.record_child_status(parent, identity, status);

        if let Some(pos) = self.suite_stack.iter().rposition(|s| *s == identity) {
            self.suite_stack.remove(pos);
        }

        Some(SuiteFinish {
            item,
            status,
            annotations,
        })
    }

    pub fn suite(&self, suite_id: &RunnerId) -> Option<&SuiteRecord> {
        let identity = self.identities.get(suite_id)?;
        self.suites.get(&identity)
    }

    pub fn suite_by_identity(&self, identity: NodeId) -> Option<&SuiteRecord> {
        self.suites.get(&identity)
    }

    /// Registered parent suite of a registered suite.
    pub fn suite_parent(&self, suite_id: &RunnerId) -> Option<NodeId> {
        self.suite(suite_id).and_then(|suite| suite.parent)
    }

    pub fn is_root(&self, suite_id: &RunnerId) -> bool {
        self.identities
            .get(suite_id)
            .is_some_and(|identity| self.roots.contains(&identity))
    }

    // ---- tests and hooks ----

    /// Create a test or hook item unless the node already has an open one.
    #[allow(clippy::too_many_arguments)]
    pub fn register_test_if_absent(
        &mut self,
        runner_id: &RunnerId,
        title: &str,
        parent: Option<NodeId>,
        kind: RecordKind,
        start_time: i64,
        retry: bool,
        create: impl FnOnce(Option<&ItemId>) -> ItemId,
    ) -> Registration {
        let identity = self.identity_of(runner_id);
        if let Some(open) = self.tests.get(&identity).filter(|r| r.is_open()) {
            return Registration::Existing(open.item.clone());
        }

        let parent_item = parent.and_then(|p| self.suites.get(&p)).map(|s| s.item.clone());
        let item = create(parent_item.as_ref());
        self.tests.insert(
            identity,
            TestRecord {
                identity,
                title: title.to_string(),
                item: item.clone(),
                parent,
                start_time,
                end_time: None,
                retry,
                status: None,
                kind,
            },
        );
        if kind == RecordKind::Test {
            self.current_test = Some(identity);
        }
        Registration::Created(item)
    }

    /// Latest record of a test or hook, open or finished.
    pub fn test(&self, runner_id: &RunnerId) -> Option<&TestRecord> {
        let identity = self.identities.get(runner_id)?;
        self.tests.get(&identity)
    }

    /// The node's record if it is still open.
    pub fn open_test(&self, runner_id: &RunnerId) -> Option<&TestRecord> {
        self.test(runner_id).filter(|record| record.is_open())
    }

    /// Apply `update` to the latest record of a node.
    pub fn update_test(
        &mut self,
        runner_id: &RunnerId,
        update: impl FnOnce(&mut TestRecord),
    ) -> bool {
        let Some(identity) = self.identities.get(runner_id) else {
            return false;
        };
        match self.tests.get_mut(&identity) {
            Some(record) => {
                update(record);
                true
            }
            None => false,
        }
    }

    /// Close the node's open record with `status` (or its annotated
    /// override). Returns `None` if nothing is open.
    pub fn finish_test(
        &mut self,
        runner_id: &RunnerId,
        end_time: i64,
        status: ItemStatus,
    ) -> Option<TestFinish> {
        let identity = self.identities.get(runner_id)?;
        let record = self.tests.get_mut(&identity).filter(|r| r.is_open())?;

        let annotations = self.overlay.take(&record.item);
        let status = annotations.status.unwrap_or(status);
        record.end_time = Some(end_time);
        record.status = Some(status);
        let record = record.clone();

        self.record_child_status(record.parent, identity, status);
        if self.current_test == Some(identity) {
            self.current_test = None;
        }

        Some(TestFinish {
            record,
            status,
            annotations,
        })
    }

    /// The test currently running, if its record is open.
    pub fn current_test(&self) -> Option<&TestRecord> {
        self.current_test
            .and_then(|identity| self.tests.get(&identity))
            .filter(|record| record.is_open())
    }

    /// Item annotations apply to: the running test, else the innermost open
    /// suite.
    pub fn current_active_item(&self) -> Option<ItemId> {
        if let Some(test) = self.current_test() {
            return Some(test.item.clone());
        }
        self.suite_stack
            .last()
            .and_then(|identity| self.suites.get(identity))
            .map(|suite| suite.item.clone())
    }

    fn record_child_status(&mut self, parent: Option<NodeId>, child: NodeId, status: ItemStatus) {
        if let Some(parent) = parent.and_then(|p| self.suites.get_mut(&p)) {
            parent.child_statuses.insert(child, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn suite(id: &str, title: &str, parent: Option<&str>) -> SuiteNode {
        SuiteNode {
            id: RunnerId::new(id),
            title: title.to_string(),
            parent: parent.map(RunnerId::new),
            ..SuiteNode::default()
        }
    }

    fn root() -> SuiteNode {
        SuiteNode {
            id: RunnerId::new("root"),
            root: true,
            ..SuiteNode::default()
        }
    }

    /// Item factory handing out `item-N` ids and counting calls.
    fn factory(counter: &Cell<u32>) -> impl FnOnce(Option<&ItemId>) -> ItemId + '_ {
        move |_| {
            counter.set(counter.get() + 1);
            ItemId::new(format!("item-{}", counter.get()))
        }
    }

    #[test]
    fn test_root_suite_is_never_created() {
        let mut registry = ItemRegistry::new();
        let created = Cell::new(0);
        assert_eq!(
            registry.register_suite_if_absent(&root(), 0, factory(&created)),
            Registration::Root
        );
        assert_eq!(created.get(), 0);
        assert!(registry.is_root(&RunnerId::new("root")));
        assert!(!registry.passed_suite_creation_filter(&root()));
        assert!(registry.finish_suite(&RunnerId::new("root"), 1).is_none());
    }

    #[test]
    fn test_suite_registration_is_idempotent() {
        let mut registry = ItemRegistry::new();
        let created = Cell::new(0);
        registry.register_suite_if_absent(&root(), 0, factory(&created));
        let s = suite("s1", "Cart", Some("root"));

        assert!(registry.passed_suite_creation_filter(&s));
        let first = registry.register_suite_if_absent(&s, 1, factory(&created));
        let second = registry.register_suite_if_absent(&s, 2, factory(&created));
        assert_eq!(first, Registration::Created(ItemId::new("item-1")));
        assert_eq!(second, Registration::Existing(ItemId::new("item-1")));
        assert_eq!(created.get(), 1);
        assert!(!registry.passed_suite_creation_filter(&s));
        assert_eq!(registry.suite(&s.id).unwrap().parent, None);
    }

    #[test]
    fn test_suite_under_unknown_parent_is_skipped() {
        let mut registry = ItemRegistry::new();
        let created = Cell::new(0);
        let orphan = suite("s2", "Orphan", Some("never-seen"));
        assert_eq!(
            registry.register_suite_if_absent(&orphan, 1, factory(&created)),
            Registration::UnknownParent
        );
        assert_eq!(created.get(), 0);
    }

    #[test]
    fn test_nested_suite_receives_parent_item() {
        let mut registry = ItemRegistry::new();
        let created = Cell::new(0);
        registry.register_suite_if_absent(&root(), 0, factory(&created));
        let outer = suite("outer", "Outer", Some("root"));
        registry.register_suite_if_absent(&outer, 1, factory(&created));

        let mut seen_parent = None;
        registry.register_suite_if_absent(&suite("inner", "Inner", Some("outer")), 2, |parent| {
            seen_parent = parent.cloned();
            ItemId::new("inner-item")
        });
        assert_eq!(seen_parent, Some(ItemId::new("item-1")));
        assert_eq!(
            registry.current_active_item(),
            Some(ItemId::new("inner-item"))
        );
    }

    #[test]
    fn test_suite_status_follows_latest_child_attempt() {
        let mut registry = ItemRegistry::new();
        let created = Cell::new(0);
        registry.register_suite_if_absent(&suite("s", "S", None), 0, factory(&created));
        let parent = registry.suite(&RunnerId::new("s")).map(|s| s.identity);
        let t = RunnerId::new("t");

        let kind = RecordKind::Test;
        registry.register_test_if_absent(&t, "t", parent, kind, 1, false, factory(&created));
        registry.finish_test(&t, 2, ItemStatus::Failed).unwrap();
        registry.register_test_if_absent(&t, "t", parent, kind, 3, true, factory(&created));
        registry.finish_test(&t, 4, ItemStatus::Passed).unwrap();

        let finish = registry.finish_suite(&RunnerId::new("s"), 5).unwrap();
        assert_eq!(finish.status, ItemStatus::Passed);
        assert!(registry.finish_suite(&RunnerId::new("s"), 6).is_none());
    }

    #[test]
    fn test_failed_child_suite_fails_parent() {
        let mut registry = ItemRegistry::new();
        let created = Cell::new(0);
        registry.register_suite_if_absent(&suite("outer", "Outer", None), 0, factory(&created));
        let inner_suite = suite("inner", "Inner", Some("outer"));
        registry.register_suite_if_absent(&inner_suite, 1, factory(&created));
        let inner = registry.suite(&RunnerId::new("inner")).map(|s| s.identity);

        let t = RunnerId::new("t");
        let kind = RecordKind::Test;
        registry.register_test_if_absent(&t, "t", inner, kind, 2, false, factory(&created));
        registry.finish_test(&t, 3, ItemStatus::Failed);

        assert_eq!(
            registry.finish_suite(&RunnerId::new("inner"), 4).unwrap().status,
            ItemStatus::Failed
        );
        assert_eq!(
            registry.finish_suite(&RunnerId::new("outer"), 5).unwrap().status,
            ItemStatus::Failed
        );
    }

    #[test]
    fn test_status_override_wins_and_is_cleared() {
        let mut registry = ItemRegistry::new();
        let created = Cell::new(0);
        registry.register_suite_if_absent(&suite("s", "S", None), 0, factory(&created));
        let item = registry.current_active_item().unwrap();
        registry.overlay_mut().set_status(&item, ItemStatus::Warn);
        registry.overlay_mut().set_description(&item, "flaky env");

        let finish = registry.finish_suite(&RunnerId::new("s"), 1).unwrap();
        assert_eq!(finish.status, ItemStatus::Warn);
        assert_eq!(finish.annotations.description.as_deref(), Some("flaky env"));
        assert!(registry.overlay().is_empty());
    }

    #[test]
    fn test_open_test_is_active_item_until_finished() {
        let mut registry = ItemRegistry::new();
        let created = Cell::new(0);
        registry.register_suite_if_absent(&suite("s", "S", None), 0, factory(&created));
        let suite_item = registry.current_active_item().unwrap();
        let parent = registry.suite(&RunnerId::new("s")).map(|s| s.identity);

        let t = RunnerId::new("t");
        let kind = RecordKind::Test;
        let reg =
            registry.register_test_if_absent(&t, "t", parent, kind, 1, false, factory(&created));
        assert_eq!(registry.current_active_item().as_ref(), reg.item());
        assert_eq!(
            registry.register_test_if_absent(&t, "t", parent, kind, 1, false, factory(&created)),
            Registration::Existing(reg.item().cloned().unwrap())
        );

        assert!(registry.update_test(&t, |record| record.title = "renamed".into()));
        registry.finish_test(&t, 2, ItemStatus::Passed);
        assert_eq!(registry.current_active_item(), Some(suite_item));
        assert_eq!(registry.test(&t).unwrap().title, "renamed");
        assert!(registry.open_test(&t).is_none());
        assert!(registry.finish_test(&t, 3, ItemStatus::Passed).is_none());
    }

    #[test]
    fn test_hooks_do_not_become_current() {
        let mut registry = ItemRegistry::new();
        let created = Cell::new(0);
        registry.register_suite_if_absent(&suite("s", "S", None), 0, factory(&created));
        let suite_item = registry.current_active_item();
        registry.register_test_if_absent(
            &RunnerId::new("h"),
            "setup",
            None,
            RecordKind::Hook(HookKind::BeforeEach),
            1,
            false,
            factory(&created),
        );
        assert_eq!(registry.current_active_item(), suite_item);
    }
}
