//! Reporting-client layer.
//!
//! The reconcilers talk to [`ReportingClient`], a synchronous interface that
//! hands back a client-side id the moment a call is made. What happens on
//! the wire is behind it:
//!
//! - [`Dispatcher`] spawns each call onto the runtime and resolves ids
//!   through a [`Transport`] (normally [`HttpTransport`]).
//! - [`MockClient`] records calls in order for tests.
//!
//! Both track, per item, which children were started and whether each
//! child's finish has been dispatched or has completed. Parents use that to
//! hold their own finish until the children are closed.

pub mod dispatch;
pub mod mock;
pub mod transport;

pub use dispatch::Dispatcher;
pub use mock::{Call, CallKind, MockClient};
pub use transport::{HttpTransport, Transport};

use crate::types::{
    Attachment, Attribute, Issue, ItemId, ItemStatus, ItemType, LaunchMode, LogLevel,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Create a launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartLaunchRequest {
    pub name: String,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub attributes: Vec<Attribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<LaunchMode>,
    pub rerun: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerun_of: Option<String>,
}

/// Close a launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishLaunchRequest {
    pub end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}

/// Create a suite, test or hook item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartItemRequest {
    pub name: String,
    pub start_time: i64,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub attributes: Vec<Attribute>,
    pub retry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_ref: Option<String>,
}

impl StartItemRequest {
    pub fn new(name: impl Into<String>, item_type: ItemType, start_time: i64) -> Self {
        Self {
            name: name.into(),
            start_time,
            item_type,
            attributes: Vec::new(),
            retry: false,
            code_ref: None,
        }
    }
}

/// Close an item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishItemRequest {
    pub end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Attribute>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<Issue>,
}

impl FinishItemRequest {
    pub fn with_status(end_time: i64, status: ItemStatus) -> Self {
        Self {
            end_time,
            status: Some(status),
            ..Self::default()
        }
    }
}

/// A log entry for an item or the launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRequest {
    pub level: LogLevel,
    pub message: String,
    pub time: i64,
}

/// Per-item bookkeeping used to order parent finishes after children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemState {
    /// Items started under this one, in start order.
    pub children: Vec<ItemId>,
    /// The finish call was issued.
    pub finish_sent: bool,
    /// The finish call settled (answered or gave up).
    pub finish_completed: bool,
}

/// Which child flag counts as "finished" when holding a parent's finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildFinishSignal {
    /// The child's finish call was issued.
    Dispatched,
    /// The child's finish call settled.
    Completed,
}

impl ChildFinishSignal {
    pub fn observed(self, state: &ItemState) -> bool {
        match self {
            Self::Dispatched => state.finish_sent,
            Self::Completed => state.finish_completed,
        }
    }
}

/// Resolves once a dispatched call has settled; `true` on success.
#[derive(Debug)]
pub struct Completion(CompletionInner);

#[derive(Debug)]
enum CompletionInner {
    Ready(bool),
    Pending(oneshot::Receiver<bool>),
}

impl Completion {
    /// An already-settled completion.
    pub fn ready(ok: bool) -> Self {
        Self(CompletionInner::Ready(ok))
    }

    pub(crate) fn channel() -> (CompletionSender, Self) {
        let (tx, rx) = oneshot::channel();
        (CompletionSender(tx), Self(CompletionInner::Pending(rx)))
    }

    /// Wait for the call to settle. A dropped call counts as a failure.
    pub async fn wait(self) -> bool {
        match self.0 {
            CompletionInner::Ready(ok) => ok,
            CompletionInner::Pending(rx) => rx.await.unwrap_or(false),
        }
    }
}

pub(crate) struct CompletionSender(oneshot::Sender<bool>);

impl CompletionSender {
    pub(crate) fn complete(self, ok: bool) {
        // The receiver is routinely dropped by fire-and-forget callers.
        let _ = self.0.send(ok);
    }
}

/// Result of a create call: the client-side id plus its completion.
#[derive(Debug)]
pub struct Dispatched {
    pub id: ItemId,
    pub completion: Completion,
}

/// Synchronous, fire-and-forget interface to the reporting service.
///
/// Every call returns immediately. Failures surface only through the
/// returned [`Completion`] and the diagnostic log; they never reach the
/// caller as errors.
pub trait ReportingClient: Send + Sync {
    fn start_launch(&self, request: StartLaunchRequest) -> Dispatched;

    fn finish_launch(&self, launch: &ItemId, request: FinishLaunchRequest) -> Completion;

    /// Create an item under `parent`, or at the launch's top level.
    fn start_item(
        &self,
        request: StartItemRequest,
        launch: &ItemId,
        parent: Option<&ItemId>,
    ) -> Dispatched;

    fn finish_item(&self, item: &ItemId, request: FinishItemRequest) -> Completion;

    /// Send a log to an item, or to the launch when `item` is the launch id.
    fn send_log(
        &self,
        item: &ItemId,
        request: LogRequest,
        attachment: Option<Attachment>,
    ) -> Completion;

    /// Snapshot of an item's (or the launch's) bookkeeping.
    fn item_state(&self, item: &ItemId) -> Option<ItemState>;

    /// Whether every child of `item` shows `signal`. Unknown items are not
    /// finished.
    fn children_finished(&self, item: &ItemId, signal: ChildFinishSignal) -> bool {
        let Some(state) = self.item_state(item) else {
            return false;
        };
        state.children.iter().all(|child| {
            self.item_state(child)
                .is_some_and(|child_state| signal.observed(&child_state))
        })
    }
}
