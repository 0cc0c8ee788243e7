//! In-memory [`ReportingClient`] for tests.
//!
//! Records every call in order and keeps the same per-item bookkeeping as
//! the dispatcher. Finish completion can be deferred to model a slow service,
//! and any call kind can be made to fail.

use super::{
    Completion, Dispatched, FinishItemRequest, FinishLaunchRequest, ItemState, LogRequest,
    ReportingClient, StartItemRequest, StartLaunchRequest,
};
use crate::types::{Attachment, ItemId};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartLaunch {
        id: ItemId,
        request: StartLaunchRequest,
    },
    FinishLaunch {
        id: ItemId,
        request: FinishLaunchRequest,
    },
    StartItem {
        id: ItemId,
        launch: ItemId,
        parent: Option<ItemId>,
        request: StartItemRequest,
    },
    FinishItem {
        id: ItemId,
        request: FinishItemRequest,
    },
    SendLog {
        id: ItemId,
        request: LogRequest,
        attachment: Option<Attachment>,
    },
}

impl Call {
    pub fn kind(&self) -> CallKind {
        match self {
            Self::StartLaunch { .. } => CallKind::StartLaunch,
            Self::FinishLaunch { .. } => CallKind::FinishLaunch,
            Self::StartItem { .. } => CallKind::StartItem,
            Self::FinishItem { .. } => CallKind::FinishItem,
            Self::SendLog { .. } => CallKind::SendLog,
        }
    }

    pub fn id(&self) -> &ItemId {
        match self {
            Self::StartLaunch { id, .. }
            | Self::FinishLaunch { id, .. }
            | Self::StartItem { id, .. }
            | Self::FinishItem { id, .. }
            | Self::SendLog { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    StartLaunch,
    FinishLaunch,
    StartItem,
    FinishItem,
    SendLog,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<Call>,
    items: HashMap<ItemId, ItemState>,
    names: HashMap<ItemId, String>,
    next_id: u64,
    failing: HashSet<CallKind>,
    defer_finish: bool,
}

#[derive(Debug, Default)]
pub struct MockClient {
    state: Mutex<MockState>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `kind` report failure.
    pub fn failing(self, kind: CallKind) -> Self {
        self.lock().failing.insert(kind);
        self
    }

    /// Leave `finish_completed` unset until [`complete_finishes`] is called.
    ///
    /// [`complete_finishes`]: MockClient::complete_finishes
    pub fn deferring_finish(self) -> Self {
        self.lock().defer_finish = true;
        self
    }

    /// Mark every issued finish as completed.
    pub fn complete_finishes(&self) {
        for state in self.lock().items.values_mut() {
            if state.finish_sent {
                state.finish_completed = true;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.lock().calls.iter().filter(|c| c.kind() == kind).count()
    }

    /// Name the item (or launch) was started with.
    pub fn name_of(&self, id: &ItemId) -> Option<String> {
        self.lock().names.get(id).cloned()
    }

    /// Item ids started with `name`, in start order.
    pub fn ids_named(&self, name: &str) -> Vec<ItemId> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::StartItem { id, request, .. } if request.name == name => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Finish payloads sent for items named `name`, in order.
    pub fn finishes_named(&self, name: &str) -> Vec<FinishItemRequest> {
        let state = self.lock();
        state
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::FinishItem { id, request }
                    if state.names.get(id).map(String::as_str) == Some(name) =>
                {
                    Some(request.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Start call for the item named `name` (the first, if several).
    pub fn start_named(&self, name: &str) -> Option<(StartItemRequest, Option<ItemId>)> {
        self.lock().calls.iter().find_map(|call| match call {
            Call::StartItem {
                request, parent, ..
            } if request.name == name => Some((request.clone(), parent.clone())),
            _ => None,
        })
    }

    /// Human-readable call sequence, one line per call:
    /// `start_launch <name>`, `start <TYPE> <name>[ retry]`,
    /// `finish <name> <status|->[ retry]`, `log <name|launch> <LEVEL>`,
    /// `finish_launch <status|->`.
    pub fn timeline(&self) -> Vec<String> {
        let state = self.lock();
        let name = |id: &ItemId| {
            state
                .names
                .get(id)
                .cloned()
                .unwrap_or_else(|| id.to_string())
        };
        state
            .calls
            .iter()
            .map(|call| match call {
                Call::StartLaunch { request, .. } => format!("start_launch {}", request.name),
                Call::FinishLaunch { request, .. } => format!(
                    "finish_launch {}",
                    request.status.map_or("-".to_string(), |s| s.to_string())
                ),
                Call::StartItem { request, .. } => {
                    let kind = serde_json::to_value(request.item_type)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    let retry = if request.retry { " retry" } else { "" };
                    format!("start {kind} {}{retry}", request.name)
                }
                Call::FinishItem { id, request } => {
                    let status = request.status.map_or("-".to_string(), |s| s.to_string());
                    let retry = if request.retry == Some(true) { " retry" } else { "" };
                    format!("finish {} {status}{retry}", name(id))
                }
                Call::SendLog { id, request, .. } => {
                    let target = if state.calls.iter().any(
                        |c| matches!(c, Call::StartLaunch { id: launch, .. } if launch == id),
                    ) {
                        "launch".to_string()
                    } else {
                        name(id)
                    };
                    let level = serde_json::to_value(request.level)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    format!("log {target} {level}")
                }
            })
            .collect()
    }

    fn next_id(state: &mut MockState, prefix: &str) -> ItemId {
        state.next_id += 1;
        ItemId::new(format!("{prefix}-{}", state.next_id))
    }

    fn record_finish(state: &mut MockState, id: &ItemId, ok: bool) {
        let defer = state.defer_finish;
        let item = state.items.entry(id.clone()).or_default();
        item.finish_sent = true;
        if !defer || !ok {
            item.finish_completed = true;
        }
    }
}

impl ReportingClient for MockClient {
    fn start_launch(&self, request: StartLaunchRequest) -> Dispatched {
        let mut state = self.lock();
        let id = Self::next_id(&mut state, "launch");
        let ok = !state.failing.contains(&CallKind::StartLaunch);
        state.items.insert(id.clone(), ItemState::default());
        state.names.insert(id.clone(), request.name.clone());
        state.calls.push(Call::StartLaunch {
            id: id.clone(),
            request,
        });
        Dispatched {
            id,
            completion: Completion::ready(ok),
        }
    }

    fn finish_launch(&self, launch: &ItemId, request: FinishLaunchRequest) -> Completion {
        let mut state = self.lock();
        let ok = !state.failing.contains(&CallKind::FinishLaunch);
        Self::record_finish(&mut state, launch, ok);
        state.calls.push(Call::FinishLaunch {
            id: launch.clone(),
            request,
        });
        Completion::ready(ok)
    }

    fn start_item(
        &self,
        request: StartItemRequest,
        launch: &ItemId,
        parent: Option<&ItemId>,
    ) -> Dispatched {
        let mut state = self.lock();
        let id = Self::next_id(&mut state, "item");
        let ok = !state.failing.contains(&CallKind::StartItem);
        state.items.insert(id.clone(), ItemState::default());
        state
            .items
            .entry(parent.unwrap_or(launch).clone())
            .or_default()
            .children
            .push(id.clone());
        state.names.insert(id.clone(), request.name.clone());
        state.calls.push(Call::StartItem {
            id: id.clone(),
            launch: launch.clone(),
            parent: parent.cloned(),
            request,
        });
        Dispatched {
            id,
            completion: Completion::ready(ok),
        }
    }

    fn finish_item(&self, item: &ItemId, request: FinishItemRequest) -> Completion {
        let mut state = self.lock();
        let ok = !state.failing.contains(&CallKind::FinishItem);
        Self::record_finish(&mut state, item, ok);
        state.calls.push(Call::FinishItem {
            id: item.clone(),
            request,
        });
        Completion::ready(ok)
    }

    fn send_log(
        &self,
        item: &ItemId,
        request: LogRequest,
        attachment: Option<Attachment>,
    ) -> Completion {
        let mut state = self.lock();
        let ok = !state.failing.contains(&CallKind::SendLog);
        state.calls.push(Call::SendLog {
            id: item.clone(),
            request,
            attachment,
        });
        Completion::ready(ok)
    }

    fn item_state(&self, item: &ItemId) -> Option<ItemState> {
        self.lock().items.get(item).cloned()
    }
}
