//! Temp-id dispatcher over an async [`Transport`].
//!
//! Each call gets a UUID immediately and runs as its own task. Tasks wait on
//! each other through per-item resolution channels: an item start waits for
//! its launch's and parent's server ids, a finish or log waits for its own.
//! A finish additionally holds (bounded) until every child's finish has
//! settled, since the service rejects closing a parent with open children.

use super::{
    ChildFinishSignal, Completion, CompletionSender, Dispatched, FinishItemRequest,
    FinishLaunchRequest, ItemState, LogRequest, ReportingClient, StartItemRequest,
    StartLaunchRequest, Transport,
};
use crate::errors::ClientError;
use crate::types::{Attachment, ItemId, ItemType};
use crate::wait::{PollPolicy, wait_for};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Upper bound on waiting for a dependency's server id.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Pending,
    Ready(String),
    Failed,
}

#[derive(Debug, Clone, Copy)]
enum EntryKind {
    Launch,
    Item(ItemType),
}

impl EntryKind {
    fn noun(self) -> &'static str {
        match self {
            Self::Launch => "launch",
            Self::Item(ItemType::Suite) => "suite",
            Self::Item(ItemType::Step) => "test",
            Self::Item(_) => "hook",
        }
    }
}

struct Entry {
    kind: EntryKind,
    /// Launch this item belongs to; the launch itself for a launch entry.
    launch: ItemId,
    resolved: watch::Sender<Resolution>,
    state: ItemState,
}

struct Shared<T> {
    transport: T,
    entries: Mutex<HashMap<ItemId, Entry>>,
    tasks: Mutex<JoinSet<()>>,
    children_policy: PollPolicy,
}

impl<T: Transport> Shared<T> {
    fn entries(&self) -> MutexGuard<'_, HashMap<ItemId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn resolve(&self, id: &ItemId, what: &'static str) -> Result<String, ClientError> {
        let mut rx = self
            .entries()
            .get(id)
            .map(|entry| entry.resolved.subscribe())
            .ok_or_else(|| ClientError::UnknownItem(id.to_string()))?;

        let outcome = tokio::time::timeout(
            RESOLVE_TIMEOUT,
            rx.wait_for(|resolution| *resolution != Resolution::Pending),
        )
        .await;

        match outcome {
            Err(_) => Err(ClientError::Timeout {
                what: format!("{what} {id}"),
                waited: RESOLVE_TIMEOUT,
            }),
            Ok(Ok(resolution)) => match &*resolution {
                Resolution::Ready(real) => Ok(real.clone()),
                _ => Err(ClientError::DependencyFailed {
                    what,
                    id: id.to_string(),
                }),
            },
            Ok(Err(_)) => Err(ClientError::DependencyFailed {
                what,
                id: id.to_string(),
            }),
        }
    }

    fn set_resolution(&self, id: &ItemId, resolution: Resolution) {
        if let Some(entry) = self.entries().get(id) {
            entry.resolved.send_replace(resolution);
        }
    }

    fn mark_finish_completed(&self, id: &ItemId) {
        if let Some(entry) = self.entries().get_mut(id) {
            entry.state.finish_completed = true;
        }
    }

    fn children_settled(&self, id: &ItemId) -> bool {
        let entries = self.entries();
        let Some(entry) = entries.get(id) else {
            return true;
        };
        entry.state.children.iter().all(|child| {
            entries
                .get(child)
                .is_some_and(|c| ChildFinishSignal::Completed.observed(&c.state))
        })
    }
}

/// [`ReportingClient`] that runs every call as a task on the current tokio
/// runtime.
///
/// Must be used from within a runtime context. Cloning shares the same
/// id space and task set.
pub struct Dispatcher<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, children_policy: PollPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                entries: Mutex::new(HashMap::new()),
                tasks: Mutex::new(JoinSet::new()),
                children_policy,
            }),
        }
    }

    /// Wait for every call dispatched so far, including calls made while
    /// flushing.
    pub async fn flush(&self) {
        loop {
            let mut tasks = std::mem::take(
                &mut *self.shared.tasks.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if tasks.is_empty() {
                break;
            }
            debug!("Flushing {} reporting calls", tasks.len());
            while let Some(result) = tasks.join_next().await {
                if let Err(err) = result {
                    error!("Reporting task aborted: {}", err);
                }
            }
        }
    }

    /// Server id of an item, once known.
    pub fn server_id(&self, id: &ItemId) -> Option<String> {
        match &*self.shared.entries().get(id)?.resolved.borrow() {
            Resolution::Ready(real) => Some(real.clone()),
            _ => None,
        }
    }

    fn register(&self, id: &ItemId, kind: EntryKind, launch: ItemId, parent: Option<&ItemId>) {
        let (resolved, _) = watch::channel(Resolution::Pending);
        let mut entries = self.shared.entries();
        entries.insert(
            id.clone(),
            Entry {
                kind,
                launch: launch.clone(),
                resolved,
                state: ItemState::default(),
            },
        );
        let owner = parent.unwrap_or(&launch);
        if let Some(owner) = entries.get_mut(owner) {
            owner.state.children.push(id.clone());
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.shared.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    fn new_id() -> ItemId {
        ItemId::new(Uuid::new_v4().to_string())
    }
}

impl<T: Transport> ReportingClient for Dispatcher<T> {
    fn start_launch(&self, request: StartLaunchRequest) -> Dispatched {
        let id = Self::new_id();
        self.register(&id, EntryKind::Launch, id.clone(), None);
        let (done, completion) = Completion::channel();

        let shared = Arc::clone(&self.shared);
        let launch = id.clone();
        self.spawn(async move {
            match shared.transport.start_launch(request).await {
                Ok(real) => {
                    debug!("Launch {} resolved to {}", launch, real);
                    shared.set_resolution(&launch, Resolution::Ready(real));
                    done.complete(true);
                }
                Err(err) => {
                    error!("Failed to start launch: {}", err);
                    shared.set_resolution(&launch, Resolution::Failed);
                    done.complete(false);
                }
            }
        });

        Dispatched { id, completion }
    }

    fn finish_launch(&self, launch: &ItemId, request: FinishLaunchRequest) -> Completion {
        if !self.mark_finish_sent(launch) {
            return Completion::ready(false);
        }
        let (done, completion) = Completion::channel();
        let shared = Arc::clone(&self.shared);
        let launch = launch.clone();
        self.spawn(async move {
            let result = async {
                let real = shared.resolve(&launch, "launch").await?;
                wait_children(&shared, &launch).await;
                shared.transport.finish_launch(real, request).await
            }
            .await;
            settle(&shared, &launch, "Failed to finish launch", result, done);
        });
        completion
    }

    fn start_item(
        &self,
        request: StartItemRequest,
        launch: &ItemId,
        parent: Option<&ItemId>,
    ) -> Dispatched {
        let id = Self::new_id();
        let kind = EntryKind::Item(request.item_type);
        self.register(&id, kind, launch.clone(), parent);
        let (done, completion) = Completion::channel();

        let shared = Arc::clone(&self.shared);
        let item = id.clone();
        let launch = launch.clone();
        let parent = parent.cloned();
        self.spawn(async move {
            let name = request.name.clone();
            let result = async {
                let launch_real = shared.resolve(&launch, "launch").await?;
                let parent_real = match &parent {
                    Some(parent) => Some(shared.resolve(parent, "parent").await?),
                    None => None,
                };
                shared
                    .transport
                    .start_item(launch_real, parent_real, request)
                    .await
            }
            .await;

            match result {
                Ok(real) => {
                    debug!("{} {:?} resolved to {}", kind.noun(), name, real);
                    shared.set_resolution(&item, Resolution::Ready(real));
                    done.complete(true);
                }
                Err(err) => {
                    error!("Failed to start {} {:?}: {}", kind.noun(), name, err);
                    shared.set_resolution(&item, Resolution::Failed);
                    done.complete(false);
                }
            }
        });

        Dispatched { id, completion }
    }

    fn finish_item(&self, item: &ItemId, request: FinishItemRequest) -> Completion {
        if !self.mark_finish_sent(item) {
            return Completion::ready(false);
        }
        let Some((kind, launch)) = self.kind_and_launch(item) else {
            return Completion::ready(false);
        };
        let (done, completion) = Completion::channel();
        let shared = Arc::clone(&self.shared);
        let item = item.clone();
        self.spawn(async move {
            let result = async {
                let real = shared.resolve(&item, kind.noun()).await?;
                let launch_real = shared.resolve(&launch, "launch").await?;
                wait_children(&shared, &item).await;
                shared.transport.finish_item(launch_real, real, request).await
            }
            .await;
            let label = format!("Failed to finish {}", kind.noun());
            settle(&shared, &item, &label, result, done);
        });
        completion
    }

    fn send_log(
        &self,
        item: &ItemId,
        request: LogRequest,
        attachment: Option<Attachment>,
    ) -> Completion {
        let Some((kind, launch)) = self.kind_and_launch(item) else {
            warn!("Failed to send log: unknown item {}", item);
            return Completion::ready(false);
        };
        let (done, completion) = Completion::channel();
        let shared = Arc::clone(&self.shared);
        let item = item.clone();
        self.spawn(async move {
            let result = async {
                let launch_real = shared.resolve(&launch, "launch").await?;
                let item_real = match kind {
                    EntryKind::Launch => None,
                    EntryKind::Item(_) => Some(shared.resolve(&item, kind.noun()).await?),
                };
                shared
                    .transport
                    .send_log(launch_real, item_real, request, attachment)
                    .await
            }
            .await;
            match result {
                Ok(()) => done.complete(true),
                Err(err) => {
                    error!("Failed to send log: {}", err);
                    done.complete(false);
                }
            }
        });
        completion
    }

    fn item_state(&self, item: &ItemId) -> Option<ItemState> {
        self.shared.entries().get(item).map(|entry| entry.state.clone())
    }
}

impl<T: Transport> Dispatcher<T> {
    /// Flag the finish as issued. Returns `false` for unknown ids.
    fn mark_finish_sent(&self, id: &ItemId) -> bool {
        match self.shared.entries().get_mut(id) {
            Some(entry) => {
                entry.state.finish_sent = true;
                true
            }
            None => {
                warn!("Finish requested for unknown item {}", id);
                false
            }
        }
    }

    fn kind_and_launch(&self, id: &ItemId) -> Option<(EntryKind, ItemId)> {
        self.shared
            .entries()
            .get(id)
            .map(|entry| (entry.kind, entry.launch.clone()))
    }
}

async fn wait_children<T: Transport>(shared: &Arc<Shared<T>>, id: &ItemId) {
    let label = format!("children of {id}");
    let policy = shared.children_policy;
    wait_for(&label, policy, || shared.children_settled(id)).await;
}

fn settle<T: Transport>(
    shared: &Shared<T>,
    id: &ItemId,
    label: &str,
    result: Result<(), ClientError>,
    done: CompletionSender,
) {
    shared.mark_finish_completed(id);
    match result {
        Ok(()) => done.complete(true),
        Err(err) => {
            error!("{}: {}", label, err);
            done.complete(false);
        }
    }
}
