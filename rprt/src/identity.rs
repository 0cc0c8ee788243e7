//! Stable node identities.
//!
//! Runner ids are strings chosen by the runner. The reporter maps each one to
//! a compact [`NodeId`] the first time it is seen and uses that as the key of
//! every registry table afterwards.

use rprt_common::RunnerId;
use std::collections::HashMap;

/// Identity of a suite, test or hook node within one reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct IdentityTable {
    ids: HashMap<RunnerId, NodeId>,
    next: u64,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of `runner_id`, assigned on first sight.
    pub fn identity_of(&mut self, runner_id: &RunnerId) -> NodeId {
        if let Some(id) = self.ids.get(runner_id) {
            return *id;
        }
        let id = NodeId(self.next);
        self.next += 1;
        self.ids.insert(runner_id.clone(), id);
        id
    }

    /// Identity of an already-seen runner id.
    pub fn get(&self, runner_id: &RunnerId) -> Option<NodeId> {
        self.ids.get(runner_id).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
