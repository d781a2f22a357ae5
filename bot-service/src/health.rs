use autoreply_core::ItemKind;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// One dispatcher: an account watching one kind of item in one subreddit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId {
    pub account: String,
    pub subreddit: String,
    pub kind: ItemKind,
}

impl WorkerId {
    pub fn new(account: &str, subreddit: &str, kind: ItemKind) -> Self {
        Self {
            account: account.to_string(),
            subreddit: subreddit.to_string(),
            kind,
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u/{} r/{} {}", self.account, self.subreddit, self.kind.plural())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerState {
    Starting,
    Running,
    Restarting { attempt: u32 },
    Failed { reason: String },
    Stopped,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Failed { .. } | WorkerState::Stopped)
    }
}

/// Shared view of every worker's current state.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    workers: Arc<RwLock<HashMap<WorkerId, WorkerState>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: &WorkerId, state: WorkerState) {
        let mut workers = self.workers.write().unwrap_or_else(|e| e.into_inner());
        workers.insert(id.clone(), state);
    }

    pub fn get(&self, id: &WorkerId) -> Option<WorkerState> {
        self.workers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn snapshot(&self) -> HashMap<WorkerId, WorkerState> {
        self.workers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count_where(&self, predicate: impl Fn(&WorkerState) -> bool) -> usize {
        self.workers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|state| predicate(state))
            .count()
    }
}
