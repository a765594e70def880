//! Local task store: the read-only snapshot interface the engine
//! consumes, plus a reference in-memory implementation with the
//! reducer that keeps it current.
//!
//! The engine never mutates the store. Commands are applied
//! optimistically by whoever dispatches them, and `*Succeeded` events
//! flow back through [`spawn_event_applier`]. That single-writer
//! discipline is what keeps the reconcilers race-free against each
//! other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::action::{Action, CommandBus};
use crate::task::{RemoteTask, Task, TaskId, TaskListId};

/// Read-only view of store state, taken at the moment a reconciler
/// processes a command.
pub trait StoreSnapshot: Send + Sync {
    /// Look up a live (non-deleted) task.
    fn task(&self, id: TaskId) -> Option<Task>;

    /// Look up a task in the deleted registry: removed from the live
    /// list, but possibly still awaiting its remote identifier.
    fn deleted_task(&self, id: TaskId) -> Option<Task>;

    /// The task list currently being edited.
    fn current_list(&self) -> Option<TaskListId>;

    /// Non-completed task ids in display order.
    fn ordered_active(&self) -> Vec<TaskId>;

    /// All completed tasks.
    fn completed(&self) -> Vec<Task>;
}

#[derive(Debug, Default)]
struct StoreState {
    tasks: HashMap<TaskId, Task>,
    /// Non-completed tasks in display order.
    active: Vec<TaskId>,
    /// Completed tasks, most recently completed first.
    completed: Vec<TaskId>,
    /// Tasks removed locally, keyed by local id so a late creation
    /// response can still be correlated.
    deleted: HashMap<TaskId, Task>,
}

/// Reference store used by the binary and the engine tests.
pub struct InMemoryStore {
    list: TaskListId,
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new(list: TaskListId) -> Self {
        Self {
            list,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Populate the store from a full list download. Replaces any
    /// existing content.
    pub fn seed(&self, remote: &[RemoteTask]) {
        let mut state = self.state.lock().unwrap();
        *state = StoreState::default();
        for record in remote {
            let task = Task::from_remote(self.list.clone(), record);
            if task.completed {
                state.completed.push(task.id);
            } else {
                state.active.push(task.id);
            }
            state.tasks.insert(task.id, task);
        }
        relink(&mut state);
    }

    /// Insert an already-built task at the end of the appropriate
    /// sequence. Test and seeding convenience.
    pub fn insert(&self, task: Task) {
        let mut state = self.state.lock().unwrap();
        if task.completed {
            state.completed.push(task.id);
        } else {
            state.active.push(task.id);
        }
        state.tasks.insert(task.id, task);
        relink(&mut state);
    }

    /// All live tasks, active first (in order), then completed.
    pub fn tasks_in_order(&self) -> Vec<Task> {
        let state = self.state.lock().unwrap();
        state
            .active
            .iter()
            .chain(state.completed.iter())
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect()
    }

    /// Reduce one action into the state.
    ///
    /// Commands apply optimistically (the local list is always ahead
    /// of the remote service); events confirm or refine what a
    /// reconciler achieved remotely.
    pub fn apply(&self, action: &Action) {
        let mut state = self.state.lock().unwrap();
        match action {
            Action::Create {
                id,
                predecessor,
                list,
            } => {
                let task = Task::new(*id, list.clone());
                let at = predecessor
                    .and_then(|prev| state.active.iter().position(|t| *t == prev))
                    .map(|i| i + 1)
                    .unwrap_or(0);
                state.active.insert(at, *id);
                state.tasks.insert(*id, task);
                relink(&mut state);
            }
            Action::Update { id, fields } | Action::UpdateSucceeded { id, fields } => {
                let Some(task) = state.tasks.get_mut(id) else {
                    return;
                };
                let was_completed = task.completed;
                task.apply(fields);
                let now_completed = task.completed;
                if was_completed != now_completed {
                    if now_completed {
                        state.active.retain(|t| t != id);
                        state.completed.insert(0, *id);
                    } else {
                        state.completed.retain(|t| t != id);
                        state.active.push(*id);
                    }
                    relink(&mut state);
                }
            }
            Action::Delete { id } => {
                state.active.retain(|t| t != id);
                state.completed.retain(|t| t != id);
                if let Some(task) = state.tasks.remove(id) {
                    state.deleted.insert(*id, task);
                }
                relink(&mut state);
            }
            Action::Move { id, to } => {
                let Some(from) = state.active.iter().position(|t| t == id) else {
                    return;
                };
                state.active.remove(from);
                let at = (*to).min(state.active.len());
                state.active.insert(at, *id);
                relink(&mut state);
            }
            // Completed tasks stay in the store until the bulk delete
            // reports completion; the reconciler reads them from the
            // snapshot.
            Action::DeleteCompleted => {}
            Action::CreateSucceeded { id, task } => {
                if let Some(local) = state.tasks.get_mut(id) {
                    local.remote = Some(task.id.clone());
                } else if let Some(local) = state.deleted.get_mut(id) {
                    local.remote = Some(task.id.clone());
                }
            }
            Action::MoveSucceeded { .. } => {}
            Action::DeleteCompletedSucceeded => {
                let done = std::mem::take(&mut state.completed);
                for id in done {
                    state.tasks.remove(&id);
                }
            }
        }
    }
}

/// Rewrite predecessor links to match the active sequence.
fn relink(state: &mut StoreState) {
    let order = state.active.clone();
    let mut prev = None;
    for id in order {
        if let Some(task) = state.tasks.get_mut(&id) {
            task.predecessor = prev;
        }
        prev = Some(id);
    }
}

impl StoreSnapshot for InMemoryStore {
    fn task(&self, id: TaskId) -> Option<Task> {
        self.state.lock().unwrap().tasks.get(&id).cloned()
    }

    fn deleted_task(&self, id: TaskId) -> Option<Task> {
        self.state.lock().unwrap().deleted.get(&id).cloned()
    }

    fn current_list(&self) -> Option<TaskListId> {
        Some(self.list.clone())
    }

    fn ordered_active(&self) -> Vec<TaskId> {
        self.state.lock().unwrap().active.clone()
    }

    fn completed(&self) -> Vec<Task> {
        let state = self.state.lock().unwrap();
        state
            .completed
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect()
    }
}

/// Feed `*Succeeded` events from the bus back into the store.
///
/// Commands are expected to have been applied at dispatch time, so
/// only events are reduced here.
pub fn spawn_event_applier(
    store: Arc<InMemoryStore>,
    bus: &CommandBus,
) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(action) if action.is_event() => store.apply(&action),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("store applier lagged, skipped {} actions", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
