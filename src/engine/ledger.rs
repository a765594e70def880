//! Registry of creation outcomes, used for cross-task causal waiting.
//!
//! Any pipeline that needs a task's remote identifier before the
//! creation acknowledgement has arrived registers here and suspends.
//! Each slot is fulfilled exactly once (with the remote record, a
//! terminal failure, or a cancellation) and the outcome replays to
//! waiters that register afterwards.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

use crate::task::{RemoteTask, TaskId};

/// Why a creation never produced a remote identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The task was deleted before its creation was acknowledged; the
    /// creation pipeline owns the compensating cleanup.
    #[error("creation cancelled before a remote id was assigned")]
    Cancelled,

    /// The insert call failed terminally; there is no remote identity
    /// and never will be.
    #[error("creation failed: {0}")]
    Failed(String),
}

type Outcome = Result<RemoteTask, ResolveError>;

enum Slot {
    Pending(Vec<oneshot::Sender<Outcome>>),
    Done(Outcome),
}

/// Shared ledger mapping local task ids to their creation outcome.
pub struct CreationLedger {
    slots: Mutex<HashMap<TaskId, Slot>>,
}

impl CreationLedger {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for the creation outcome of `id`.
    ///
    /// Resolves immediately if the outcome is already known; otherwise
    /// suspends until [`fulfill`](Self::fulfill),
    /// [`fail`](Self::fail), or [`cancel`](Self::cancel) is called for
    /// the same id.
    pub async fn wait_for(&self, id: TaskId) -> Outcome {
        let rx = {
            let mut slots = self.slots.lock().await;
            match slots.entry(id).or_insert_with(|| Slot::Pending(Vec::new())) {
                Slot::Done(outcome) => return outcome.clone(),
                Slot::Pending(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
            }
        };
        // A dropped sender means the engine shut down mid-wait; treat
        // it like a cancellation.
        rx.await.unwrap_or(Err(ResolveError::Cancelled))
    }

    /// Record a successful creation.
    pub async fn fulfill(&self, id: TaskId, task: RemoteTask) {
        self.settle(id, Ok(task)).await;
    }

    /// Record a terminal creation failure.
    pub async fn fail(&self, id: TaskId, reason: impl Into<String>) {
        self.settle(id, Err(ResolveError::Failed(reason.into()))).await;
    }

    /// Record a cancellation (delete observed before acknowledgement).
    pub async fn cancel(&self, id: TaskId) {
        self.settle(id, Err(ResolveError::Cancelled)).await;
    }

    /// Settle a slot. The first outcome wins; later settlements for
    /// the same id are ignored.
    async fn settle(&self, id: TaskId, outcome: Outcome) {
        let waiters = {
            let mut slots = self.slots.lock().await;
            match slots.insert(id, Slot::Done(outcome.clone())) {
                Some(Slot::Pending(waiters)) => waiters,
                Some(done @ Slot::Done(_)) => {
                    // Already settled: restore the original outcome.
                    slots.insert(id, done);
                    return;
                }
                None => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Default for CreationLedger {
    fn default() -> Self {
        Self::new()
    }
}
