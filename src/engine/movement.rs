//! Move reconciler: debounces per-task reordering into anchor-based
//! move calls.
//!
//! There is deliberately no delete-cancellation path here: if the
//! moved task disappears before its remote identity resolves, the move
//! is silently skipped rather than compensated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::ledger::CreationLedger;
use super::next_action;
use crate::action::{Action, CommandBus};
use crate::service::TaskService;
use crate::store::StoreSnapshot;
use crate::task::{RemoteId, TaskId};

pub(crate) struct MoveReconciler {
    pub(crate) service: Arc<dyn TaskService>,
    pub(crate) store: Arc<dyn StoreSnapshot>,
    pub(crate) bus: CommandBus,
    pub(crate) ledger: Arc<CreationLedger>,
    pub(crate) window: Duration,
}

impl MoveReconciler {
    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        let rx = self.bus.subscribe();
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: broadcast::Receiver<Action>) {
        let mut workers: HashMap<TaskId, mpsc::UnboundedSender<usize>> = HashMap::new();

        while let Some(action) = next_action(&mut rx).await {
            if let Action::Move { id, to } = action {
                let worker = workers.entry(id).or_insert_with(|| {
                    Worker {
                        service: self.service.clone(),
                        store: self.store.clone(),
                        bus: self.bus.clone(),
                        ledger: self.ledger.clone(),
                        window: self.window,
                        id,
                    }
                    .spawn()
                });
                let _ = worker.send(to);
            }
        }
    }
}

/// Per-task sub-pipeline; the pending slot holds only the latest
/// target index of a drag burst.
struct Worker {
    service: Arc<dyn TaskService>,
    store: Arc<dyn StoreSnapshot>,
    bus: CommandBus,
    ledger: Arc<CreationLedger>,
    window: Duration,
    id: TaskId,
}

impl Worker {
    fn spawn(self) -> mpsc::UnboundedSender<usize> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        tx
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<usize>) {
        loop {
            let Some(mut target) = rx.recv().await else { return };

            // Debounce, last position wins.
            loop {
                tokio::select! {
                    pos = rx.recv() => match pos {
                        None => return,
                        Some(pos) => target = pos,
                    },
                    _ = tokio::time::sleep(self.window) => break,
                }
            }

            let Some(list) = self.store.current_list() else {
                continue;
            };

            // The store has already applied the reorder, so the moved
            // task sits at the target index and its anchor is the task
            // just before it.
            let order = self.store.ordered_active();
            let Some(moved_local) = order.get(target).copied() else {
                debug!("move of {} skipped, nothing at index {}", self.id, target);
                continue;
            };
            let previous_local = if target == 0 {
                None
            } else {
                order.get(target - 1).copied()
            };

            // Both positions resolve concurrently; the move fires only
            // once both have settled.
            let (previous, moved) = tokio::join!(
                self.resolve(previous_local),
                self.resolve(Some(moved_local))
            );

            let Some(previous) = previous else {
                debug!("move of {} skipped, anchor never resolved", moved_local);
                continue;
            };
            let Some(Some(remote)) = moved else {
                // Deleted before its creation was acknowledged.
                debug!("move of {} skipped, no remote id", moved_local);
                continue;
            };

            match self
                .service
                .move_task(&list, &remote, previous.as_ref())
                .await
            {
                Ok(task) => self.bus.publish(Action::MoveSucceeded {
                    id: moved_local,
                    task,
                }),
                Err(e) => warn!("move of {} failed: {}", moved_local, e),
            }
        }
    }

    /// Resolve a position to its remote identifier.
    ///
    /// Outer `None`: the task exists but its remote identity never
    /// resolved. Inner `None`: no task at that position (head anchor).
    async fn resolve(&self, id: Option<TaskId>) -> Option<Option<RemoteId>> {
        let Some(id) = id else { return Some(None) };
        match self.store.task(id) {
            None => Some(None),
            Some(task) => match task.remote {
                Some(remote) => Some(Some(remote)),
                None => match self.ledger.wait_for(id).await {
                    Ok(task) => Some(Some(task.id)),
                    Err(_) => None,
                },
            },
        }
    }
}
