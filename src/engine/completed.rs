//! Bulk-delete reconciler: sweeps all completed tasks with one remote
//! delete at a time.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::next_action;
use crate::action::{Action, CommandBus};
use crate::service::TaskService;
use crate::store::StoreSnapshot;

pub(crate) struct CompletedReconciler {
    pub(crate) service: Arc<dyn TaskService>,
    pub(crate) store: Arc<dyn StoreSnapshot>,
    pub(crate) bus: CommandBus,
}

impl CompletedReconciler {
    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        let rx = self.bus.subscribe();
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: broadcast::Receiver<Action>) {
        while let Some(action) = next_action(&mut rx).await {
            if matches!(action, Action::DeleteCompleted) {
                self.sweep().await;
            }
        }
    }

    /// Delete every completed task in the current snapshot, strictly
    /// sequentially to bound load on the remote service. Exactly one
    /// completion event is emitted no matter how many individual
    /// deletes fail.
    async fn sweep(&self) {
        let Some(list) = self.store.current_list() else {
            return;
        };
        let tasks = self.store.completed();
        info!("bulk-deleting {} completed tasks", tasks.len());

        for task in tasks {
            let Some(remote) = task.remote else {
                debug!("completed task {} has no remote id yet, skipping", task.id);
                continue;
            };

            // One retry per task; residual failures are swallowed so
            // the sweep always runs to completion.
            let mut attempts = 0;
            loop {
                attempts += 1;
                match self.service.delete(&list, &remote).await {
                    Ok(()) => break,
                    Err(e) if attempts < 2 => {
                        debug!("delete of {} failed, retrying: {}", task.id, e);
                    }
                    Err(e) => {
                        warn!("delete of {} failed twice, giving up: {}", task.id, e);
                        break;
                    }
                }
            }
        }

        self.bus.publish(Action::DeleteCompletedSucceeded);
    }
}
