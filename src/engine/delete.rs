//! Delete reconciler: turns optimistic local deletions into remote
//! delete calls, deferring until the task is remote-known when the
//! creation acknowledgement is still outstanding.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::ledger::CreationLedger;
use super::next_action;
use crate::action::{Action, CommandBus};
use crate::service::TaskService;
use crate::store::StoreSnapshot;
use crate::task::TaskId;

pub(crate) struct DeleteReconciler {
    pub(crate) service: Arc<dyn TaskService>,
    pub(crate) store: Arc<dyn StoreSnapshot>,
    pub(crate) bus: CommandBus,
    pub(crate) ledger: Arc<CreationLedger>,
}

impl DeleteReconciler {
    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        let rx = self.bus.subscribe();
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: broadcast::Receiver<Action>) {
        while let Some(action) = next_action(&mut rx).await {
            if let Action::Delete { id } = action {
                self.reconcile(id);
            }
        }
    }

    /// Resolve the remote identity and delete, on a detached task so
    /// one pending creation never stalls other deletions.
    fn reconcile(&self, id: TaskId) {
        let service = self.service.clone();
        let store = self.store.clone();
        let ledger = self.ledger.clone();

        tokio::spawn(async move {
            let Some(list) = store.current_list() else {
                warn!("no current task list, remote delete of {} dropped", id);
                return;
            };

            // The reducer has already moved the task into the deleted
            // registry; its remote identity may still be pending.
            let record = store.deleted_task(id).or_else(|| store.task(id));
            let remote = match record.and_then(|t| t.remote) {
                Some(remote) => Some(remote),
                None => match ledger.wait_for(id).await {
                    Ok(task) => Some(task.id),
                    // Cancelled: the creation pipeline owns the
                    // compensating cleanup. Failed: nothing was ever
                    // created remotely.
                    Err(e) => {
                        debug!("remote delete of {} skipped: {}", id, e);
                        None
                    }
                },
            };

            if let Some(remote) = remote {
                if let Err(e) = service.delete(&list, &remote).await {
                    warn!("remote delete of {} failed: {}", id, e);
                }
            }
        });
    }
}
