//! Creation reconciler: resolves remote identity for locally-created
//! tasks, handling deletion racing ahead of the acknowledgement.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, warn};

use super::ledger::{CreationLedger, ResolveError};
use super::next_action;
use crate::action::{Action, CommandBus};
use crate::service::{ServiceError, TaskService};
use crate::store::StoreSnapshot;
use crate::task::{TaskId, TaskListId};

/// Why the creation chain produced no remote record.
#[derive(Debug, Clone)]
enum CreateFailure {
    /// The predecessor's creation never resolved.
    Resolve(ResolveError),
    /// The insert call itself failed.
    Service(ServiceError),
}

pub(crate) struct CreateReconciler {
    pub(crate) service: Arc<dyn TaskService>,
    pub(crate) store: Arc<dyn StoreSnapshot>,
    pub(crate) bus: CommandBus,
    pub(crate) ledger: Arc<CreationLedger>,
}

impl CreateReconciler {
    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        let rx = self.bus.subscribe();
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: broadcast::Receiver<Action>) {
        // Cancellation signals for creations still awaiting their
        // acknowledgement. Routed from the reconciler's own ordered
        // stream so a delete can never be observed ahead of the create
        // it cancels.
        let mut cancels: HashMap<TaskId, oneshot::Sender<()>> = HashMap::new();

        while let Some(action) = next_action(&mut rx).await {
            match action {
                Action::Create {
                    id,
                    predecessor,
                    list,
                } => {
                    let (cancel_tx, cancel_rx) = oneshot::channel();
                    cancels.insert(id, cancel_tx);
                    self.reconcile(id, predecessor, list, cancel_rx);
                }
                Action::Delete { id } => {
                    if let Some(cancel) = cancels.remove(&id) {
                        let _ = cancel.send(());
                    }
                }
                Action::CreateSucceeded { id, .. } => {
                    cancels.remove(&id);
                }
                _ => {}
            }
        }
    }

    /// Drive one creation to its outcome on a detached task.
    fn reconcile(
        &self,
        id: TaskId,
        predecessor: Option<TaskId>,
        list: TaskListId,
        mut cancel: oneshot::Receiver<()>,
    ) {
        let service = self.service.clone();
        let store = self.store.clone();
        let bus = self.bus.clone();
        let ledger = self.ledger.clone();

        tokio::spawn(async move {
            // The chain resolves the predecessor's remote id, then
            // inserts. Shared, single-value-replay: the cancellation
            // path can still observe the insert result after the
            // success path has been abandoned.
            let chain = {
                let service = service.clone();
                let ledger = ledger.clone();
                let list = list.clone();
                async move {
                    let previous = match predecessor {
                        None => None,
                        // Predecessor gone from the store entirely:
                        // insert unanchored, at head position.
                        Some(prev) => match store.task(prev) {
                            None => None,
                            Some(task) => match task.remote {
                                Some(remote) => Some(remote),
                                None => Some(
                                    ledger
                                        .wait_for(prev)
                                        .await
                                        .map_err(CreateFailure::Resolve)?
                                        .id,
                                ),
                            },
                        },
                    };
                    service
                        .insert(&list, previous.as_ref())
                        .await
                        .map_err(CreateFailure::Service)
                }
            }
            .boxed()
            .shared();

            let outcome = tokio::select! {
                // A delete observed first always wins over a completed
                // insert, so a cancelled creation never leaks a
                // success event.
                biased;
                fired = &mut cancel => match fired {
                    Ok(()) => {
                        ledger.cancel(id).await;
                        debug!("creation of {} cancelled, awaiting in-flight insert", id);
                        tokio::spawn(async move {
                            if let Ok(task) = chain.await {
                                if let Err(e) = service.delete(&list, &task.id).await {
                                    warn!("compensating delete for {} failed: {}", id, e);
                                }
                            }
                        });
                        return;
                    }
                    // The reconciler went away without cancelling;
                    // drive the chain to its outcome regardless.
                    Err(_) => chain.await,
                },
                outcome = chain.clone() => outcome,
            };

            match outcome {
                Ok(task) => {
                    ledger.fulfill(id, task.clone()).await;
                    bus.publish(Action::CreateSucceeded { id, task });
                }
                Err(CreateFailure::Resolve(e)) => {
                    warn!("creation of {} abandoned, predecessor unresolved: {}", id, e);
                    ledger
                        .fail(id, format!("predecessor unresolved: {}", e))
                        .await;
                }
                Err(CreateFailure::Service(e)) => {
                    error!("insert for {} failed: {}", id, e);
                    ledger.fail(id, e.to_string()).await;
                }
            }
        });
    }
}
