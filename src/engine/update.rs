//! Update reconciler: groups edits by task and debounces each task's
//! burst into a single coalesced patch call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::ledger::CreationLedger;
use super::next_action;
use crate::action::{Action, CommandBus};
use crate::service::TaskService;
use crate::store::StoreSnapshot;
use crate::task::{RemoteId, TaskFields, TaskId, TaskListId};

enum WorkerMsg {
    Edit(TaskFields),
    Cancel,
}

/// What the in-flight call phase decided.
enum CallOutcome {
    /// Call settled; edits that arrived meanwhile open the next cycle.
    Continue(Option<TaskFields>),
    /// The worker is done (cancelled or stream closed).
    Stop,
}

pub(crate) struct UpdateReconciler {
    pub(crate) service: Arc<dyn TaskService>,
    pub(crate) store: Arc<dyn StoreSnapshot>,
    pub(crate) bus: CommandBus,
    pub(crate) ledger: Arc<CreationLedger>,
    pub(crate) window: Duration,
}

impl UpdateReconciler {
    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        let rx = self.bus.subscribe();
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: broadcast::Receiver<Action>) {
        // One supervisor per task id keeps each task's edits strictly
        // ordered while tasks proceed independently of each other.
        let mut workers: HashMap<TaskId, mpsc::UnboundedSender<WorkerMsg>> = HashMap::new();
        let mut retired: HashSet<TaskId> = HashSet::new();

        while let Some(action) = next_action(&mut rx).await {
            match action {
                Action::Update { id, fields } => {
                    if retired.contains(&id) {
                        debug!("dropping edit for deleted task {}", id);
                        continue;
                    }
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
                    let _ = worker.send(WorkerMsg::Edit(fields));
                }
                Action::Delete { id } => {
                    if let Some(worker) = workers.remove(&id) {
                        let _ = worker.send(WorkerMsg::Cancel);
                    }
                    retired.insert(id);
                }
                _ => {}
            }
        }
    }
}

/// Per-task sub-pipeline.
struct Worker {
    service: Arc<dyn TaskService>,
    store: Arc<dyn StoreSnapshot>,
    bus: CommandBus,
    ledger: Arc<CreationLedger>,
    window: Duration,
    id: TaskId,
}

impl Worker {
    fn spawn(self) -> mpsc::UnboundedSender<WorkerMsg> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        tx
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<WorkerMsg>) {
        let mut carry: Option<TaskFields> = None;
        loop {
            let mut pending = match carry.take() {
                Some(fields) => fields,
                None => match rx.recv().await {
                    None | Some(WorkerMsg::Cancel) => return,
                    Some(WorkerMsg::Edit(fields)) => fields,
                },
            };

            // Debounce: each further edit folds in and restarts the
            // quiet window.
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        None | Some(WorkerMsg::Cancel) => return,
                        Some(WorkerMsg::Edit(fields)) => pending.merge(fields),
                    },
                    _ = tokio::time::sleep(self.window) => break,
                }
            }

            let Some(list) = self.store.current_list() else {
                debug!("no current task list, dropping edit burst for {}", self.id);
                continue;
            };

            // Resolve the remote identity, suspending on the ledger if
            // the creation acknowledgement hasn't arrived yet.
            let remote = match self.store.task(self.id).and_then(|t| t.remote) {
                Some(remote) => remote,
                None => match self.ledger.wait_for(self.id).await {
                    Ok(task) => task.id,
                    Err(e) => {
                        debug!("edit burst for {} abandoned: {}", self.id, e);
                        continue;
                    }
                },
            };

            match self.call(&mut rx, &list, &remote, pending).await {
                CallOutcome::Continue(stash) => carry = stash,
                CallOutcome::Stop => return,
            }
        }
    }

    /// Issue the patch, watching for a cancelling delete while it is
    /// in flight. A new debounce cycle starts only after the call's
    /// outcome has been observed; edits arriving meanwhile are stashed
    /// for that next cycle.
    async fn call(
        &self,
        rx: &mut mpsc::UnboundedReceiver<WorkerMsg>,
        list: &TaskListId,
        remote: &RemoteId,
        fields: TaskFields,
    ) -> CallOutcome {
        let call = {
            let service = self.service.clone();
            let list = list.clone();
            let remote = remote.clone();
            let payload = fields.clone();
            async move { service.patch(&list, &remote, &payload).await }
        }
        .boxed()
        .shared();

        let mut stash: Option<TaskFields> = None;
        loop {
            tokio::select! {
                // A queued delete must win over a completed patch so
                // no success event slips out after the cancellation.
                biased;
                msg = rx.recv() => match msg {
                    Some(WorkerMsg::Edit(fields)) => match &mut stash {
                        Some(stashed) => stashed.merge(fields),
                        None => stash = Some(fields),
                    },
                    Some(WorkerMsg::Cancel) => {
                        // The patch may recreate the task server-side,
                        // so cleanup is chained onto its completion
                        // even though the task is already gone locally.
                        let service = self.service.clone();
                        let list = list.clone();
                        let id = self.id;
                        tokio::spawn(async move {
                            if let Ok(task) = call.await {
                                if let Err(e) = service.delete(&list, &task.id).await {
                                    warn!("compensating delete for {} failed: {}", id, e);
                                }
                            }
                        });
                        return CallOutcome::Stop;
                    }
                    None => return CallOutcome::Stop,
                },
                outcome = call.clone() => {
                    match outcome {
                        Ok(_) => self.bus.publish(Action::UpdateSucceeded {
                            id: self.id,
                            fields,
                        }),
                        Err(e) => debug!("patch for {} swallowed: {}", self.id, e),
                    }
                    return CallOutcome::Continue(stash);
                }
            }
        }
    }
}
