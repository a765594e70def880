//! The reconciliation engine.
//!
//! Reconcilers are independent pipelines multiplexed over the runtime,
//! all subscribed to the same command stream:
//!
//! ```text
//!                ┌──────────────┐
//!   commands ───▶│  CommandBus  │◀─── success events
//!                └──────┬───────┘
//!        ┌──────────┬───┴──────┬──────────┬────────────┐
//!        ▼          ▼          ▼          ▼            ▼
//!    creation    update       move      delete    bulk delete
//!        │          │          │          │            │
//!        └──────────┴────┬─────┴──────────┴────────────┘
//!                        ▼
//!               remote task service
//! ```
//!
//! Each reconciler reads store state through a snapshot accessor and
//! never mutates it; everything it achieves remotely is reported as an
//! event back onto the bus for the store reducer to apply.
//!
//! Causal ordering across pipelines flows through the
//! [`CreationLedger`]: any operation that needs a remote identifier
//! which does not exist yet suspends on the ledger until the creation
//! reconciler settles it.

mod completed;
mod create;
mod delete;
mod ledger;
mod movement;
mod update;

#[cfg(test)]
pub(crate) mod testing;

pub use ledger::{CreationLedger, ResolveError};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::action::{Action, CommandBus};
use crate::service::TaskService;
use crate::store::StoreSnapshot;

/// Tunables for the engine's pipelines.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Quiet period before a burst of edits becomes a patch call.
    pub update_debounce: Duration,

    /// Quiet period before a burst of reorderings becomes a move
    /// call. Longer than the update window since drag interactions
    /// emit positions rapidly.
    pub move_debounce: Duration,

    /// Command stream buffer per subscriber.
    pub bus_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            update_debounce: Duration::from_millis(250),
            move_debounce: Duration::from_millis(500),
            bus_capacity: 256,
        }
    }
}

/// Handle to a running engine.
///
/// Owns the command stream; commands dispatched here fan out to every
/// reconciler. Dropping the handle leaves the pipelines running (they
/// still hold the stream for event emission); call
/// [`shutdown`](Self::shutdown) to stop them.
pub struct EngineHandle {
    bus: CommandBus,
    pipelines: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Publish a command (or event) onto the stream.
    pub fn dispatch(&self, action: Action) {
        self.bus.publish(action);
    }

    /// The underlying command stream.
    pub fn bus(&self) -> &CommandBus {
        &self.bus
    }

    /// Observe all actions, including the events the reconcilers emit.
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.bus.subscribe()
    }

    /// Stop all reconciler pipelines.
    ///
    /// In-flight remote calls on detached compensation paths are left
    /// to finish on the runtime.
    pub fn shutdown(self) {
        for pipeline in &self.pipelines {
            pipeline.abort();
        }
    }
}

/// Compose all reconcilers over a fresh command stream.
///
/// Every reconciler is subscribed before this returns, so no command
/// dispatched through the handle can be missed.
pub fn spawn(
    service: Arc<dyn TaskService>,
    store: Arc<dyn StoreSnapshot>,
    settings: EngineSettings,
) -> EngineHandle {
    let bus = CommandBus::new(settings.bus_capacity);
    let ledger = Arc::new(CreationLedger::new());

    let pipelines = vec![
        create::CreateReconciler {
            service: service.clone(),
            store: store.clone(),
            bus: bus.clone(),
            ledger: ledger.clone(),
        }
        .spawn(),
        update::UpdateReconciler {
            service: service.clone(),
            store: store.clone(),
            bus: bus.clone(),
            ledger: ledger.clone(),
            window: settings.update_debounce,
        }
        .spawn(),
        movement::MoveReconciler {
            service: service.clone(),
            store: store.clone(),
            bus: bus.clone(),
            ledger: ledger.clone(),
            window: settings.move_debounce,
        }
        .spawn(),
        delete::DeleteReconciler {
            service: service.clone(),
            store: store.clone(),
            bus: bus.clone(),
            ledger: ledger.clone(),
        }
        .spawn(),
        completed::CompletedReconciler {
            service,
            store,
            bus: bus.clone(),
        }
        .spawn(),
    ];

    EngineHandle { bus, pipelines }
}

/// Receive the next action from the stream, riding out lag.
///
/// Returns `None` once the stream is closed.
pub(crate) async fn next_action(rx: &mut broadcast::Receiver<Action>) -> Option<Action> {
    loop {
        match rx.recv().await {
            Ok(action) => return Some(action),
            Err(RecvError::Lagged(skipped)) => {
                warn!("command stream lagged, skipped {} actions", skipped);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{MockService, RemoteCall};
    use super::*;
    use crate::store::{spawn_event_applier, InMemoryStore};
    use crate::task::{RemoteId, Task, TaskFields, TaskId, TaskListId};

    fn inbox() -> TaskListId {
        TaskListId::new("inbox")
    }

    struct Harness {
        service: Arc<MockService>,
        store: Arc<InMemoryStore>,
        engine: EngineHandle,
        events: broadcast::Receiver<Action>,
    }

    fn harness(service: MockService) -> Harness {
        let service = Arc::new(service);
        let store = Arc::new(InMemoryStore::new(inbox()));
        let engine = spawn(service.clone(), store.clone(), EngineSettings::default());
        let events = engine.subscribe();
        spawn_event_applier(store.clone(), engine.bus());
        Harness {
            service,
            store,
            engine,
            events,
        }
    }

    impl Harness {
        /// Apply optimistically, then publish, the way a dispatching
        /// UI would.
        fn dispatch(&self, action: Action) {
            self.store.apply(&action);
            self.engine.dispatch(action);
        }

        /// Next success event on the stream, or `None` if none arrives
        /// within a second of virtual time.
        async fn next_event(&mut self) -> Option<Action> {
            tokio::time::timeout(Duration::from_secs(1), async {
                loop {
                    match self.events.recv().await {
                        Ok(action) if action.is_event() => return Some(action),
                        Ok(_) => {}
                        Err(_) => return None,
                    }
                }
            })
            .await
            .ok()
            .flatten()
        }

        /// Seed a task that is already remote-known.
        fn seed_remote(&self, remote: &str, completed: bool) -> TaskId {
            let id = TaskId::new();
            let mut task = Task::new(id, inbox());
            task.remote = Some(RemoteId::new(remote));
            task.completed = completed;
            self.store.insert(task);
            id
        }
    }

    #[tokio::test(start_paused = true)]
    async fn insert_waits_for_the_predecessor_acknowledgement() {
        let mut h = harness(MockService::with_latency(Duration::from_millis(50)));
        let a = TaskId::new();
        let b = TaskId::new();

        h.dispatch(Action::Create {
            id: a,
            predecessor: None,
            list: inbox(),
        });
        h.dispatch(Action::Create {
            id: b,
            predecessor: Some(a),
            list: inbox(),
        });

        let first = h.next_event().await;
        assert!(matches!(first, Some(Action::CreateSucceeded { id, .. }) if id == a));
        let second = h.next_event().await;
        assert!(matches!(second, Some(Action::CreateSucceeded { id, .. }) if id == b));

        let calls = h.service.timed_calls();
        assert_eq!(calls.len(), 2);
        match (&calls[0].1, &calls[1].1) {
            (
                RemoteCall::Insert { previous: first },
                RemoteCall::Insert { previous: second },
            ) => {
                assert_eq!(*first, None);
                assert_eq!(*second, Some(RemoteId::new("r1")));
            }
            other => panic!("unexpected calls: {:?}", other),
        }
        // The dependent insert only went out once the first resolved.
        assert!(calls[1].0 >= calls[0].0 + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_before_acknowledgement_suppresses_and_compensates() {
        let mut h = harness(MockService::with_latency(Duration::from_millis(50)));
        let x = TaskId::new();

        h.dispatch(Action::Create {
            id: x,
            predecessor: None,
            list: inbox(),
        });
        h.dispatch(Action::Delete { id: x });

        // No creation acknowledgement may surface downstream.
        assert_eq!(h.next_event().await, None);

        let calls = h.service.timed_calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0].1, RemoteCall::Insert { .. }));
        assert_eq!(
            calls[1].1,
            RemoteCall::Delete {
                task: RemoteId::new("r1")
            }
        );
        // The compensating delete waited for the insert to land.
        assert!(calls[1].0 >= calls[0].0 + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn edits_within_the_window_coalesce_into_one_patch() {
        let mut h = harness(MockService::new());
        let x = h.seed_remote("r9", false);

        h.dispatch(Action::Update {
            id: x,
            fields: TaskFields::title("a"),
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.dispatch(Action::Update {
            id: x,
            fields: TaskFields::notes("remember"),
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.dispatch(Action::Update {
            id: x,
            fields: TaskFields::title("b"),
        });

        let expected = {
            let mut fields = TaskFields::title("b");
            fields.notes = Some("remember".to_string());
            fields
        };
        assert_eq!(
            h.next_event().await,
            Some(Action::UpdateSucceeded {
                id: x,
                fields: expected.clone()
            })
        );
        assert_eq!(
            h.service.calls(),
            vec![RemoteCall::Patch {
                task: RemoteId::new("r9"),
                fields: expected
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn edits_on_an_unacknowledged_task_wait_for_its_creation() {
        let mut h = harness(MockService::with_latency(Duration::from_millis(500)));
        let x = TaskId::new();

        h.dispatch(Action::Create {
            id: x,
            predecessor: None,
            list: inbox(),
        });
        h.dispatch(Action::Update {
            id: x,
            fields: TaskFields::title("early"),
        });

        let first = h.next_event().await;
        assert!(matches!(first, Some(Action::CreateSucceeded { id, .. }) if id == x));
        let second = h.next_event().await;
        assert!(matches!(second, Some(Action::UpdateSucceeded { id, .. }) if id == x));

        let calls = h.service.timed_calls();
        assert_eq!(calls.len(), 2);
        match &calls[1].1 {
            RemoteCall::Patch { task, .. } => assert_eq!(task, &RemoteId::new("r1")),
            other => panic!("unexpected call: {:?}", other),
        }
        // The patch never raced the insert.
        assert!(calls[1].0 >= calls[0].0 + Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_during_inflight_patch_chains_a_cleanup_delete() {
        let mut h = harness(MockService::with_latency(Duration::from_millis(50)));
        let x = h.seed_remote("r7", false);

        h.dispatch(Action::Update {
            id: x,
            fields: TaskFields::title("typed"),
        });
        // Let the debounce fire so the patch is in flight…
        tokio::time::sleep(Duration::from_millis(260)).await;
        // …then delete while it is.
        h.dispatch(Action::Delete { id: x });

        // The confirmed update is suppressed.
        assert_eq!(h.next_event().await, None);

        let calls = h.service.calls();
        assert!(matches!(calls[0], RemoteCall::Patch { .. }));
        // One immediate delete plus the cleanup chained onto the
        // patch's completion.
        assert_eq!(
            h.service.deletes(),
            vec![RemoteId::new("r7"), RemoteId::new("r7")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn move_anchors_on_the_task_preceding_the_target_index() {
        let mut h = harness(MockService::new());
        let _t0 = h.seed_remote("r1", false);
        let _t1 = h.seed_remote("r2", false);
        let _t2 = h.seed_remote("r3", false);
        let t3 = h.seed_remote("r4", false);

        h.dispatch(Action::Move { id: t3, to: 1 });

        let event = h.next_event().await;
        assert!(matches!(event, Some(Action::MoveSucceeded { id, .. }) if id == t3));

        assert_eq!(
            h.service.calls(),
            vec![RemoteCall::Move {
                task: RemoteId::new("r4"),
                previous: Some(RemoteId::new("r1"))
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_reordering_coalesces_into_the_last_position() {
        let mut h = harness(MockService::new());
        let _t0 = h.seed_remote("r1", false);
        let _t1 = h.seed_remote("r2", false);
        let t2 = h.seed_remote("r3", false);

        // Drag through several positions in one burst.
        h.dispatch(Action::Move { id: t2, to: 1 });
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.dispatch(Action::Move { id: t2, to: 0 });

        let event = h.next_event().await;
        assert!(matches!(event, Some(Action::MoveSucceeded { id, .. }) if id == t2));

        assert_eq!(
            h.service.calls(),
            vec![RemoteCall::Move {
                task: RemoteId::new("r3"),
                previous: None
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delete_of_an_acknowledged_task_deletes_remotely() {
        let mut h = harness(MockService::new());
        let x = h.seed_remote("r2", false);

        h.dispatch(Action::Delete { id: x });

        assert_eq!(h.next_event().await, None);
        assert_eq!(h.service.deletes(), vec![RemoteId::new("r2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_delete_attempts_every_task_and_reports_once() {
        let mut h = harness(MockService::new());
        let _c1 = h.seed_remote("r1", true);
        let _c2 = h.seed_remote("r2", true);
        let _c3 = h.seed_remote("r3", true);
        h.service.fail_deletes(&RemoteId::new("r2"), 2);

        h.dispatch(Action::DeleteCompleted);

        assert_eq!(
            h.next_event().await,
            Some(Action::DeleteCompletedSucceeded)
        );
        assert_eq!(h.next_event().await, None);

        assert_eq!(
            h.service.deletes(),
            vec![
                RemoteId::new("r1"),
                RemoteId::new("r2"),
                RemoteId::new("r2"),
                RemoteId::new("r3")
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_changeset_still_issues_a_patch() {
        let mut h = harness(MockService::new());
        let x = h.seed_remote("r5", false);

        h.dispatch(Action::Update {
            id: x,
            fields: TaskFields::default(),
        });

        assert_eq!(
            h.next_event().await,
            Some(Action::UpdateSucceeded {
                id: x,
                fields: TaskFields::default()
            })
        );
        assert_eq!(
            h.service.calls(),
            vec![RemoteCall::Patch {
                task: RemoteId::new("r5"),
                fields: TaskFields::default()
            }]
        );
    }
}
