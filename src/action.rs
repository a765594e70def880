//! The command stream: typed commands issued against the local task
//! list and the success events the reconcilers emit back onto the same
//! stream.
//!
//! Every subscriber observes the full sequence in publish order. The
//! reconcilers, the store reducer, and any UI all hang off the same
//! bus, which is what lets a reconciler react to another reconciler's
//! output (e.g. an update waiting on a creation acknowledgement).

use tokio::sync::broadcast;

use crate::task::{RemoteTask, TaskFields, TaskId, TaskListId};

/// A command or event on the stream.
///
/// Commands describe what the user did to the local list; `*Succeeded`
/// events describe what the remote service has acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A task was created locally. `predecessor` anchors it in list
    /// order; `None` means head position.
    Create {
        id: TaskId,
        predecessor: Option<TaskId>,
        list: TaskListId,
    },

    /// A task's mutable fields were edited locally.
    Update { id: TaskId, fields: TaskFields },

    /// A task was removed from the local list.
    Delete { id: TaskId },

    /// A task was dragged to `to` within the non-completed sequence.
    Move { id: TaskId, to: usize },

    /// All completed tasks should be deleted remotely.
    DeleteCompleted,

    /// The remote service acknowledged a creation and assigned a
    /// remote identifier.
    CreateSucceeded { id: TaskId, task: RemoteTask },

    /// The remote service acknowledged a patch; `fields` is the
    /// coalesced changeset that was confirmed.
    UpdateSucceeded { id: TaskId, fields: TaskFields },

    /// The remote service acknowledged a move.
    MoveSucceeded { id: TaskId, task: RemoteTask },

    /// The bulk delete of completed tasks finished (individual
    /// failures included).
    DeleteCompletedSucceeded,
}

impl Action {
    /// True for `*Succeeded` events, false for commands.
    pub fn is_event(&self) -> bool {
        matches!(
            self,
            Action::CreateSucceeded { .. }
                | Action::UpdateSucceeded { .. }
                | Action::MoveSucceeded { .. }
                | Action::DeleteCompletedSucceeded
        )
    }
}

/// Multicast channel carrying [`Action`]s to all subscribers.
#[derive(Clone)]
pub struct CommandBus {
    tx: broadcast::Sender<Action>,
}

impl CommandBus {
    /// Create a bus able to buffer `capacity` actions per lagging
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an action to all current subscribers.
    ///
    /// No subscribers is fine; the action is dropped silently.
    pub fn publish(&self, action: Action) {
        let _ = self.tx.send(action);
    }

    /// Subscribe to all actions published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.tx.subscribe()
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_and_commands_are_distinguished() {
        let id = TaskId::new();
        assert!(!Action::Delete { id }.is_event());
        assert!(!Action::DeleteCompleted.is_event());
        assert!(Action::DeleteCompletedSucceeded.is_event());
        assert!(Action::UpdateSucceeded {
            id,
            fields: TaskFields::default()
        }
        .is_event());
    }

    #[tokio::test]
    async fn all_subscribers_observe_the_same_sequence() {
        let bus = CommandBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let id = TaskId::new();
        bus.publish(Action::Delete { id });
        bus.publish(Action::DeleteCompleted);

        for rx in [&mut a, &mut b] {
            assert!(matches!(rx.recv().await.unwrap(), Action::Delete { .. }));
            assert!(matches!(rx.recv().await.unwrap(), Action::DeleteCompleted));
        }
    }
}
