//! Recording task service used by the engine tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::service::{ServiceError, TaskService};
use crate::task::{RemoteId, RemoteStatus, RemoteTask, TaskFields, TaskListId};

/// One remote call as the mock observed it at dispatch time.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RemoteCall {
    Insert {
        previous: Option<RemoteId>,
    },
    Patch {
        task: RemoteId,
        fields: TaskFields,
    },
    Delete {
        task: RemoteId,
    },
    Move {
        task: RemoteId,
        previous: Option<RemoteId>,
    },
    List,
}

#[derive(Default)]
struct MockState {
    calls: Vec<(Instant, RemoteCall)>,
    insert_seq: u32,
    /// Remaining scripted failures per remote id.
    delete_failures: HashMap<String, u32>,
}

/// Scriptable [`TaskService`] that records every call with its virtual
/// dispatch time.
pub(crate) struct MockService {
    latency: Duration,
    state: Mutex<MockState>,
}

impl MockService {
    pub(crate) fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every call takes `latency` of virtual time to complete.
    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Make the next `times` deletes of `remote` fail with a server
    /// error.
    pub(crate) fn fail_deletes(&self, remote: &RemoteId, times: u32) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(remote.as_str().to_string(), times);
    }

    pub(crate) fn calls(&self) -> Vec<RemoteCall> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub(crate) fn timed_calls(&self) -> Vec<(Instant, RemoteCall)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn deletes(&self) -> Vec<RemoteId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::Delete { task } => Some(task),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RemoteCall) {
        self.state.lock().unwrap().calls.push((Instant::now(), call));
    }
}

fn record_task(id: RemoteId) -> RemoteTask {
    RemoteTask {
        id,
        title: String::new(),
        notes: None,
        status: RemoteStatus::NeedsAction,
        updated: None,
        position: None,
    }
}

#[async_trait]
impl TaskService for MockService {
    async fn insert(
        &self,
        _list: &TaskListId,
        previous: Option<&RemoteId>,
    ) -> Result<RemoteTask, ServiceError> {
        let id = {
            let mut state = self.state.lock().unwrap();
            state.insert_seq += 1;
            let id = RemoteId::new(format!("r{}", state.insert_seq));
            state.calls.push((
                Instant::now(),
                RemoteCall::Insert {
                    previous: previous.cloned(),
                },
            ));
            id
        };
        tokio::time::sleep(self.latency).await;
        Ok(record_task(id))
    }

    async fn patch(
        &self,
        _list: &TaskListId,
        task: &RemoteId,
        fields: &TaskFields,
    ) -> Result<RemoteTask, ServiceError> {
        self.record(RemoteCall::Patch {
            task: task.clone(),
            fields: fields.clone(),
        });
        tokio::time::sleep(self.latency).await;
        let mut record = record_task(task.clone());
        if let Some(title) = &fields.title {
            record.title = title.clone();
        }
        if fields.completed == Some(true) {
            record.status = RemoteStatus::Completed;
        }
        Ok(record)
    }

    async fn delete(&self, _list: &TaskListId, task: &RemoteId) -> Result<(), ServiceError> {
        self.record(RemoteCall::Delete { task: task.clone() });
        tokio::time::sleep(self.latency).await;
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.delete_failures.get_mut(task.as_str()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ServiceError::server_error(
                    503,
                    "scripted failure".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn move_task(
        &self,
        _list: &TaskListId,
        task: &RemoteId,
        previous: Option<&RemoteId>,
    ) -> Result<RemoteTask, ServiceError> {
        self.record(RemoteCall::Move {
            task: task.clone(),
            previous: previous.cloned(),
        });
        tokio::time::sleep(self.latency).await;
        Ok(record_task(task.clone()))
    }

    async fn list(&self, _list: &TaskListId) -> Result<Vec<RemoteTask>, ServiceError> {
        self.record(RemoteCall::List);
        Ok(Vec::new())
    }
}
