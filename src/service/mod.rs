//! Remote task service client.
//!
//! This module provides a trait-based abstraction over the
//! authoritative task store, with an HTTP implementation as the
//! production transport. Every call is a single network round trip;
//! the reconciliation engine owns all sequencing, retry, and
//! compensation policy, so implementations should not retry on their
//! own.

mod error;
mod http;

pub use error::{classify_http_status, ServiceError, ServiceErrorKind};
pub use http::HttpTaskService;

use async_trait::async_trait;

use crate::task::{RemoteId, RemoteTask, TaskFields, TaskListId};

/// Client for the authoritative remote task store.
///
/// `previous` is the anchor of the service's insertion scheme: the
/// remote identifier of the task that should come immediately before
/// the affected one, or `None` for head position.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Create a task positioned after `previous`.
    async fn insert(
        &self,
        list: &TaskListId,
        previous: Option<&RemoteId>,
    ) -> Result<RemoteTask, ServiceError>;

    /// Patch a task's mutable fields. Only the fields present in
    /// `fields` are touched.
    async fn patch(
        &self,
        list: &TaskListId,
        task: &RemoteId,
        fields: &TaskFields,
    ) -> Result<RemoteTask, ServiceError>;

    /// Delete a task.
    async fn delete(&self, list: &TaskListId, task: &RemoteId) -> Result<(), ServiceError>;

    /// Reposition a task after `previous`.
    async fn move_task(
        &self,
        list: &TaskListId,
        task: &RemoteId,
        previous: Option<&RemoteId>,
    ) -> Result<RemoteTask, ServiceError>;

    /// Fetch the full task list.
    async fn list(&self, list: &TaskListId) -> Result<Vec<RemoteTask>, ServiceError>;
}
