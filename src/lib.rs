//! # tasksync
//!
//! Background reconciliation engine for optimistic task lists.
//!
//! A UI edits a local task list instantly; this crate's engine turns
//! those edits into calls against an authoritative remote task
//! service, in an order that respects causal dependencies: a task is
//! never patched, moved, or deleted remotely before its creation has
//! been acknowledged and assigned a remote identifier.
//!
//! ## Data Flow
//!
//! ```text
//!   UI ──commands──▶ CommandBus ──▶ reconcilers ──▶ remote service
//!                        ▲               │
//!                        └───success─────┘
//!                            events
//!                        (store reducer applies them)
//! ```
//!
//! The local store stays optimistically ahead of the remote service;
//! silently swallowed patch/delete failures can leave the two
//! divergent until the next full list reload. That trade-off is
//! deliberate.
//!
//! ## Modules
//! - `action`: the command stream and its typed actions
//! - `engine`: the reconciler pipelines and their combinator
//! - `service`: remote task service client (trait + HTTP impl)
//! - `store`: read-only snapshot interface plus a reference store
//! - `task`: identifiers, the task model, and field changesets

pub mod action;
pub mod config;
pub mod engine;
pub mod service;
pub mod store;
pub mod task;

pub use action::{Action, CommandBus};
pub use config::Config;
pub use engine::{EngineHandle, EngineSettings};
pub use service::{HttpTaskService, ServiceError, TaskService};
pub use store::{InMemoryStore, StoreSnapshot};
pub use task::{RemoteId, RemoteTask, Task, TaskFields, TaskId, TaskListId};
