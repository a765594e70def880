//! tasksync - Interactive Entry Point
//!
//! Wires the HTTP client, the reference store, and the engine, then
//! drives them from line commands on stdin.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tasksync::action::Action;
use tasksync::config::Config;
use tasksync::engine::{self, EngineHandle};
use tasksync::service::{HttpTaskService, TaskService};
use tasksync::store::{spawn_event_applier, InMemoryStore, StoreSnapshot};
use tasksync::task::{TaskFields, TaskId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tasksync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;
    info!("Syncing task list {}", config.list);

    let service: Arc<dyn TaskService> = Arc::new(HttpTaskService::new(
        config.base_url.clone(),
        config.token.clone(),
    ));
    let store = Arc::new(InMemoryStore::new(config.list.clone()));

    let remote = service
        .list(&config.list)
        .await
        .context("fetching task list")?;
    info!("Loaded {} tasks", remote.len());
    store.seed(&remote);

    let engine = engine::spawn(service, store.clone(), config.engine_settings());
    spawn_event_applier(store.clone(), engine.bus());

    println!(
        "commands: add <title> | edit <n> <title> | done <n> | move <n> <to> | del <n> | clear | show | quit"
    );
    print_tasks(&store);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (cmd, rest) = match line.split_once(' ') {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (line, ""),
        };
        match cmd {
            "" => {}
            "quit" | "q" => break,
            "show" => print_tasks(&store),
            "add" => {
                let id = TaskId::new();
                let predecessor = store.ordered_active().last().copied();
                dispatch(
                    &store,
                    &engine,
                    Action::Create {
                        id,
                        predecessor,
                        list: config.list.clone(),
                    },
                );
                if !rest.is_empty() {
                    dispatch(
                        &store,
                        &engine,
                        Action::Update {
                            id,
                            fields: TaskFields::title(rest),
                        },
                    );
                }
            }
            "edit" => match rest.split_once(' ') {
                Some((index, title)) if !title.trim().is_empty() => {
                    match nth_active(&store, index) {
                        Some(id) => dispatch(
                            &store,
                            &engine,
                            Action::Update {
                                id,
                                fields: TaskFields::title(title.trim()),
                            },
                        ),
                        None => println!("no task at index {}", index),
                    }
                }
                _ => println!("usage: edit <n> <title>"),
            },
            "done" => match nth_active(&store, rest) {
                Some(id) => dispatch(
                    &store,
                    &engine,
                    Action::Update {
                        id,
                        fields: TaskFields::completed(true),
                    },
                ),
                None => println!("no task at index {}", rest),
            },
            "move" => match rest.split_once(' ') {
                Some((index, to)) => match (nth_active(&store, index), to.trim().parse::<usize>())
                {
                    (Some(id), Ok(to)) => dispatch(&store, &engine, Action::Move { id, to }),
                    _ => println!("usage: move <n> <to>"),
                },
                None => println!("usage: move <n> <to>"),
            },
            "del" => match nth_active(&store, rest) {
                Some(id) => dispatch(&store, &engine, Action::Delete { id }),
                None => println!("no task at index {}", rest),
            },
            "clear" => dispatch(&store, &engine, Action::DeleteCompleted),
            other => println!("unknown command: {}", other),
        }
    }

    engine.shutdown();
    Ok(())
}

/// Apply optimistically, then hand the command to the engine.
fn dispatch(store: &InMemoryStore, engine: &EngineHandle, action: Action) {
    store.apply(&action);
    engine.dispatch(action);
}

fn nth_active(store: &InMemoryStore, raw: &str) -> Option<TaskId> {
    let index: usize = raw.trim().parse().ok()?;
    store.ordered_active().get(index).copied()
}

fn print_tasks(store: &InMemoryStore) {
    let active = store.ordered_active();
    for (index, id) in active.iter().enumerate() {
        if let Some(task) = store.task(*id) {
            println!("{:>3} [ ] {}", index, task.title);
        }
    }
    for task in store.completed() {
        println!("    [x] {}", task.title);
    }
}
