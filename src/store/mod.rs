//! Task store: durable, filterable, priority-ordered CRUD for tasks.
//!
//! Two implementations share the [`TaskStore`] contract: [`SqliteTaskStore`]
//! for real deployments and [`memory::InMemoryTaskStore`] for tests and
//! embedding. Both apply identical filtering, ordering, and limit/offset
//! semantics.

mod memory;
mod sqlite;

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use async_trait::async_trait;

use crate::task::{Task, TaskFilter};
use crate::Result;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: Task) -> Result<String>;
    async fn get(&self, id: &str) -> Result<Task>;
    async fn update(&self, task: Task) -> Result<()>;
    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Orders in-memory results per the store's fixed ordering contract:
/// priority descending, then created_at ascending, then limit/offset.
pub(crate) fn apply_order_and_page(mut tasks: Vec<Task>, filter: &TaskFilter) -> Vec<Task> {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
    });

    let offset = filter.offset.unwrap_or(0) as usize;
    if offset > 0 {
        tasks = tasks.into_iter().skip(offset).collect();
    }
    if let Some(limit) = filter.limit {
        tasks.truncate(limit as usize);
    }
    tasks
}
