use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{apply_order_and_page, TaskStore};
use crate::task::{Task, TaskFilter};
use crate::{RatchetError, Result};

/// In-memory implementation of the Task Store contract, used by tests and
/// for embedding Ratchet without a filesystem. Applies the same filter,
/// ordering, and limit semantics as [`super::SqliteTaskStore`].
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: Task) -> Result<String> {
        let id = task.id.clone();
        let mut tasks = self.tasks.write().await;
        tasks.insert(id.clone(), task);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Task> {
        let tasks = self.tasks.read().await;
        tasks
            .get(id)
            .cloned()
            .ok_or_else(|| RatchetError::NotFound(format!("task {id}")))
    }

    async fn update(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if !tasks.contains_key(&task.id) {
            return Err(RatchetError::NotFound(format!("task {}", task.id)));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let matched: Vec<Task> = tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        Ok(apply_order_and_page(matched, &filter))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.remove(id).is_none() {
            return Err(RatchetError::NotFound(format!("task {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, TaskStatus};

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("t", "d");
        let id = store.create(task.clone()).await.unwrap();
        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.title, task.title);
        assert_eq!(fetched.description, task.description);
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn update_on_missing_row_is_not_found() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("t", "d");
        assert!(matches!(
            store.update(task).await,
            Err(RatchetError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_bumps_updated_at_monotonically() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("t", "d");
        let id = store.create(task.clone()).await.unwrap();
        let mut fetched = store.get(&id).await.unwrap();
        let before = fetched.updated_at;
        fetched.transition(TaskStatus::InProgress).unwrap();
        store.update(fetched.clone()).await.unwrap();
        let after = store.get(&id).await.unwrap();
        assert!(after.updated_at >= before);
    }

    #[tokio::test]
    async fn list_orders_by_priority_desc_then_created_asc() {
        let store = InMemoryTaskStore::new();
        let low = Task::new("low", "d").with_priority(Priority::Low);
        let crit = Task::new("crit", "d").with_priority(Priority::Critical);
        let normal_first = Task::new("normal1", "d").with_priority(Priority::Normal);
        let normal_second = Task::new("normal2", "d").with_priority(Priority::Normal);

        store.create(low).await.unwrap();
        store.create(normal_first.clone()).await.unwrap();
        store.create(crit).await.unwrap();
        store.create(normal_second.clone()).await.unwrap();

        let all = store.list(TaskFilter::default()).await.unwrap();
        let titles: Vec<&str> = all.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["crit", "normal1", "normal2", "low"]);
    }

    #[tokio::test]
    async fn list_with_empty_filter_returns_every_created_task() {
        let store = InMemoryTaskStore::new();
        for i in 0..5 {
            store.create(Task::new(format!("t{i}"), "d")).await.unwrap();
        }
        let all = store.list(TaskFilter::default()).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn list_respects_limit() {
        let store = InMemoryTaskStore::new();
        for i in 0..5 {
            store.create(Task::new(format!("t{i}"), "d")).await.unwrap();
        }
        let filter = TaskFilter {
            limit: Some(2),
            ..Default::default()
        };
        let page = store.list(filter).await.unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = InMemoryTaskStore::new();
        assert!(matches!(
            store.delete("missing").await,
            Err(RatchetError::NotFound(_))
        ));
    }
}
