//! Sub-agent manager: spawns child tasks under a parent task and polls
//! the store for their completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::agent::{Agent, Personality};
use crate::bus::MessageBus;
use crate::provider::Provider;
use crate::store::TaskStore;
use crate::task::{Task, TaskFilter, TaskStatus};
use crate::tools::ToolDispatcher;
use crate::Result;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Result of [`SubagentManager::wait_tasks`]: whichever tasks reached a
/// terminal status before the wait ended, plus the ids still outstanding.
/// A non-empty `pending` list with `timed_out` or `cancelled` set is not
/// an error, callers act on partial results.
#[derive(Debug, Default)]
pub struct WaitOutcome {
    pub completed: Vec<Task>,
    pub pending: Vec<String>,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// A cancellation token for an in-flight [`SubagentManager::wait_tasks`]
/// call. Cloning shares the same underlying signal.
#[derive(Clone)]
pub struct WaitCancelToken {
    tx: Arc<watch::Sender<bool>>,
}

pub struct WaitCancelHandle {
    rx: watch::Receiver<bool>,
}

pub fn wait_cancel_pair() -> (WaitCancelToken, WaitCancelHandle) {
    let (tx, rx) = watch::channel(false);
    (WaitCancelToken { tx: Arc::new(tx) }, WaitCancelHandle { rx })
}

impl WaitCancelToken {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct SubagentManager {
    store: Arc<dyn TaskStore>,
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolDispatcher>,
    bus: Arc<MessageBus>,
}

impl SubagentManager {
    pub fn new(store: Arc<dyn TaskStore>, provider: Arc<dyn Provider>, tools: Arc<dyn ToolDispatcher>, bus: Arc<MessageBus>) -> Self {
        Self { store, provider, tools, bus }
    }

    /// Creates a child task under `parent_id`, instantiates a fresh agent
    /// runtime configured from `system_prompt`, assigns the task to it, and
    /// starts the runtime. Returns the child task's id; the spawned agent
    /// runs autonomously from there, observable through [`SubagentManager::check_task`]
    /// and [`SubagentManager::wait_tasks`].
    pub async fn spawn(
        &self,
        parent_id: &str,
        name: impl Into<String>,
        task_description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Result<String> {
        let parent = self.store.get(parent_id).await?;
        let name = name.into();

        let mut task = Task::new(name.clone(), task_description).with_parent(parent.id.clone());
        task.team_id = parent.team_id.clone();
        self.store.create(task.clone()).await?;

        let personality = Personality {
            role: name.clone(),
            system_prompt: system_prompt.into(),
            preferred_model: self.provider.name().to_string(),
        };
        let agent_id = format!("sub-{}", task.id);
        let handle = Agent::new(
            agent_id,
            personality,
            false,
            task.team_id.clone(),
            self.provider.clone(),
            self.tools.clone(),
            self.store.clone(),
            self.bus.clone(),
        );
        handle.start().await?;
        handle.assign_task(task.clone())?;

        Ok(task.id)
    }

    /// Fetches a single sub-agent task's current state from the store.
    pub async fn check_task(&self, task_id: &str) -> Result<Task> {
        self.store.get(task_id).await
    }

    /// Returns every currently-known child of `parent_id`, regardless of
    /// status.
    pub async fn children_of(&self, parent_id: &str) -> Result<Vec<Task>> {
        self.store
            .list(TaskFilter {
                parent_id: Some(parent_id.to_string()),
                ..Default::default()
            })
            .await
    }

    /// Polls `task_ids` at `poll_interval` until every task reaches a
    /// terminal status, `timeout` elapses, or `cancel` fires. Always
    /// returns whatever completed so far rather than erroring on
    /// incompleteness.
    pub async fn wait_tasks(
        &self,
        task_ids: &[String],
        timeout: Duration,
        poll_interval: Duration,
        mut cancel: WaitCancelHandle,
    ) -> Result<WaitOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut pending: Vec<String> = task_ids.to_vec();
        let mut completed = Vec::new();

        loop {
            if pending.is_empty() {
                return Ok(WaitOutcome { completed, pending, timed_out: false, cancelled: false });
            }

            let mut still_pending = Vec::with_capacity(pending.len());
            for id in &pending {
                let task = self.store.get(id).await?;
                if task.status.is_terminal() {
                    completed.push(task);
                } else {
                    still_pending.push(id.clone());
                }
            }
            pending = still_pending;
            if pending.is_empty() {
                return Ok(WaitOutcome { completed, pending, timed_out: false, cancelled: false });
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    debug!(remaining = pending.len(), "wait_tasks timed out with tasks still pending");
                    return Ok(WaitOutcome { completed, pending, timed_out: true, cancelled: false });
                }
                changed = cancel.rx.changed() => {
                    if changed.is_err() || *cancel.rx.borrow() {
                        return Ok(WaitOutcome { completed, pending, timed_out: false, cancelled: true });
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FinishReason, MockProvider, ProviderResponse};
    use crate::store::InMemoryTaskStore;
    use crate::tools::ToolRegistry;

    fn manager(provider: Arc<MockProvider>, store: Arc<dyn TaskStore>) -> SubagentManager {
        let tools: Arc<dyn ToolDispatcher> = Arc::new(ToolRegistry::new());
        let bus = Arc::new(MessageBus::new());
        SubagentManager::new(store, provider, tools, bus)
    }

    #[tokio::test]
    async fn spawn_creates_child_with_parent_id_and_starts_a_fresh_runtime() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let provider = Arc::new(MockProvider::new("member"));
        provider.push_chat_response(ProviderResponse {
            text: "child done".into(),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: None,
        });
        let sub = manager(provider, store.clone());

        let parent = Task::new("parent", "d");
        store.create(parent.clone()).await.unwrap();

        let child_id = sub.spawn(&parent.id, "child", "do it", "you are a child agent").await.unwrap();
        let child = store.get(&child_id).await.unwrap();
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let child = store.get(&child_id).await.unwrap();
        assert_eq!(child.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn wait_tasks_returns_partial_results_on_timeout() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let manager = SubagentManager::new(
            store.clone(),
            Arc::new(MockProvider::new("member")),
            Arc::new(ToolRegistry::new()),
            Arc::new(MessageBus::new()),
        );
        let pending_task = Task::new("t", "d");
        store.create(pending_task.clone()).await.unwrap();

        let (_token, cancel) = wait_cancel_pair();
        let outcome = manager
            .wait_tasks(&[pending_task.id.clone()], Duration::from_millis(30), Duration::from_millis(10), cancel)
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert_eq!(outcome.pending, vec![pending_task.id]);
        assert!(outcome.completed.is_empty());
    }

    #[tokio::test]
    async fn wait_tasks_returns_immediately_when_all_already_terminal() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let manager = SubagentManager::new(
            store.clone(),
            Arc::new(MockProvider::new("member")),
            Arc::new(ToolRegistry::new()),
            Arc::new(MessageBus::new()),
        );
        let mut task = Task::new("t", "d");
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
        store.create(task.clone()).await.unwrap();

        let (_token, cancel) = wait_cancel_pair();
        let outcome = manager
            .wait_tasks(&[task.id.clone()], Duration::from_secs(5), Duration::from_millis(10), cancel)
            .await
            .unwrap();

        assert!(!outcome.timed_out);
        assert_eq!(outcome.completed.len(), 1);
        assert!(outcome.pending.is_empty());
    }

    #[tokio::test]
    async fn wait_tasks_stops_early_when_cancelled() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let manager = SubagentManager::new(
            store.clone(),
            Arc::new(MockProvider::new("member")),
            Arc::new(ToolRegistry::new()),
            Arc::new(MessageBus::new()),
        );
        let task = Task::new("t", "d");
        store.create(task.clone()).await.unwrap();

        let (token, cancel) = wait_cancel_pair();
        token.cancel();
        let outcome = manager
            .wait_tasks(&[task.id.clone()], Duration::from_secs(5), Duration::from_millis(10), cancel)
            .await
            .unwrap();

        assert!(outcome.cancelled);
    }
}
