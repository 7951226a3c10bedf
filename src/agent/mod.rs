//! Agent runtime: per-agent state machine running a bounded reasoning
//! loop over a pluggable [`Provider`], fed by a bounded task queue and a
//! bounded inbox, with terminal-state persistence and bus notification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::bus::{Message, MessageBus, MessageKind};
use crate::provider::{Provider, ProviderMessage, ProviderResponse};
use crate::store::TaskStore;
use crate::task::{Task, TaskStatus};
use crate::tools::ToolDispatcher;
use crate::{RatchetError, Result};

pub const TASK_QUEUE_CAPACITY: usize = 64;
pub const INBOX_CAPACITY: usize = 256;
pub const MAX_REASONING_ITERATIONS: usize = 10;
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The sentinel error message persisted when a task's reasoning loop runs
/// to `MAX_REASONING_ITERATIONS` without the provider returning a final
/// answer. Kept as an exact string, not reworded, across the runtime.
pub const MAX_ITERATIONS_MESSAGE: &str = "max iterations reached";

/// Static role/prompt/model configuration for one agent.
#[derive(Debug, Clone)]
pub struct Personality {
    pub role: String,
    pub system_prompt: String,
    /// Provider alias this agent's reasoning loop resolves through the
    /// registry, not a client itself.
    pub preferred_model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Busy,
    Stopped,
}

/// Non-blocking handle used by the Team Scheduler, Sub-agent Manager, and
/// the thin API to address a running agent without touching its event
/// loop directly.
#[derive(Clone)]
pub struct AgentHandle {
    pub id: String,
    pub is_lead: bool,
    task_tx: mpsc::Sender<Task>,
    inbox_tx: mpsc::Sender<AgentMessage>,
    state: Arc<RwLock<AgentState>>,
    stop_tx: watch::Sender<bool>,
    started_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    bus: Arc<MessageBus>,
    /// Holds the runnable agent until `start` takes it; `None` afterward,
    /// which also serves as the double-start guard.
    runnable: Arc<StdMutex<Option<Agent>>>,
}

#[derive(Debug, Clone)]
pub enum AgentMessage {
    TaskUpdate { task_id: String, status: TaskStatus },
    /// A message delivered through the bus subscription `start` installs.
    Bus(Message),
}

impl AgentHandle {
    pub async fn state(&self) -> AgentState {
        *self.state.read().await
    }

    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.read().await
    }

    /// Subscribes this agent to the bus under its own id, so peer messages
    /// are pushed into its inbox (dropped silently on overflow), stamps
    /// `started_at`, and spawns the event loop. Fails with `Conflict` if
    /// the agent is already running.
    pub async fn start(&self) -> Result<()> {
        let agent = self
            .runnable
            .lock()
            .expect("agent slot poisoned")
            .take()
            .ok_or_else(|| RatchetError::Conflict(format!("agent {} is already running", self.id)))?;

        let inbox_tx = self.inbox_tx.clone();
        self.bus.subscribe(
            self.id.clone(),
            Arc::new(move |message: &Message| {
                let _ = inbox_tx.try_send(AgentMessage::Bus(message.clone()));
            }),
        );

        *self.started_at.write().await = Some(Utc::now());
        tokio::spawn(agent.run());
        Ok(())
    }

    /// Enqueues a task without blocking; fails with `Capacity` if the
    /// bounded queue is full.
    pub fn assign_task(&self, task: Task) -> Result<()> {
        self.task_tx
            .try_send(task)
            .map_err(|_| RatchetError::queue_full("agent task queue"))
    }

    /// Delivers a message without blocking; fails with `Capacity` if the
    /// bounded inbox (256) is full.
    pub fn receive_message(&self, message: AgentMessage) -> Result<()> {
        self.inbox_tx
            .try_send(message)
            .map_err(|_| RatchetError::queue_full("agent inbox"))
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Owns the running side of an agent: the provider, tools, store, bus, and
/// the receiving ends of the queue/inbox the handle feeds.
pub struct Agent {
    id: String,
    personality: Personality,
    is_lead: bool,
    team_id: Option<String>,
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolDispatcher>,
    store: Arc<dyn TaskStore>,
    bus: Arc<MessageBus>,
    state: Arc<RwLock<AgentState>>,
    task_rx: mpsc::Receiver<Task>,
    inbox_rx: mpsc::Receiver<AgentMessage>,
    stop_rx: watch::Receiver<bool>,
    started: AtomicBool,
}

impl Agent {
    /// Builds an agent and returns the [`AgentHandle`] used to start and
    /// address it. The agent itself is held inside the handle until
    /// [`AgentHandle::start`] takes it and spawns the event loop.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        personality: Personality,
        is_lead: bool,
        team_id: Option<String>,
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolDispatcher>,
        store: Arc<dyn TaskStore>,
        bus: Arc<MessageBus>,
    ) -> AgentHandle {
        let id = id.into();
        let (task_tx, task_rx) = mpsc::channel(TASK_QUEUE_CAPACITY);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(RwLock::new(AgentState::Idle));

        let agent = Self {
            id: id.clone(),
            personality,
            is_lead,
            team_id,
            provider,
            tools,
            store,
            bus: bus.clone(),
            state: state.clone(),
            task_rx,
            inbox_rx,
            stop_rx,
            started: AtomicBool::new(false),
        };

        AgentHandle {
            id,
            is_lead,
            task_tx,
            inbox_tx,
            state,
            stop_tx,
            started_at: Arc::new(RwLock::new(None)),
            bus,
            runnable: Arc::new(StdMutex::new(Some(agent))),
        }
    }

    /// Starts the event loop on the current Tokio runtime. Calling `run`
    /// twice on the same agent is a programmer error, not handled
    /// defensively here, since only the team scheduler spawns agents and
    /// it spawns each one exactly once.
    pub async fn run(mut self) {
        self.started.store(true, Ordering::SeqCst);
        info!(agent_id = %self.id, role = %self.personality.role, "agent started");
        let mut idle_ticker = tokio::time::interval(IDLE_POLL_INTERVAL);

        loop {
            tokio::select! {
                biased;

                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        break;
                    }
                }
                Some(message) = self.inbox_rx.recv() => {
                    self.handle_message(message).await;
                }
                Some(task) = self.task_rx.recv() => {
                    *self.state.write().await = AgentState::Busy;
                    self.execute_task(task).await;
                    *self.state.write().await = AgentState::Idle;
                }
                _ = idle_ticker.tick() => {
                    debug!(agent_id = %self.id, "idle poll tick");
                }
                else => break,
            }
        }

        *self.state.write().await = AgentState::Stopped;
        info!(agent_id = %self.id, "agent stopped");
    }

    async fn handle_message(&self, message: AgentMessage) {
        match message {
            AgentMessage::TaskUpdate { task_id, status } => {
                debug!(agent_id = %self.id, %task_id, ?status, "received task_update message");
            }
            AgentMessage::Bus(msg) => {
                debug!(agent_id = %self.id, message_id = msg.id, from = %msg.from, kind = ?msg.kind, "received bus message");
            }
        }
    }

    async fn execute_task(&self, mut task: Task) {
        if let Err(e) = task.transition(TaskStatus::InProgress) {
            error!(agent_id = %self.id, task_id = %task.id, error = %e, "illegal transition to in_progress");
            return;
        }
        if let Err(e) = self.store.update(task.clone()).await {
            error!(agent_id = %self.id, task_id = %task.id, error = %e, "failed to persist in_progress transition");
            return;
        }

        let outcome = self.run_reasoning_loop(&task).await;

        match outcome {
            Ok(result) => {
                let _ = task.transition(TaskStatus::Completed);
                task.result = Some(result);
            }
            Err(e) => {
                let _ = task.transition(TaskStatus::Failed);
                task.error = Some(format!("provider error: {e}"));
            }
        }

        if let Err(e) = self.store.update(task.clone()).await {
            error!(agent_id = %self.id, task_id = %task.id, error = %e, "failed to persist terminal transition");
            return;
        }

        self.notify_terminal(&task);
    }

    /// Notifies the bus of a task's terminal state: a `Broadcast` message
    /// for a lead agent (visible to every subscriber), a direct
    /// `TaskUpdate` to the agent's team otherwise.
    fn notify_terminal(&self, task: &Task) {
        let status = match task.status {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
            _ => return,
        };
        let body = serde_json::json!({ "task_id": task.id, "status": status });
        if self.is_lead {
            self.bus.publish(MessageKind::Broadcast, self.id.clone(), None, body);
        } else {
            self.bus.publish(MessageKind::TaskUpdate, self.id.clone(), self.team_id.clone(), body);
        }
    }

    /// Builds a transcript starting from the personality's system prompt
    /// and the task description, alternating provider calls with tool
    /// dispatch until the provider returns a final answer or
    /// `MAX_REASONING_ITERATIONS` is reached.
    async fn run_reasoning_loop(&self, task: &Task) -> Result<String> {
        let mut transcript = vec![
            ProviderMessage::system(&self.personality.system_prompt),
            ProviderMessage::user(format!("{}\n\n{}", task.title, task.description)),
        ];
        let tool_defs = self.tools.definitions();

        for iteration in 0..MAX_REASONING_ITERATIONS {
            debug!(agent_id = %self.id, task_id = %task.id, iteration, "reasoning iteration");
            let ProviderResponse { text, tool_calls, .. } =
                self.provider.chat(&transcript, &tool_defs).await?;

            if tool_calls.is_empty() {
                return Ok(text);
            }

            transcript.push(ProviderMessage {
                role: crate::provider::Role::Assistant,
                content: text,
                tool_call_id: None,
                tool_calls: Some(tool_calls.clone()),
            });

            for call in &tool_calls {
                let result = match self.tools.execute(&call.name, call.arguments.clone()).await {
                    Ok(value) => value.to_string(),
                    Err(e) => {
                        warn!(agent_id = %self.id, tool = %call.name, error = %e, "tool execution failed");
                        serde_json::json!({ "error": e.to_string() }).to_string()
                    }
                };
                transcript.push(ProviderMessage::tool_result(call.id.clone(), result));
            }
        }

        Err(RatchetError::Fatal(MAX_ITERATIONS_MESSAGE.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FinishReason, MockProvider};
    use crate::store::InMemoryTaskStore;
    use crate::tools::ToolRegistry;

    fn personality() -> Personality {
        Personality {
            role: "developer".into(),
            system_prompt: "You write code.".into(),
            preferred_model: "mock".into(),
        }
    }

    #[tokio::test]
    async fn simple_completion_persists_result_and_notifies_bus() {
        let provider = Arc::new(MockProvider::new("mock"));
        provider.push_chat_response(ProviderResponse {
            text: "done".into(),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: None,
        });
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let bus = Arc::new(MessageBus::new());
        let tools: Arc<dyn ToolDispatcher> = Arc::new(ToolRegistry::new());

        let handle = Agent::new("a1", personality(), false, Some("team-1".into()), provider, tools, store.clone(), bus.clone());
        let task = Task::new("t", "d");
        let task_id = task.id.clone();
        store.create(task.clone()).await.unwrap();

        handle.start().await.unwrap();
        assert!(handle.started_at().await.is_some());
        handle.assign_task(task).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stored = store.get(&task_id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.result.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn starting_an_already_running_agent_is_a_conflict() {
        let provider = Arc::new(MockProvider::new("mock"));
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let bus = Arc::new(MessageBus::new());
        let tools: Arc<dyn ToolDispatcher> = Arc::new(ToolRegistry::new());
        let handle = Agent::new("a1", personality(), false, None, provider, tools, store, bus);

        handle.start().await.unwrap();
        assert!(matches!(handle.start().await, Err(RatchetError::Conflict(_))));
    }

    #[tokio::test]
    async fn bus_messages_addressed_to_the_agent_reach_its_inbox() {
        let provider = Arc::new(MockProvider::new("mock"));
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let bus = Arc::new(MessageBus::new());
        let tools: Arc<dyn ToolDispatcher> = Arc::new(ToolRegistry::new());
        let handle = Agent::new("a1", personality(), false, None, provider, tools, store, bus.clone());

        handle.start().await.unwrap();
        bus.publish(MessageKind::Direct, "peer", Some("a1".into()), serde_json::json!({ "hi": true }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop();
    }

    #[tokio::test]
    async fn provider_error_persists_failed_status() {
        let provider = Arc::new(MockProvider::new("mock"));
        provider.push_chat_error("upstream exploded");
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let bus = Arc::new(MessageBus::new());
        let tools: Arc<dyn ToolDispatcher> = Arc::new(ToolRegistry::new());

        let handle = Agent::new("a1", personality(), false, None, provider, tools, store.clone(), bus);
        let task = Task::new("t", "d");
        let task_id = task.id.clone();
        store.create(task.clone()).await.unwrap();

        handle.start().await.unwrap();
        handle.assign_task(task).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stored = store.get(&task_id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.error.as_deref().unwrap().contains("provider error"));
    }

    #[tokio::test]
    async fn task_queue_overflow_is_capacity_error() {
        let provider = Arc::new(MockProvider::new("mock"));
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let bus = Arc::new(MessageBus::new());
        let tools: Arc<dyn ToolDispatcher> = Arc::new(ToolRegistry::new());
        let handle = Agent::new("a1", personality(), false, None, provider, tools, store, bus);

        for _ in 0..TASK_QUEUE_CAPACITY {
            handle.assign_task(Task::new("t", "d")).unwrap();
        }
        let overflow = handle.assign_task(Task::new("overflow", "d"));
        assert!(matches!(overflow, Err(RatchetError::Capacity(_))));
    }

    #[tokio::test]
    async fn lead_agent_broadcasts_terminal_notifications() {
        let provider = Arc::new(MockProvider::new("mock"));
        provider.push_chat_response(ProviderResponse {
            text: "done".into(),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: None,
        });
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let bus = Arc::new(MessageBus::new());
        let tools: Arc<dyn ToolDispatcher> = Arc::new(ToolRegistry::new());

        let handle = Agent::new("lead", personality(), true, None, provider, tools, store.clone(), bus.clone());
        let task = Task::new("t", "d");
        let task_id = task.id.clone();
        store.create(task.clone()).await.unwrap();

        handle.start().await.unwrap();
        handle.assign_task(task).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let history = bus.history("observer", 10);
        let broadcast = history.iter().find(|m| m.body["task_id"] == task_id);
        assert!(broadcast.is_some());
        assert_eq!(broadcast.unwrap().to, None);
    }
}
