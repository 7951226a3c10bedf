//! System-wide default values. [`crate::config::Config::load`] lets every
//! one of these be overridden by environment variable; these are the
//! fallbacks when the variable is absent.

/// Bounded FIFO history kept by the message bus.
pub const BUS_HISTORY_CAPACITY: usize = 1000;

/// Per-agent bounded task queue.
pub const TASK_QUEUE_CAPACITY: usize = 64;

/// Per-agent bounded inbox.
pub const INBOX_CAPACITY: usize = 256;

/// Idle-branch poll interval in the agent runtime's event loop.
pub const IDLE_POLL_INTERVAL_MS: u64 = 500;

/// Bound on a single task's reasoning loop.
pub const MAX_REASONING_ITERATIONS: usize = 10;

/// Default poll interval for `SubagentManager::wait_tasks`.
pub const SUBAGENT_POLL_INTERVAL_MS: u64 = 500;

pub const DEFAULT_API_PORT: u16 = 8080;

pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";
