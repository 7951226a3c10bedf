use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{RatchetError, Result};

/// Runtime configuration for the core subsystems, loaded once at startup.
/// Provider secrets are never stored here, they're resolved through
/// [`crate::secrets::SecretsProvider`] by alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bus: BusConfig,
    pub agent: AgentConfig,
    pub subagent: SubagentConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub history_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub task_queue_capacity: usize,
    pub inbox_capacity: usize,
    pub idle_poll_interval_ms: u64,
    pub max_reasoning_iterations: usize,
}

impl AgentConfig {
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    pub poll_interval_ms: u64,
}

impl SubagentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub bearer_token: String,
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Loads configuration from the environment (and a local `.env` file,
    /// if present), falling back to the documented defaults in
    /// `crate::constants`. `RATCHET_TOKEN` is the one required variable:
    /// without it the thin API has no way to authenticate requests.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(?path, "loaded .env file"),
            Err(e) => tracing::debug!(error = %e, "no .env file loaded"),
        }

        let bearer_token = env::var("RATCHET_TOKEN").map_err(|_| {
            RatchetError::Configuration("RATCHET_TOKEN environment variable is required".to_string())
        })?;
        if bearer_token.trim().is_empty() {
            return Err(RatchetError::Configuration("RATCHET_TOKEN cannot be empty".to_string()));
        }
        if bearer_token.len() < 32 {
            tracing::warn!("RATCHET_TOKEN is shorter than the recommended 32 characters");
        }

        let allowed_origins = env::var("RATCHET_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let config = Config {
            bus: BusConfig {
                history_capacity: env_usize("RATCHET_BUS_HISTORY_CAPACITY", crate::constants::BUS_HISTORY_CAPACITY),
            },
            agent: AgentConfig {
                task_queue_capacity: env_usize("RATCHET_TASK_QUEUE_CAPACITY", crate::constants::TASK_QUEUE_CAPACITY),
                inbox_capacity: env_usize("RATCHET_INBOX_CAPACITY", crate::constants::INBOX_CAPACITY),
                idle_poll_interval_ms: env_u64("RATCHET_IDLE_POLL_INTERVAL_MS", crate::constants::IDLE_POLL_INTERVAL_MS),
                max_reasoning_iterations: env_usize(
                    "RATCHET_MAX_REASONING_ITERATIONS",
                    crate::constants::MAX_REASONING_ITERATIONS,
                ),
            },
            subagent: SubagentConfig {
                poll_interval_ms: env_u64("RATCHET_SUBAGENT_POLL_INTERVAL_MS", crate::constants::SUBAGENT_POLL_INTERVAL_MS),
            },
            store: StoreConfig {
                sqlite_path: env::var("RATCHET_SQLITE_PATH").unwrap_or_else(|_| "ratchet.db".to_string()),
            },
            api: ApiConfig {
                host: env::var("RATCHET_API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env_u64("RATCHET_API_PORT", crate::constants::DEFAULT_API_PORT as u64) as u16,
                bearer_token,
                allowed_origins,
            },
        };

        tracing::info!(
            host = %config.api.host,
            port = config.api.port,
            sqlite_path = %config.store.sqlite_path,
            "configuration loaded"
        );
        Ok(config)
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
