//! Provider registry: resolves a provider alias to a cached, ready-to-use
//! [`Provider`] client, backed by the same embedded-database machinery the
//! task store uses for a `provider_configs` table.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::provider::{AnthropicProvider, CopilotProvider, OpenAiProvider, OpenRouterProvider, Provider, ProviderMessage};
use crate::secrets::SecretsProvider;
use crate::{RatchetError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Anthropic,
    OpenAi,
    Copilot,
    OpenRouter,
}

impl Vendor {
    fn as_str(self) -> &'static str {
        match self {
            Vendor::Anthropic => "anthropic",
            Vendor::OpenAi => "openai",
            Vendor::Copilot => "copilot",
            Vendor::OpenRouter => "openrouter",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "anthropic" => Ok(Vendor::Anthropic),
            "openai" => Ok(Vendor::OpenAi),
            "copilot" => Ok(Vendor::Copilot),
            "openrouter" => Ok(Vendor::OpenRouter),
            other => Err(RatchetError::Invalid(format!("unknown provider vendor {other}"))),
        }
    }
}

/// A provider alias's persisted configuration. `secret_name` is resolved
/// through a [`SecretsProvider`], never stored as a literal credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub alias: String,
    pub vendor: Vendor,
    pub model: String,
    pub secret_name: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub is_default: bool,
}

/// Alias -> cached client map, vendor -> factory map.
pub struct ProviderRegistry {
    conn: Mutex<Connection>,
    cache: RwLock<HashMap<String, Arc<dyn Provider>>>,
    secrets: RwLock<Arc<dyn SecretsProvider>>,
}

impl ProviderRegistry {
    pub fn open(path: &str, secrets: Arc<dyn SecretsProvider>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache: RwLock::new(HashMap::new()),
            secrets: RwLock::new(secrets),
        })
    }

    pub fn open_in_memory(secrets: Arc<dyn SecretsProvider>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache: RwLock::new(HashMap::new()),
            secrets: RwLock::new(secrets),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS provider_configs (
                alias        TEXT PRIMARY KEY,
                vendor       TEXT NOT NULL,
                model        TEXT NOT NULL,
                secret_name  TEXT NOT NULL,
                base_url     TEXT,
                max_tokens   INTEGER NOT NULL,
                is_default   INTEGER NOT NULL
            )",
        )?;
        Ok(())
    }

    pub async fn register_config(&self, config: ProviderConfig) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO provider_configs
                (alias, vendor, model, secret_name, base_url, max_tokens, is_default)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                config.alias,
                config.vendor.as_str(),
                config.model,
                config.secret_name,
                config.base_url,
                config.max_tokens,
                config.is_default as i64,
            ],
        )?;
        drop(conn);
        self.cache.write().await.remove(&config.alias);
        info!(alias = %config.alias, vendor = config.vendor.as_str(), "registered provider config");
        Ok(())
    }

    async fn load_config(&self, alias: &str) -> Result<ProviderConfig> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT alias, vendor, model, secret_name, base_url, max_tokens, is_default
             FROM provider_configs WHERE alias = ?1",
            params![alias],
            Self::row_to_config,
        )
        .optional()?
        .ok_or_else(|| RatchetError::NotFound(format!("provider config {alias}")))
    }

    async fn load_default_config(&self) -> Result<ProviderConfig> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT alias, vendor, model, secret_name, base_url, max_tokens, is_default
             FROM provider_configs WHERE is_default = 1 LIMIT 1",
            [],
            Self::row_to_config,
        )
        .optional()?
        .ok_or_else(|| RatchetError::NotFound("default provider config".into()))
    }

    fn row_to_config(row: &rusqlite::Row) -> rusqlite::Result<ProviderConfig> {
        let vendor: String = row.get(1)?;
        Ok(ProviderConfig {
            alias: row.get(0)?,
            vendor: Vendor::parse(&vendor).unwrap_or(Vendor::OpenAi),
            model: row.get(2)?,
            secret_name: row.get(3)?,
            base_url: row.get(4)?,
            max_tokens: row.get::<_, i64>(5)? as u32,
            is_default: row.get::<_, i64>(6)? != 0,
        })
    }

    async fn build_provider(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
        let secrets = self.secrets.read().await.clone();
        let api_key = secrets.get(&config.secret_name).await?;

        let provider: Arc<dyn Provider> = match config.vendor {
            Vendor::Anthropic => {
                let mut p = AnthropicProvider::new(&config.alias, &config.model, api_key, config.max_tokens);
                if let Some(base_url) = &config.base_url {
                    p = p.with_base_url(base_url.clone());
                }
                Arc::new(p)
            }
            Vendor::OpenAi => {
                let mut p = OpenAiProvider::new(&config.alias, &config.model, api_key, config.max_tokens);
                if let Some(base_url) = &config.base_url {
                    p = p.with_base_url(base_url.clone());
                }
                Arc::new(p)
            }
            Vendor::Copilot => Arc::new(CopilotProvider::new(&config.alias, &config.model, api_key, config.max_tokens)),
            Vendor::OpenRouter => {
                let mut p = OpenRouterProvider::build(&config.alias, &config.model, api_key, config.max_tokens);
                if let Some(base_url) = &config.base_url {
                    p = p.with_base_url(base_url.clone());
                }
                Arc::new(p)
            }
        };
        Ok(provider)
    }

    /// Returns a cached client for `alias`, constructing and caching one on
    /// first use.
    pub async fn get_by_alias(&self, alias: &str) -> Result<Arc<dyn Provider>> {
        if let Some(client) = self.cache.read().await.get(alias).cloned() {
            return Ok(client);
        }
        let config = self.load_config(alias).await?;
        let client = self.build_provider(&config).await?;
        self.cache.write().await.insert(alias.to_string(), client.clone());
        Ok(client)
    }

    /// Returns the provider config flagged `is_default`.
    pub async fn get_default(&self) -> Result<Arc<dyn Provider>> {
        let config = self.load_default_config().await?;
        self.get_by_alias(&config.alias).await
    }

    /// Swaps the secrets provider and clears the whole cache, so every
    /// alias rebuilds its client against the new provider on next use.
    pub async fn update_secrets_provider(&self, secrets: Arc<dyn SecretsProvider>) {
        *self.secrets.write().await = secrets;
        self.cache.write().await.clear();
    }

    /// Evicts every cached client whose config references `secret_name`,
    /// forcing the next `get_by_alias` to rebuild with a fresh credential.
    pub async fn invalidate_cache_by_secret(&self, secret_name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT alias FROM provider_configs WHERE secret_name = ?1")?;
        let aliases: Vec<String> = stmt
            .query_map(params![secret_name], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);
        drop(conn);

        let mut cache = self.cache.write().await;
        for alias in aliases {
            cache.remove(&alias);
        }
        Ok(())
    }

    /// Exercises a minimal chat call against a freshly built (never cached)
    /// client to verify credentials and connectivity without touching the
    /// task pipeline. The client is inserted into the cache only once the
    /// probe succeeds; a failing check leaves the cache untouched.
    pub async fn test_connection(&self, alias: &str) -> Result<ConnectionTestResult> {
        let config = self.load_config(alias).await?;
        let client = self.build_provider(&config).await?;

        let start = std::time::Instant::now();
        let outcome = client.chat(&[ProviderMessage::user("ping")], &[]).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(_) => {
                self.cache.write().await.insert(alias.to_string(), client);
                Ok(ConnectionTestResult {
                    success: true,
                    message: format!("{alias} responded"),
                    elapsed,
                    error: None,
                })
            }
            Err(e) => Ok(ConnectionTestResult {
                success: false,
                message: format!("{alias} connection check failed"),
                elapsed,
                error: Some(e.to_string()),
            }),
        }
    }
}

/// Outcome of [`ProviderRegistry::test_connection`].
#[derive(Debug, Clone)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    pub elapsed: std::time::Duration,
    pub error: Option<String>,
}
