//! Named credential resolution. The provider registry resolves a provider
//! config's `secret_name` through this trait and never reads credentials
//! directly.

use async_trait::async_trait;

use crate::{RatchetError, Result};

#[async_trait]
pub trait SecretsProvider: Send + Sync {
    async fn get(&self, name: &str) -> Result<String>;
}

/// Resolves `name` by reading the environment variable of the same name.
/// The default, real implementation: every provider alias's secret is a
/// name like `ANTHROPIC_API_KEY` until a dedicated secrets manager is
/// wired in.
pub struct EnvSecretsProvider;

#[async_trait]
impl SecretsProvider for EnvSecretsProvider {
    async fn get(&self, name: &str) -> Result<String> {
        std::env::var(name).map_err(|_| RatchetError::NotFound(format!("secret {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_env_var_is_not_found() {
        let provider = EnvSecretsProvider;
        assert!(provider.get("RATCHET_TEST_DOES_NOT_EXIST").await.is_err());
    }

    #[tokio::test]
    async fn present_env_var_resolves() {
        std::env::set_var("RATCHET_TEST_SECRET", "s3cr3t");
        let provider = EnvSecretsProvider;
        assert_eq!(provider.get("RATCHET_TEST_SECRET").await.unwrap(), "s3cr3t");
        std::env::remove_var("RATCHET_TEST_SECRET");
    }
}
