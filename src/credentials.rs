//! Credential Resolver.
//!
//! `EnvCredentialResolver` reads `{PROVIDER}_API_KEY` from the process
//! environment on every call rather than caching it -- so a rotated
//! secret takes effect on the next request without a restart.

use std::env;

use async_trait::async_trait;

use crate::error::{GatewayError, GatewayResult};

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve the credential a provider adapter should send on the wire.
    /// Self-hosted providers may legitimately have no credential configured;
    /// callers treat an empty string as "send no auth header".
    async fn resolve(&self, provider_id: &str) -> GatewayResult<String>;
}

pub struct EnvCredentialResolver {
    /// Providers allowed to resolve to an empty credential instead of
    /// erroring when the env var is unset (self-hosted deployments).
    optional: Vec<String>,
}

impl EnvCredentialResolver {
    pub fn new() -> Self {
        Self { optional: Vec::new() }
    }

    pub fn with_optional(mut self, provider_id: impl Into<String>) -> Self {
        self.optional.push(provider_id.into());
        self
    }

    fn env_var_name(provider_id: &str) -> String {
        format!("{}_API_KEY", provider_id.to_uppercase().replace('-', "_"))
    }
}

impl Default for EnvCredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialResolver for EnvCredentialResolver {
    async fn resolve(&self, provider_id: &str) -> GatewayResult<String> {
        let var = Self::env_var_name(provider_id);
        match env::var(&var) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ if self.optional.iter().any(|p| p == provider_id) => Ok(String::new()),
            _ => Err(GatewayError::Internal(format!(
                "credential env var {var} is not set for provider {provider_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_name_uppercases_and_replaces_hyphens() {
        assert_eq!(EnvCredentialResolver::env_var_name("anthropic"), "ANTHROPIC_API_KEY");
        assert_eq!(EnvCredentialResolver::env_var_name("self-hosted-a"), "SELF_HOSTED_A_API_KEY");
    }

    #[tokio::test]
    async fn optional_provider_resolves_empty_without_env_var() {
        let resolver = EnvCredentialResolver::new().with_optional("local-vllm");
        let resolved = resolver.resolve("local-vllm").await.unwrap();
        assert_eq!(resolved, "");
    }

    #[tokio::test]
    async fn missing_required_credential_errors() {
        let resolver = EnvCredentialResolver::new();
        let result = resolver.resolve("definitely-not-set-provider-xyz").await;
        assert!(result.is_err());
    }
}
