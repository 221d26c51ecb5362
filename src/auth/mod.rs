//! Identity/policy resolution.
//!
//! `PrincipalResolver` is the interface the pipeline's Validate stage
//! calls against; `StaticPrincipalResolver` is a minimal, swappable
//! implementation so the repository runs as a service rather than just a
//! library of traits.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct Principal {
    pub principal_id: String,
    pub organization_id: Option<String>,
    pub project_id: Option<String>,
    pub tier: crate::domain::Tier,
}

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn authenticate(&self, bearer_token: &str) -> Result<Principal, GatewayError>;

    /// Authorization is currently all-or-nothing per principal: any
    /// authenticated principal may call any operation. Finer-grained
    /// policy is named as an external collaborator, not implemented here.
    async fn authorize(&self, _principal: &Principal, _operation: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}

pub struct StaticPrincipalResolver {
    tokens: HashMap<String, Principal>,
}

impl StaticPrincipalResolver {
    pub fn new() -> Self {
        Self { tokens: HashMap::new() }
    }

    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

impl Default for StaticPrincipalResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrincipalResolver for StaticPrincipalResolver {
    async fn authenticate(&self, bearer_token: &str) -> Result<Principal, GatewayError> {
        self.tokens
            .get(bearer_token)
            .cloned()
            .ok_or_else(|| GatewayError::Unauthorized("unrecognized bearer token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(id: &str) -> Principal {
        Principal {
            principal_id: id.to_string(),
            organization_id: Some("org-1".into()),
            project_id: Some("proj-1".into()),
            tier: crate::domain::Tier::Standard,
        }
    }

    #[tokio::test]
    async fn known_token_resolves_to_principal() {
        let resolver = StaticPrincipalResolver::new().with_token("tok-1", principal("p1"));
        let resolved = resolver.authenticate("tok-1").await.unwrap();
        assert_eq!(resolved.principal_id, "p1");
    }

    #[tokio::test]
    async fn unknown_token_is_unauthorized() {
        let resolver = StaticPrincipalResolver::new();
        let result = resolver.authenticate("nope").await;
        assert!(matches!(result, Err(GatewayError::Unauthorized(_))));
    }
}
