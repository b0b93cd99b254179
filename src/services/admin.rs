//! Administrator resolution
//!
//! Settlement and cycle management are operator actions. The resolver
//! decides whether a caller credential carries admin rights; the engine
//! itself stays ignorant of how credentials are issued.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;

/// Decides whether a caller is an administrator
#[async_trait]
pub trait AdminResolver: Send + Sync {
    async fn is_admin(&self, caller: &str) -> Result<bool>;
}

/// Resolver over a fixed token set from configuration
pub struct StaticAdminResolver {
    tokens: HashSet<String>,
}

impl StaticAdminResolver {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl AdminResolver for StaticAdminResolver {
    async fn is_admin(&self, caller: &str) -> Result<bool> {
        Ok(self.tokens.contains(caller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_matches_exact_tokens() {
        let resolver = StaticAdminResolver::new(vec!["alpha".to_string(), " beta ".to_string()]);
        assert!(resolver.is_admin("alpha").await.unwrap());
        assert!(resolver.is_admin("beta").await.unwrap());
        assert!(!resolver.is_admin("gamma").await.unwrap());
        assert!(!resolver.is_admin("").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_token_set_denies_everyone() {
        let resolver = StaticAdminResolver::new(Vec::<String>::new());
        assert!(resolver.is_empty());
        assert!(!resolver.is_admin("anything").await.unwrap());
    }
}
