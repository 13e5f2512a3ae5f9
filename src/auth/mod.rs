//! Resolution of request credentials to an owner identifier.
//!
//! Token verification itself lives outside this server; the resolver only
//! maps an already-issued token to the principal it belongs to.

use std::collections::HashMap;

pub trait PrincipalResolver: Send + Sync {
    /// Returns the owner id for `token`, or `None` if it is unknown.
    fn resolve(&self, token: &str) -> Option<String>;
}

/// Fixed token table, loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, String>,
}

impl StaticTokenResolver {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl PrincipalResolver for StaticTokenResolver {
    fn resolve(&self, token: &str) -> Option<String> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        self.tokens.get(token).cloned()
    }
}
