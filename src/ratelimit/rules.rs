//! Named limit rules.
//!
//! Request handlers refer to a scope such as `ai_chat` rather than hard-coding
//! a number. Each scope carries its limit and, optionally, a namespace that
//! separates its windows from other scopes limiting the same session.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A limit applied to one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Requests allowed per window
    pub limit: u64,
    /// Key namespace; scopes without one share windows keyed by the bare subject
    #[serde(default)]
    pub namespace: Option<String>,
}

impl LimitRule {
    /// A rule with no namespace.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            namespace: None,
        }
    }
}

/// Scope lookup with a fallback limit.
#[derive(Debug, Clone)]
pub struct LimitRules {
    scopes: HashMap<String, LimitRule>,
    default_limit: u64,
}

impl LimitRules {
    /// Create rules from configured scopes.
    pub fn new(scopes: HashMap<String, LimitRule>, default_limit: u64) -> Self {
        Self {
            scopes,
            default_limit,
        }
    }

    /// Find the rule for a scope.
    pub fn get(&self, scope: &str) -> Option<&LimitRule> {
        self.scopes.get(scope)
    }

    /// Rule for a scope, or the default limit when the scope is unknown or absent.
    pub fn resolve(&self, scope: Option<&str>) -> LimitRule {
        scope
            .and_then(|s| self.get(s))
            .cloned()
            .unwrap_or_else(|| LimitRule::new(self.default_limit))
    }

    pub fn default_limit(&self) -> u64 {
        self.default_limit
    }
}
