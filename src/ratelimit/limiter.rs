//! Core rate limiter implementation.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::key::LimitKey;
use super::locks::KeyLocks;
use super::rules::LimitRules;
use super::window::{RateWindow, Transition};
use crate::clock::{Clock, SystemClock};
use crate::config::{Consistency, LimitingConfig, RateWindowConfig, StorageErrorPolicy};
use crate::error::{RateWindowError, Result};
use crate::store::{self, StoreError, WindowStore};

/// Behaviour shared by every limiter handed out by a context.
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    /// Window length in seconds
    pub window_secs: u64,
    /// Key used for callers without an identifier
    pub guest_key: String,
    pub consistency: Consistency,
    pub on_storage_error: StorageErrorPolicy,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self::from(&LimitingConfig::default())
    }
}

impl From<&LimitingConfig> for LimiterSettings {
    fn from(config: &LimitingConfig) -> Self {
        Self {
            window_secs: config.window_secs,
            guest_key: config.guest_key.clone(),
            consistency: config.consistency,
            on_storage_error: config.on_storage_error,
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests counted in the current window, this one included
    pub count: u64,
    pub limit: u64,
    /// Requests left before the limit is reached
    pub remaining: u64,
    /// Unix timestamp at which the current window began
    pub window_start: i64,
    /// Seconds until a check would open a fresh window
    pub retry_after_secs: u64,
    #[serde(skip)]
    pub transition: Transition,
}

/// Shared state for handing out limiters.
///
/// Limiters created from one context share its store, clock and lock table,
/// so under strict consistency concurrent checks for the same key are
/// serialized even when each request builds its own limiter.
#[derive(Clone)]
pub struct LimiterContext {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyLocks>,
    settings: LimiterSettings,
    rules: LimitRules,
}

impl LimiterContext {
    /// Create a context over `store` with the wall clock and default settings.
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        let defaults = LimitingConfig::default();
        Self {
            store,
            clock: Arc::new(SystemClock),
            locks: Arc::new(KeyLocks::new()),
            settings: LimiterSettings::from(&defaults),
            rules: LimitRules::new(Default::default(), defaults.default_limit),
        }
    }

    /// Build the configured store, settings, and scope rules.
    pub fn from_config(config: &RateWindowConfig) -> Self {
        let store = store::from_config(&config.storage);
        Self::new(store)
            .with_settings(LimiterSettings::from(&config.limiting))
            .with_rules(LimitRules::new(
                config.scopes.clone(),
                config.limiting.default_limit,
            ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: LimiterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_rules(mut self, rules: LimitRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    pub fn rules(&self) -> &LimitRules {
        &self.rules
    }

    /// Create a limiter for a caller identifier and an explicit limit.
    ///
    /// Fails with `InvalidArgument` when `limit` is zero.
    pub fn limiter(&self, key: Option<&str>, limit: u64) -> Result<RateLimiter> {
        self.build(LimitKey::new(key, &self.settings.guest_key), limit)
    }

    /// Create a limiter using a configured scope's limit and namespace.
    pub fn limiter_for_scope(&self, key: Option<&str>, scope: &str) -> Result<RateLimiter> {
        let rule = self
            .rules
            .get(scope)
            .ok_or_else(|| RateWindowError::InvalidArgument(format!("unknown scope: {scope}")))?;

        let key = LimitKey::new(key, &self.settings.guest_key)
            .with_namespace(rule.namespace.as_deref());
        self.build(key, rule.limit)
    }

    /// Create a limiter using the default limit.
    pub fn default_limiter(&self, key: Option<&str>) -> Result<RateLimiter> {
        let rule = self.rules.resolve(None);
        self.build(LimitKey::new(key, &self.settings.guest_key), rule.limit)
    }

    fn build(&self, key: LimitKey, limit: u64) -> Result<RateLimiter> {
        if limit == 0 {
            return Err(RateWindowError::InvalidArgument(
                "limit must be a positive integer".to_string(),
            ));
        }

        let locks = match self.settings.consistency {
            Consistency::Strict => Some(self.locks.clone()),
            Consistency::Relaxed => None,
        };

        Ok(RateLimiter {
            key,
            limit,
            store: self.store.clone(),
            clock: self.clock.clone(),
            locks,
            window_secs: self.settings.window_secs,
            on_storage_error: self.settings.on_storage_error,
        })
    }
}

/// A fixed-window limiter bound to one key and limit.
pub struct RateLimiter {
    key: LimitKey,
    limit: u64,
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    /// Present under strict consistency
    locks: Option<Arc<KeyLocks>>,
    window_secs: u64,
    on_storage_error: StorageErrorPolicy,
}

impl RateLimiter {
    /// Create a standalone limiter over `store` with default settings.
    ///
    /// Limiters created this way do not share a lock table; use a
    /// [`LimiterContext`] when several limiters may check the same key
    /// concurrently.
    pub fn new(key: Option<&str>, limit: u64, store: Arc<dyn WindowStore>) -> Result<Self> {
        LimiterContext::new(store).limiter(key, limit)
    }

    /// Count this request and report whether it may proceed.
    ///
    /// `false` means the caller should answer with HTTP 429.
    pub async fn check(&self) -> Result<bool> {
        Ok(self.check_status().await?.allowed)
    }

    /// Count this request and report the full window status.
    pub async fn check_status(&self) -> Result<WindowStatus> {
        let key = self.key.to_string_key();

        let _guard = match &self.locks {
            Some(locks) => Some(locks.lock(&key).await),
            None => None,
        };

        let now = self.clock.now();
        let previous = self.load(&key).await;
        let (window, transition) = RateWindow::advance(previous, now, self.window_secs);

        if let Err(e) = self.store.put(&key, &window).await {
            match self.on_storage_error {
                StorageErrorPolicy::Log => {
                    warn!(key = %key, error = %e, "Failed to persist rate window");
                }
                StorageErrorPolicy::Fail => return Err(e.into()),
            }
        }

        let allowed = window.count <= self.limit;

        trace!(
            key = %key,
            count = window.count,
            limit = self.limit,
            transition = ?transition,
            "Checked rate window"
        );

        if !allowed {
            debug!(key = %key, count = window.count, limit = self.limit, "Rate limit exceeded");
        }

        Ok(WindowStatus {
            allowed,
            count: window.count,
            limit: self.limit,
            remaining: self.limit.saturating_sub(window.count),
            window_start: window.window_start,
            retry_after_secs: window.retry_after(now, self.window_secs),
            transition,
        })
    }

    /// Read the persisted window without counting a request.
    pub async fn peek(&self) -> Result<Option<RateWindow>> {
        match self.store.get(&self.key.to_string_key()).await {
            Ok(window) => Ok(window),
            Err(StoreError::Malformed { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn key(&self) -> &LimitKey {
        &self.key
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Previous window for `key`; unreadable or malformed records count as absent.
    async fn load(&self, key: &str) -> Option<RateWindow> {
        match self.store.get(key).await {
            Ok(window) => window,
            Err(e @ StoreError::Malformed { .. }) => {
                warn!(key = %key, error = %e, "Discarding malformed rate window");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read rate window, opening a fresh one");
                None
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("key", &self.key)
            .field("limit", &self.limit)
            .field("window_secs", &self.window_secs)
            .field("strict", &self.locks.is_some())
            .finish()
    }
}
