//! Per-source cooldown tracking.
//!
//! The limiter is an explicit value owned by the application and handed to
//! each source client through a [`RateGate`]. Slots are keyed by source and an
//! optional scope (session or tenant), so two chat sessions sharing a process
//! can be isolated from each other when the caller asks for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::SearchError;
use crate::paper::SourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownPolicy {
    /// Reject early calls with [`SearchError::RateLimited`].
    FailFast,
    /// Suspend the caller until the cooldown has elapsed.
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownRule {
    pub cooldown: Duration,
    pub policy: CooldownPolicy,
}

impl CooldownRule {
    pub fn fail_fast(millis: u64) -> Self {
        Self {
            cooldown: Duration::from_millis(millis),
            policy: CooldownPolicy::FailFast,
        }
    }

    pub fn wait(millis: u64) -> Self {
        Self {
            cooldown: Duration::from_millis(millis),
            policy: CooldownPolicy::Wait,
        }
    }

    /// Built-in rule for a source; `None` means the remote service's own
    /// limits are relied upon.
    pub fn default_for(source: SourceKind) -> Option<Self> {
        match source {
            SourceKind::Arxiv => Some(Self::fail_fast(30_000)),
            SourceKind::SemanticScholar => Some(Self::wait(1_000)),
            SourceKind::Jstage => Some(Self::wait(1_000)),
            SourceKind::Core | SourceKind::Conference | SourceKind::Brave => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub source: SourceKind,
    pub scope: Option<String>,
}

impl RateKey {
    pub fn global(source: SourceKind) -> Self {
        Self {
            source,
            scope: None,
        }
    }

    pub fn scoped(source: SourceKind, scope: impl Into<String>) -> Self {
        Self {
            source,
            scope: Some(scope.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub wait: Duration,
}

impl RateDecision {
    pub fn wait_millis(&self) -> u64 {
        ceil_millis(self.wait)
    }
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    rules: HashMap<SourceKind, CooldownRule>,
    last_calls: Mutex<HashMap<RateKey, Instant>>,
}

impl RateLimiter {
    /// Limiter without any rules: every call is admitted immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limiter carrying the built-in rule of every source.
    pub fn with_defaults() -> Self {
        let mut limiter = Self::new();
        for source in SourceKind::ALL {
            if let Some(rule) = CooldownRule::default_for(source) {
                limiter.rules.insert(source, rule);
            }
        }
        limiter
    }

    pub fn with_rule(mut self, source: SourceKind, rule: CooldownRule) -> Self {
        self.rules.insert(source, rule);
        self
    }

    pub fn without_rule(mut self, source: SourceKind) -> Self {
        self.rules.remove(&source);
        self
    }

    pub fn rule(&self, source: SourceKind) -> Option<CooldownRule> {
        self.rules.get(&source).copied()
    }

    pub fn can_call_now(&self, key: &RateKey) -> RateDecision {
        let Some(rule) = self.rule(key.source) else {
            return RateDecision {
                allowed: true,
                wait: Duration::ZERO,
            };
        };
        let last_calls = self.lock();
        let wait = remaining(&last_calls, key, rule.cooldown, Instant::now());
        RateDecision {
            allowed: wait.is_zero(),
            wait,
        }
    }

    pub fn record_call(&self, key: &RateKey, at: Instant) {
        self.lock().insert(key.clone(), at);
    }

    /// Admits one call for `key` according to the source's rule.
    ///
    /// Waiting admissions reserve their slot before sleeping, so concurrent
    /// callers of the same key are spaced one cooldown apart.
    pub async fn acquire(&self, key: &RateKey) -> Result<(), SearchError> {
        let Some(rule) = self.rule(key.source) else {
            return Ok(());
        };

        let wait = {
            let mut last_calls = self.lock();
            let now = Instant::now();
            let wait = remaining(&last_calls, key, rule.cooldown, now);
            if rule.policy == CooldownPolicy::FailFast && !wait.is_zero() {
                let retry_after_ms = ceil_millis(wait);
                warn!(source = %key.source, retry_after_ms, "rejecting call during cooldown");
                return Err(SearchError::RateLimited {
                    origin: key.source,
                    retry_after_ms,
                });
            }
            last_calls.insert(key.clone(), now + wait);
            wait
        };

        if !wait.is_zero() {
            debug!(source = %key.source, wait_ms = ceil_millis(wait), "waiting out cooldown");
            sleep(wait).await;
        }
        Ok(())
    }

    /// Forgets every recorded call.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RateKey, Instant>> {
        self.last_calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn remaining(
    last_calls: &HashMap<RateKey, Instant>,
    key: &RateKey,
    cooldown: Duration,
    now: Instant,
) -> Duration {
    last_calls
        .get(key)
        .map(|last| (*last + cooldown).saturating_duration_since(now))
        .unwrap_or(Duration::ZERO)
}

fn ceil_millis(duration: Duration) -> u64 {
    let millis = duration.as_millis() as u64;
    if Duration::from_millis(millis) < duration {
        millis + 1
    } else {
        millis
    }
}

/// A limiter bound to one key, held by a source client.
#[derive(Debug, Clone)]
pub struct RateGate {
    limiter: Arc<RateLimiter>,
    key: RateKey,
}

impl RateGate {
    pub fn new(limiter: Arc<RateLimiter>, key: RateKey) -> Self {
        Self { limiter, key }
    }

    /// Gate that never delays, for sources without a cooldown.
    pub fn open(source: SourceKind) -> Self {
        Self::new(Arc::new(RateLimiter::new()), RateKey::global(source))
    }

    pub fn can_call_now(&self) -> RateDecision {
        self.limiter.can_call_now(&self.key)
    }

    pub async fn acquire(&self) -> Result<(), SearchError> {
        self.limiter.acquire(&self.key).await
    }
}
