//! Per-endpoint rate-limit tracking.
//!
//! Each provider endpoint carries an independent sliding-window request
//! budget. Local tracking is an optimistic approximation between responses;
//! quota headers reported by the provider are authoritative and override the
//! local estimate via [`RateLimitTracker::observe`].
//!
//! Each endpoint cycles `HAS_QUOTA -> EXHAUSTED -> (window reset) ->
//! HAS_QUOTA`. There is no cross-endpoint sharing of quota, so the tracker
//! holds one lock per endpoint: concurrent requests serialize only on the
//! acquire/observe step for the same endpoint, never on the network call.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

use crate::core::entity::Endpoint;
use crate::core::models::{EndpointQuota, QuotaHeaders};

/// Quota state for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitState {
    fn fresh(endpoint: Endpoint, now: DateTime<Utc>) -> Self {
        let limit = endpoint.request_limit();
        Self {
            limit,
            remaining: limit,
            reset_at: now + window_delta(endpoint),
        }
    }
}

/// Result of attempting to acquire a request permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Budget available; one unit has been consumed.
    Permit,
    /// Budget exhausted until the given reset time.
    WouldExceed { wait_until: DateTime<Utc> },
}

impl Acquire {
    /// Whether a permit was granted.
    #[must_use]
    pub const fn is_permit(&self) -> bool {
        matches!(self, Self::Permit)
    }
}

/// Tracks request budgets for every provider endpoint.
pub struct RateLimitTracker {
    states: HashMap<Endpoint, Mutex<RateLimitState>>,
}

impl RateLimitTracker {
    /// Create a tracker with every endpoint at full budget.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        let states = Endpoint::ALL
            .iter()
            .map(|&ep| (ep, Mutex::new(RateLimitState::fresh(ep, now))))
            .collect();
        Self { states }
    }

    /// Try to consume one unit of budget for an endpoint.
    ///
    /// Refills the window first if `reset_at` has passed. Never hands out a
    /// permit while `remaining` is zero inside a live window.
    pub fn acquire(&self, endpoint: Endpoint) -> Acquire {
        self.acquire_at(endpoint, Utc::now())
    }

    /// Clock-explicit variant of [`acquire`](Self::acquire).
    pub fn acquire_at(&self, endpoint: Endpoint, now: DateTime<Utc>) -> Acquire {
        let mut state = self.lock(endpoint);
        if now >= state.reset_at {
            state.remaining = state.limit;
            state.reset_at = now + window_delta(endpoint);
        }
        if state.remaining > 0 {
            state.remaining -= 1;
            Acquire::Permit
        } else {
            Acquire::WouldExceed {
                wait_until: state.reset_at,
            }
        }
    }

    /// Refund a permit for an attempt that never reached the provider.
    ///
    /// Clamped at the window limit, so a spurious double-release cannot push
    /// `remaining` above `limit`.
    pub fn release(&self, endpoint: Endpoint) {
        let mut state = self.lock(endpoint);
        state.remaining = (state.remaining + 1).min(state.limit);
    }

    /// Reconcile local state with provider-reported quota counters.
    ///
    /// The provider is the source of truth: both `remaining` and `reset_at`
    /// are taken from the headers, with `remaining` clamped to the configured
    /// limit.
    pub fn observe(&self, endpoint: Endpoint, headers: QuotaHeaders) {
        let mut state = self.lock(endpoint);
        state.remaining = headers.remaining.min(state.limit);
        state.reset_at = headers.reset_at;
    }

    /// Force a window refill (used when `now >= reset_at` is known).
    pub fn reset(&self, endpoint: Endpoint) {
        self.reset_at(endpoint, Utc::now());
    }

    /// Clock-explicit variant of [`reset`](Self::reset).
    pub fn reset_at(&self, endpoint: Endpoint, now: DateTime<Utc>) {
        let mut state = self.lock(endpoint);
        state.remaining = state.limit;
        state.reset_at = now + window_delta(endpoint);
    }

    /// Current state for one endpoint.
    #[must_use]
    pub fn state(&self, endpoint: Endpoint) -> RateLimitState {
        *self.lock(endpoint)
    }

    /// Snapshot of every endpoint's quota, keyed by endpoint id.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, EndpointQuota> {
        self.states
            .iter()
            .map(|(ep, state)| {
                let state = state.lock().unwrap_or_else(PoisonError::into_inner);
                (
                    ep.id().to_string(),
                    EndpointQuota {
                        limit: state.limit,
                        remaining: state.remaining,
                        reset_at: state.reset_at,
                    },
                )
            })
            .collect()
    }

    fn lock(&self, endpoint: Endpoint) -> std::sync::MutexGuard<'_, RateLimitState> {
        self.states
            .get(&endpoint)
            .expect("tracker initialized with every endpoint")
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn window_delta(endpoint: Endpoint) -> TimeDelta {
    TimeDelta::seconds(endpoint.window().as_secs() as i64)
}
