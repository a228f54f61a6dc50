use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter as GovernorLimiter};
use serde::Serialize;

use crate::provider_policy::RateLimitPolicy;

type DirectRateLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Budget exhausted. `retry_after` is informational; callers do not wait.
    Denied { retry_after: Duration },
}

impl Admission {
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Admission control consulted before every provider call.
pub trait AdmissionControl: Send + Sync {
    fn check(&self, policy_key: &str) -> Admission;

    fn admit(&self, policy_key: &str) -> bool {
        self.check(policy_key).is_admitted()
    }
}

/// Lifetime admission counters for one policy key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AdmissionCounters {
    pub admitted: u64,
    pub denied: u64,
}

struct PolicyLimiter {
    policy: RateLimitPolicy,
    limiter: DirectRateLimiter,
    admitted: AtomicU64,
    denied: AtomicU64,
}

/// In-memory rate limiter with one bounded-window budget per policy key.
///
/// Keys without a registered policy are always admitted.
pub struct RateLimiter {
    limiters: HashMap<String, PolicyLimiter>,
    clock: DefaultClock,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for RateLimiter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut keys = self.limiters.keys().collect::<Vec<_>>();
        keys.sort();
        f.debug_struct("RateLimiter").field("keys", &keys).finish()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            limiters: HashMap::new(),
            clock: DefaultClock::default(),
        }
    }

    pub fn register(&mut self, policy_key: impl Into<String>, policy: RateLimitPolicy) {
        let quota = quota_from_window(policy.window, policy.limit);
        self.limiters.insert(
            policy_key.into(),
            PolicyLimiter {
                policy,
                limiter: GovernorLimiter::direct(quota),
                admitted: AtomicU64::new(0),
                denied: AtomicU64::new(0),
            },
        );
    }

    pub fn with_policy(mut self, policy_key: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.register(policy_key, policy);
        self
    }

    pub fn policy(&self, policy_key: &str) -> Option<RateLimitPolicy> {
        self.limiters.get(policy_key).map(|entry| entry.policy)
    }

    pub fn counters(&self, policy_key: &str) -> Option<AdmissionCounters> {
        self.limiters.get(policy_key).map(|entry| AdmissionCounters {
            admitted: entry.admitted.load(Ordering::Relaxed),
            denied: entry.denied.load(Ordering::Relaxed),
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }
}

impl AdmissionControl for RateLimiter {
    fn check(&self, policy_key: &str) -> Admission {
        let Some(entry) = self.limiters.get(policy_key) else {
            return Admission::Admitted;
        };

        match entry.limiter.check() {
            Ok(()) => {
                entry.admitted.fetch_add(1, Ordering::Relaxed);
                Admission::Admitted
            }
            Err(not_until) => {
                entry.denied.fetch_add(1, Ordering::Relaxed);
                Admission::Denied {
                    retry_after: not_until.wait_time_from(self.clock.now()),
                }
            }
        }
    }
}

fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .map(|quota| quota.allow_burst(burst))
        .unwrap_or_else(|| Quota::per_second(burst))
}
