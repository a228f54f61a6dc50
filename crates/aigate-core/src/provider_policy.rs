use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::providers::ProviderKind;

/// Bounded-window admission budget: `limit` calls per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub limit: u32,
}

impl RateLimitPolicy {
    pub const fn per_minute(limit: u32) -> Self {
        Self {
            window: Duration::from_secs(60),
            limit,
        }
    }
}

/// Resilience settings attached to one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPolicy {
    pub breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitPolicy,
    pub timeout: Duration,
}

impl ProviderPolicy {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn openai_default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitPolicy::per_minute(60),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn anthropic_default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitPolicy::per_minute(50),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn speech_default() -> Self {
        Self {
            breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                ..CircuitBreakerConfig::default()
            },
            rate_limit: RateLimitPolicy::per_minute(20),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn scripted_default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitPolicy::per_minute(600),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn default_for(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::OpenAi => Self::openai_default(),
            ProviderKind::Anthropic => Self::anthropic_default(),
            ProviderKind::Speech => Self::speech_default(),
            ProviderKind::Scripted => Self::scripted_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_policy_matches_default_limits() {
        let policy = ProviderPolicy::openai_default();

        assert_eq!(policy.rate_limit.window, Duration::from_secs(60));
        assert_eq!(policy.rate_limit.limit, 60);
        assert_eq!(policy.breaker.failure_threshold, 5);
        assert_eq!(policy.breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(policy.breaker.success_threshold, 3);
        assert_eq!(policy.timeout, Duration::from_secs(30));
    }

    #[test]
    fn speech_policy_trips_earlier() {
        let policy = ProviderPolicy::default_for(ProviderKind::Speech);

        assert_eq!(policy.rate_limit.limit, 20);
        assert_eq!(policy.breaker.failure_threshold, 3);
    }
}
