//! Gateway orchestration: cache, admission, breaker-gated dispatch, fallback cascade.
//!
//! ```text
//! invoke ──► cache hit? ──yes──► cached result
//!               │ no
//!               ▼
//!    for each candidate (registry order)
//!      admit? ──no──► RateLimited, next
//!      breaker.execute(timeout(provider.invoke))
//!        Ok ──► cache (full TTL) ──► result
//!        Open / error / timeout ──► next
//!               │ exhausted
//!               ▼
//!    local fallback ──► cache (degraded TTL) ──► degraded result
//! ```
//!
//! [`Gateway::invoke`] never fails. Provider failures only show up in the
//! returned `provider_used` / `degraded` fields, in logs, and in the
//! [`InvocationTrace`] returned by [`Gateway::invoke_detailed`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::circuit_breaker::BreakerError;
use crate::config::{AppConfig, CacheSettings};
use crate::error::ConfigError;
use crate::fallback;
use crate::health::{HealthAggregator, HealthReport};
use crate::providers::{ProviderError, ProviderErrorKind};
use crate::registry::{ProviderDescriptor, ProviderRegistry, RoutingHints};
use crate::request::{InvokeOptions, Payload, RequestEnvelope};
use crate::response::{duration_ms, ResponseResult};
use crate::telemetry;
use crate::throttling::{Admission, AdmissionControl};
use crate::Capability;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3_600);
const DEFAULT_DEGRADED_TTL: Duration = Duration::from_secs(300);

/// What happened when the gateway considered one candidate provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// Admission denied; the breaker was not consulted.
    RateLimited { retry_after_ms: u64 },
    /// Rejected by an open or probing breaker without calling the provider.
    CircuitOpen,
    Failed {
        kind: ProviderErrorKind,
        message: String,
    },
    TimedOut,
    /// Not attempted because the caller deadline was spent.
    DeadlineExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub provider: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

/// Per-invocation record of the cascade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationTrace {
    pub trace_id: Uuid,
    pub capability: Capability,
    pub cache_key: String,
    pub cache_hit: bool,
    pub attempts: Vec<Attempt>,
}

impl InvocationTrace {
    fn new(envelope: &RequestEnvelope) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            capability: envelope.capability,
            cache_key: envelope.cache_key.clone(),
            cache_hit: false,
            attempts: Vec::new(),
        }
    }

    fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|attempt| format!("{}={}", attempt.provider, attempt.outcome.label()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl AttemptOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::Failed { kind, .. } => kind.as_str(),
            Self::TimedOut => "timed_out",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// Snapshot of the gateway's lifetime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GatewayStats {
    pub invocations: u64,
    pub cache_hits: u64,
    pub provider_successes: u64,
    pub degraded: u64,
    pub rate_limited: u64,
    pub circuit_open: u64,
    pub provider_failures: u64,
}

#[derive(Debug, Default)]
struct GatewayCounters {
    invocations: AtomicU64,
    cache_hits: AtomicU64,
    provider_successes: AtomicU64,
    degraded: AtomicU64,
    rate_limited: AtomicU64,
    circuit_open: AtomicU64,
    provider_failures: AtomicU64,
}

impl GatewayCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GatewayStats {
        GatewayStats {
            invocations: self.invocations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            provider_successes: self.provider_successes.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            circuit_open: self.circuit_open.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
        }
    }
}

/// Single entry point for capability invocations.
pub struct Gateway {
    registry: Arc<ProviderRegistry>,
    admission: Arc<dyn AdmissionControl>,
    cache: ResultCache,
    cache_ttl: Duration,
    degraded_ttl: Duration,
    counters: GatewayCounters,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("providers", &self.registry.len())
            .field("cache_entries", &self.cache.len())
            .field("cache_ttl", &self.cache_ttl)
            .field("degraded_ttl", &self.degraded_ttl)
            .finish()
    }
}

impl Gateway {
    /// Gateway over `registry`, admitting through the registry's rate limiter.
    pub fn new(registry: ProviderRegistry) -> Self {
        let registry = Arc::new(registry);
        let admission: Arc<dyn AdmissionControl> = registry.rate_limiter().clone();
        Self {
            registry,
            admission,
            cache: ResultCache::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            degraded_ttl: DEFAULT_DEGRADED_TTL,
            counters: GatewayCounters::default(),
        }
    }

    /// Validate `config`, build the registry from it, and apply cache settings.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = ProviderRegistry::builder().with_config(config).build()?;
        Ok(Self::new(registry).with_cache_settings(&config.cache))
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration, degraded_ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self.degraded_ttl = degraded_ttl;
        self
    }

    pub fn with_cache_settings(self, settings: &CacheSettings) -> Self {
        let cache = if settings.enabled && !settings.ttl().is_zero() {
            ResultCache::new(settings.max_entries)
        } else {
            ResultCache::disabled()
        };
        self.with_cache(cache)
            .with_cache_ttl(settings.ttl(), settings.degraded_ttl())
    }

    /// Replace the admission control consulted before each provider call.
    pub fn with_admission(mut self, admission: Arc<dyn AdmissionControl>) -> Self {
        self.admission = admission;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn invoke(
        &self,
        capability: Capability,
        payload: Payload,
        options: InvokeOptions,
    ) -> ResponseResult {
        let envelope = RequestEnvelope::new(capability, payload, options);
        self.run(&envelope, None).await.0
    }

    /// Like [`Gateway::invoke`], but no provider call runs past `deadline`.
    pub async fn invoke_with_deadline(
        &self,
        capability: Capability,
        payload: Payload,
        options: InvokeOptions,
        deadline: Instant,
    ) -> ResponseResult {
        let envelope = RequestEnvelope::new(capability, payload, options);
        self.run(&envelope, Some(deadline)).await.0
    }

    /// Invoke and return the per-candidate attempt trail alongside the result.
    pub async fn invoke_detailed(
        &self,
        capability: Capability,
        payload: Payload,
        options: InvokeOptions,
        deadline: Option<Instant>,
    ) -> (ResponseResult, InvocationTrace) {
        let envelope = RequestEnvelope::new(capability, payload, options);
        self.run(&envelope, deadline).await
    }

    /// Close the named provider's circuit. Returns `false` for unknown providers.
    pub fn force_reset(&self, provider: &str) -> bool {
        match self.registry.get(provider) {
            Some(descriptor) => {
                descriptor.breaker().force_reset();
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> GatewayStats {
        self.counters.snapshot()
    }

    pub fn health(&self) -> HealthAggregator {
        HealthAggregator::new(Arc::clone(&self.registry))
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport::build(&self.health(), self.stats())
    }

    async fn run(
        &self,
        envelope: &RequestEnvelope,
        deadline: Option<Instant>,
    ) -> (ResponseResult, InvocationTrace) {
        let started = Instant::now();
        let mut trace = InvocationTrace::new(envelope);
        let cache_mode = envelope.options.cache_mode();

        GatewayCounters::bump(&self.counters.invocations);
        telemetry::record_invocation(envelope.capability);

        if cache_mode.reads() {
            if let Some(cached) = self.cache.get(&envelope.cache_key) {
                GatewayCounters::bump(&self.counters.cache_hits);
                telemetry::record_cache_hit(envelope.capability);
                debug!(
                    trace_id = %trace.trace_id,
                    capability = %envelope.capability,
                    provider = %cached.provider_used,
                    "cache hit"
                );
                trace.cache_hit = true;
                return (cached, trace);
            }
        }

        let candidates = self
            .registry
            .candidates_for(envelope.capability, RoutingHints::from_envelope(envelope));

        for (index, descriptor) in candidates.iter().enumerate() {
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            if remaining.is_some_and(|remaining| remaining.is_zero()) {
                debug!(
                    trace_id = %trace.trace_id,
                    skipped = candidates.len() - index,
                    "caller deadline spent; skipping remaining providers"
                );
                trace.attempts.extend(candidates[index..].iter().map(|skipped| Attempt {
                    provider: skipped.name().to_owned(),
                    outcome: AttemptOutcome::DeadlineExceeded,
                    elapsed_ms: 0,
                }));
                break;
            }

            let attempt_started = Instant::now();
            let budget = remaining.map_or(descriptor.timeout(), |remaining| {
                remaining.min(descriptor.timeout())
            });

            match self.attempt(descriptor, envelope, budget, &trace).await {
                Ok(result) => {
                    trace.attempts.push(Attempt {
                        provider: descriptor.name().to_owned(),
                        outcome: AttemptOutcome::Succeeded,
                        elapsed_ms: duration_ms(attempt_started.elapsed()),
                    });
                    let result = ResponseResult {
                        latency_ms: duration_ms(started.elapsed()),
                        ..result
                    };
                    if cache_mode.writes() {
                        self.cache
                            .put(envelope.cache_key.clone(), result.clone(), self.cache_ttl);
                    }
                    return (result, trace);
                }
                Err(outcome) => trace.attempts.push(Attempt {
                    provider: descriptor.name().to_owned(),
                    outcome,
                    elapsed_ms: duration_ms(attempt_started.elapsed()),
                }),
            }
        }

        let computed = fallback::compute(envelope.capability, &envelope.payload, &envelope.options);
        let result = ResponseResult::local_fallback(
            computed.output,
            computed.confidence,
            started.elapsed(),
        );

        GatewayCounters::bump(&self.counters.degraded);
        telemetry::record_degraded(envelope.capability);
        warn!(
            trace_id = %trace.trace_id,
            capability = %envelope.capability,
            attempts = %trace.summary(),
            "all providers unavailable; serving local fallback"
        );

        if cache_mode.writes() {
            self.cache
                .put(envelope.cache_key.clone(), result.clone(), self.degraded_ttl);
        }
        (result, trace)
    }

    async fn attempt(
        &self,
        descriptor: &ProviderDescriptor,
        envelope: &RequestEnvelope,
        budget: Duration,
        trace: &InvocationTrace,
    ) -> Result<ResponseResult, AttemptOutcome> {
        let name = descriptor.name();

        if let Admission::Denied { retry_after } = self.check_admission(descriptor) {
            GatewayCounters::bump(&self.counters.rate_limited);
            telemetry::record_rate_limited(name);
            debug!(
                trace_id = %trace.trace_id,
                provider = %name,
                retry_after_ms = duration_ms(retry_after),
                "rate limit exceeded; trying next provider"
            );
            return Err(AttemptOutcome::RateLimited {
                retry_after_ms: duration_ms(retry_after),
            });
        }

        let provider = descriptor.provider();
        let started = Instant::now();
        let outcome = descriptor
            .breaker()
            .execute(|| async {
                match tokio::time::timeout(budget, provider.invoke(envelope)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::timeout(
                        name,
                        format!("no response within {} ms", duration_ms(budget)),
                    )),
                }
            })
            .await;

        match outcome {
            Ok(reply) => {
                let latency = started.elapsed();
                GatewayCounters::bump(&self.counters.provider_successes);
                telemetry::record_provider_latency(name, latency);
                info!(
                    trace_id = %trace.trace_id,
                    provider = %name,
                    capability = %envelope.capability,
                    latency_ms = duration_ms(latency),
                    "provider call succeeded"
                );
                Ok(ResponseResult::from_provider(name, reply, latency))
            }
            Err(BreakerError::Open { .. }) => {
                GatewayCounters::bump(&self.counters.circuit_open);
                debug!(
                    trace_id = %trace.trace_id,
                    provider = %name,
                    "circuit open; trying next provider"
                );
                Err(AttemptOutcome::CircuitOpen)
            }
            Err(BreakerError::Operation(failure)) => {
                GatewayCounters::bump(&self.counters.provider_failures);
                telemetry::record_provider_failure(name, failure.kind().as_str());
                Err(Self::classify_failure(&failure, trace))
            }
        }
    }

    fn check_admission(&self, descriptor: &ProviderDescriptor) -> Admission {
        self.admission.check(descriptor.policy_key())
    }

    fn classify_failure(failure: &ProviderError, trace: &InvocationTrace) -> AttemptOutcome {
        match failure.kind() {
            ProviderErrorKind::Permanent => {
                error!(
                    trace_id = %trace.trace_id,
                    provider = %failure.provider(),
                    status = failure.status(),
                    error = %failure,
                    "provider rejected request; trying next provider"
                );
                AttemptOutcome::Failed {
                    kind: ProviderErrorKind::Permanent,
                    message: failure.message().to_owned(),
                }
            }
            ProviderErrorKind::Transient => {
                warn!(
                    trace_id = %trace.trace_id,
                    provider = %failure.provider(),
                    status = failure.status(),
                    error = %failure,
                    "provider call failed; trying next provider"
                );
                AttemptOutcome::Failed {
                    kind: ProviderErrorKind::Transient,
                    message: failure.message().to_owned(),
                }
            }
            ProviderErrorKind::Timeout => {
                warn!(
                    trace_id = %trace.trace_id,
                    provider = %failure.provider(),
                    error = %failure,
                    "provider call timed out; trying next provider"
                );
                AttemptOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::provider_policy::{ProviderPolicy, RateLimitPolicy};
    use crate::providers::{Provider, ScriptedProvider, Step};
    use crate::registry::ProviderSettings;
    use crate::response::{Output, LOCAL_FALLBACK};
    use crate::CapabilitySet;

    fn policy(failure_threshold: u32) -> ProviderPolicy {
        ProviderPolicy {
            breaker: CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout: Duration::from_secs(60),
                success_threshold: 1,
            },
            rate_limit: RateLimitPolicy::per_minute(1_000),
            timeout: Duration::from_secs(5),
        }
    }

    fn gateway(providers: Vec<(Arc<ScriptedProvider>, u32)>) -> Gateway {
        let builder = providers
            .into_iter()
            .fold(ProviderRegistry::builder(), |builder, (provider, priority)| {
                let provider: Arc<dyn Provider> = provider;
                builder.register(provider, ProviderSettings::new(priority).with_policy(policy(2)))
            });
        Gateway::new(builder.build().expect("unique names"))
    }

    fn text_provider(name: &str, steps: Vec<Step>) -> Arc<ScriptedProvider> {
        Arc::new(
            ScriptedProvider::new(name)
                .with_capabilities(CapabilitySet::text())
                .with_script(steps),
        )
    }

    #[tokio::test]
    async fn first_healthy_provider_answers() {
        let primary = text_provider("primary", vec![]);
        let gateway = gateway(vec![(primary.clone(), 10)]);

        let result = gateway
            .invoke(Capability::ImproveText, Payload::text("hello"), InvokeOptions::new())
            .await;

        assert_eq!(result.provider_used, "primary");
        assert!(!result.degraded);
        assert_eq!(result.output, Output::text("Hello."));
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn cascades_past_failing_provider() {
        let primary = text_provider("primary", vec![Step::Transient]);
        let secondary = text_provider("secondary", vec![]);
        let gateway = gateway(vec![(primary, 10), (secondary, 20)]);

        let (result, trace) = gateway
            .invoke_detailed(
                Capability::Sentiment,
                Payload::text("great service"),
                InvokeOptions::new(),
                None,
            )
            .await;

        assert_eq!(result.provider_used, "secondary");
        assert_eq!(trace.attempts.len(), 2);
        assert!(matches!(
            trace.attempts[0].outcome,
            AttemptOutcome::Failed {
                kind: ProviderErrorKind::Transient,
                ..
            }
        ));
        assert_eq!(trace.attempts[1].outcome, AttemptOutcome::Succeeded);
        assert_eq!(gateway.stats().provider_failures, 1);
    }

    #[tokio::test]
    async fn exhausted_cascade_degrades_to_local_fallback() {
        let primary = text_provider("primary", vec![Step::Permanent]);
        let gateway = gateway(vec![(primary, 10)]);

        let result = gateway
            .invoke(
                Capability::Classify,
                Payload::text("pothole on the main road"),
                InvokeOptions::new(),
            )
            .await;

        assert!(result.degraded);
        assert_eq!(result.provider_used, LOCAL_FALLBACK);
        assert_eq!(result.output.label(), Some("infrastructure"));
        assert_eq!(gateway.stats().degraded, 1);
    }

    #[tokio::test]
    async fn no_candidates_goes_straight_to_fallback() {
        let gateway = gateway(vec![(text_provider("text-only", vec![]), 10)]);

        let (result, trace) = gateway
            .invoke_detailed(
                Capability::SpeechToText,
                Payload::audio(vec![0, 1, 2]),
                InvokeOptions::new(),
                None,
            )
            .await;

        assert!(result.degraded);
        assert!(trace.attempts.is_empty());
    }

    #[tokio::test]
    async fn open_circuit_is_skipped_without_calling_provider() {
        let primary = text_provider("primary", vec![Step::Transient, Step::Transient]);
        let secondary = text_provider("secondary", vec![]);
        let gateway = gateway(vec![(primary.clone(), 10), (secondary, 20)]);
        let options = InvokeOptions::new().with("cache", "bypass");

        for _ in 0..2 {
            gateway
                .invoke(Capability::ImproveText, Payload::text("one"), options.clone())
                .await;
        }
        let breaker = gateway.registry().get("primary").expect("registered").breaker();
        assert_eq!(breaker.state(), CircuitState::Open);

        let (result, trace) = gateway
            .invoke_detailed(Capability::ImproveText, Payload::text("one"), options, None)
            .await;

        assert_eq!(result.provider_used, "secondary");
        assert_eq!(trace.attempts[0].outcome, AttemptOutcome::CircuitOpen);
        assert_eq!(primary.calls(), 2);
        assert!(gateway.force_reset("primary"));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(!gateway.force_reset("missing"));
    }

    #[tokio::test]
    async fn cache_hit_returns_identical_result_without_provider_calls() {
        let primary = text_provider("primary", vec![]);
        let gateway = gateway(vec![(primary.clone(), 10)]).with_cache(ResultCache::new(16));

        let first = gateway
            .invoke(Capability::Summarize, Payload::text("One. Two. Three."), InvokeOptions::new())
            .await;
        let (second, trace) = gateway
            .invoke_detailed(
                Capability::Summarize,
                Payload::text("  One.   Two. Three. "),
                InvokeOptions::new(),
                None,
            )
            .await;

        assert_eq!(first, second);
        assert!(trace.cache_hit);
        assert_eq!(primary.calls(), 1);
        assert_eq!(gateway.stats().cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out_and_cascades() {
        let slow = text_provider("slow", vec![Step::Hang]);
        let fast = text_provider("fast", vec![]);
        let gateway = gateway(vec![(slow, 10), (fast, 20)]);

        let (result, trace) = gateway
            .invoke_detailed(Capability::ImproveText, Payload::text("hi"), InvokeOptions::new(), None)
            .await;

        assert_eq!(result.provider_used, "fast");
        assert_eq!(trace.attempts[0].outcome, AttemptOutcome::TimedOut);
        assert!(trace.attempts[0].elapsed_ms >= 5_000);
    }
}
