use std::sync::Arc;
use std::time::Duration;

use aigate_core::{
    Admission, AdmissionControl, AttemptOutcome, Capability, CapabilitySet, CircuitBreakerConfig,
    CacheSettings, CircuitState, Gateway, InvokeOptions, OverallStatus, Payload, Provider, ProviderPolicy,
    ProviderRegistry, ProviderSettings, RateLimitPolicy, ResultCache, ScriptedProvider, Step,
    LOCAL_FALLBACK,
};

fn policy(failure_threshold: u32, requests_per_minute: u32) -> ProviderPolicy {
    ProviderPolicy {
        breaker: CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout: Duration::from_secs(120),
            success_threshold: 1,
        },
        rate_limit: RateLimitPolicy::per_minute(requests_per_minute),
        timeout: Duration::from_secs(30),
    }
}

fn scripted(name: &str, steps: Vec<Step>) -> Arc<ScriptedProvider> {
    Arc::new(
        ScriptedProvider::new(name)
            .with_capabilities(CapabilitySet::text())
            .with_script(steps),
    )
}

fn gateway(entries: Vec<(Arc<ScriptedProvider>, ProviderSettings)>) -> Gateway {
    let builder = entries
        .into_iter()
        .fold(ProviderRegistry::builder(), |builder, (provider, settings)| {
            let provider: Arc<dyn Provider> = provider;
            builder.register(provider, settings)
        });
    Gateway::new(builder.build().expect("registry builds"))
}

fn bypass() -> InvokeOptions {
    InvokeOptions::new().with("cache", "bypass")
}

struct DenyAll;

impl AdmissionControl for DenyAll {
    fn check(&self, _policy_key: &str) -> Admission {
        Admission::Denied {
            retry_after: Duration::from_secs(1),
        }
    }
}

#[tokio::test]
async fn test_invoke_never_fails_when_every_provider_is_open_or_throttled() {
    let tripped = scripted("tripped", vec![Step::Transient]);
    let throttled = scripted("throttled", vec![]);
    let gateway = gateway(vec![
        (tripped.clone(), ProviderSettings::new(10).with_policy(policy(1, 100))),
        (throttled.clone(), ProviderSettings::new(20).with_policy(policy(5, 1))),
    ]);

    let warmup = gateway
        .invoke(Capability::Sentiment, Payload::text("fine"), bypass())
        .await;
    assert_eq!(warmup.provider_used, "throttled");

    let (result, trace) = gateway
        .invoke_detailed(
            Capability::Sentiment,
            Payload::text("the bridge repair was excellent"),
            bypass(),
            None,
        )
        .await;

    assert!(result.degraded);
    assert_eq!(result.provider_used, LOCAL_FALLBACK);
    assert_eq!(result.output.label(), Some("positive"));
    assert_eq!(trace.attempts[0].outcome, AttemptOutcome::CircuitOpen);
    assert!(matches!(
        trace.attempts[1].outcome,
        AttemptOutcome::RateLimited { .. }
    ));
    assert_eq!(tripped.calls(), 1);
    assert_eq!(throttled.calls(), 1);

    let report = gateway.health_report();
    assert_eq!(report.services["tripped"].breaker.state, CircuitState::Open);
    assert_eq!(report.overall, OverallStatus::Degraded);
}

#[tokio::test]
async fn test_identical_calls_within_ttl_are_byte_identical() {
    let primary = scripted("primary", vec![]);
    let gateway = gateway(vec![(primary.clone(), ProviderSettings::new(1))])
        .with_cache(ResultCache::new(64))
        .with_cache_ttl(Duration::from_secs(60), Duration::from_secs(5));
    let options = InvokeOptions::new().with("categories", "roads,parks");

    let first = gateway
        .invoke(Capability::Classify, Payload::text("Pothole on Main road"), options.clone())
        .await;
    let second = gateway
        .invoke(Capability::Classify, Payload::text("Pothole on Main road"), options)
        .await;

    assert_eq!(
        serde_json::to_vec(&first).expect("serializes"),
        serde_json::to_vec(&second).expect("serializes")
    );
    assert_eq!(primary.calls(), 1);
}

#[tokio::test]
async fn test_rate_limit_denial_never_counts_against_breaker() {
    let limited = scripted("limited", vec![Step::Transient]);
    let gateway = gateway(vec![(
        limited.clone(),
        ProviderSettings::new(1).with_policy(policy(3, 1)),
    )]);
    let breaker = Arc::clone(gateway.registry().get("limited").expect("registered").breaker());

    gateway
        .invoke(Capability::ImproveText, Payload::text("first"), bypass())
        .await;
    let before = breaker.snapshot();
    assert_eq!(before.failure_count, 1);

    for _ in 0..3 {
        let result = gateway
            .invoke(Capability::ImproveText, Payload::text("again"), bypass())
            .await;
        assert!(result.degraded);
    }

    let after = breaker.snapshot();
    assert_eq!(after.failure_count, before.failure_count);
    assert_eq!(after.state, CircuitState::Closed);
    assert_eq!(after.totals.calls, before.totals.calls);
    assert_eq!(limited.calls(), 1);
    assert_eq!(gateway.stats().rate_limited, 3);
}

#[tokio::test]
async fn test_injected_admission_control_cascades_without_calls() {
    let primary = scripted("primary", vec![]);
    let gateway = gateway(vec![(primary.clone(), ProviderSettings::new(1))])
        .with_admission(Arc::new(DenyAll));

    let (result, trace) = gateway
        .invoke_detailed(Capability::Summarize, Payload::text("One. Two. Three."), bypass(), None)
        .await;

    assert!(result.degraded);
    assert_eq!(result.output.as_text(), Some("One. Two."));
    assert_eq!(
        trace.attempts[0].outcome,
        AttemptOutcome::RateLimited {
            retry_after_ms: 1_000
        }
    );
    assert_eq!(primary.calls(), 0);
}

#[tokio::test]
async fn test_short_high_priority_request_prefers_fast_provider() {
    let steady = scripted("steady", vec![]);
    let quick = scripted("quick", vec![]);
    let gateway = gateway(vec![
        (steady.clone(), ProviderSettings::new(10)),
        (quick.clone(), ProviderSettings::new(20).fast()),
    ]);

    let urgent = gateway
        .invoke(
            Capability::Classify,
            Payload::text("gas leak"),
            InvokeOptions::new().with("priority", "high").with("cache", "bypass"),
        )
        .await;
    let routine = gateway
        .invoke(Capability::Classify, Payload::text("gas leak"), bypass())
        .await;

    assert_eq!(urgent.provider_used, "quick");
    assert_eq!(routine.provider_used, "steady");
}

#[tokio::test]
async fn test_long_payload_prefers_large_input_provider() {
    let limited = scripted("limited", vec![]);
    let roomy = scripted("roomy", vec![]);
    let gateway = gateway(vec![
        (limited, ProviderSettings::new(1).with_max_input_chars(1_000)),
        (roomy, ProviderSettings::new(50).large_input()),
    ]);
    let long_text = "The council meeting discussed the water supply. ".repeat(120);

    let result = gateway
        .invoke(Capability::Summarize, Payload::text(long_text), bypass())
        .await;

    assert_eq!(result.provider_used, "roomy");
}

#[tokio::test(start_paused = true)]
async fn test_caller_deadline_bounds_provider_calls() {
    let stuck = scripted("stuck", vec![Step::Hang]);
    let backup = scripted("backup", vec![]);
    let gateway = gateway(vec![
        (stuck, ProviderSettings::new(1)),
        (backup.clone(), ProviderSettings::new(2)),
    ]);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let (result, trace) = gateway
        .invoke_detailed(Capability::ImproveText, Payload::text("hello"), bypass(), Some(deadline))
        .await;

    assert!(result.degraded);
    assert_eq!(trace.attempts[0].outcome, AttemptOutcome::TimedOut);
    assert_eq!(trace.attempts[1].outcome, AttemptOutcome::DeadlineExceeded);
    assert_eq!(backup.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_results_use_shorter_ttl() {
    let flaky = scripted("flaky", vec![Step::Transient]);
    let gateway = gateway(vec![(flaky.clone(), ProviderSettings::new(1).with_policy(policy(5, 100)))])
        .with_cache(ResultCache::new(64))
        .with_cache_ttl(Duration::from_secs(60), Duration::from_secs(5));

    let degraded = gateway
        .invoke(Capability::ImproveText, Payload::text("hello there"), InvokeOptions::new())
        .await;
    assert!(degraded.degraded);

    let cached = gateway
        .invoke(Capability::ImproveText, Payload::text("hello there"), InvokeOptions::new())
        .await;
    assert_eq!(cached, degraded);
    assert_eq!(flaky.calls(), 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    let fresh = gateway
        .invoke(Capability::ImproveText, Payload::text("hello there"), InvokeOptions::new())
        .await;

    assert!(!fresh.degraded);
    assert_eq!(fresh.provider_used, "flaky");
    assert_eq!(flaky.calls(), 2);
}

#[tokio::test]
async fn test_refresh_and_bypass_cache_modes() {
    let primary = scripted("primary", vec![]);
    let gateway = gateway(vec![(primary.clone(), ProviderSettings::new(1))])
        .with_cache(ResultCache::new(64));
    let payload = || Payload::text("the park is lovely");

    gateway
        .invoke(Capability::Sentiment, payload(), InvokeOptions::new())
        .await;
    gateway
        .invoke(Capability::Sentiment, payload(), InvokeOptions::new().with("cache", "refresh"))
        .await;
    assert_eq!(primary.calls(), 2);

    gateway.cache().clear();
    gateway.invoke(Capability::Sentiment, payload(), bypass()).await;
    assert!(gateway.cache().is_empty());
    assert_eq!(primary.calls(), 3);
}

#[tokio::test]
async fn test_stats_track_each_path() {
    let primary = scripted("primary", vec![Step::Permanent]);
    let gateway = gateway(vec![(primary, ProviderSettings::new(1))]).with_cache(ResultCache::new(8));

    gateway
        .invoke(Capability::ImproveText, Payload::text("a"), InvokeOptions::new())
        .await;
    gateway
        .invoke(Capability::ImproveText, Payload::text("a"), InvokeOptions::new())
        .await;
    gateway
        .invoke(Capability::ImproveText, Payload::text("b"), InvokeOptions::new())
        .await;

    let stats = gateway.stats();
    assert_eq!(stats.invocations, 3);
    assert_eq!(stats.provider_failures, 1);
    assert_eq!(stats.degraded, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.provider_successes, 1);
}

#[tokio::test]
async fn test_oversized_cache_ttl_still_returns_a_result() {
    let registry = ProviderRegistry::builder().build().expect("empty registry builds");
    let gateway = Gateway::new(registry).with_cache_settings(&CacheSettings {
        enabled: true,
        ttl_secs: u64::MAX,
        degraded_ttl_secs: u64::MAX / 2,
        max_entries: 16,
    });

    let first = gateway
        .invoke(Capability::ImproveText, Payload::text("hi"), InvokeOptions::new())
        .await;
    let second = gateway
        .invoke(Capability::ImproveText, Payload::text("hi"), InvokeOptions::new())
        .await;

    assert!(first.degraded);
    assert_eq!(first, second);
    assert_eq!(gateway.cache().len(), 1);
}
