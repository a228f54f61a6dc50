//! Metric recording through the `metrics` facade.
//!
//! The library never installs an exporter; without a recorder these calls are no-ops.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `aigate_invocations_total` | counter | capability |
//! | `aigate_cache_hits_total` | counter | capability |
//! | `aigate_degraded_total` | counter | capability |
//! | `aigate_provider_failures_total` | counter | provider, kind |
//! | `aigate_rate_limited_total` | counter | provider |
//! | `aigate_circuit_rejections_total` | counter | provider |
//! | `aigate_breaker_state` | gauge | provider (0 closed, 1 half-open, 2 open) |
//! | `aigate_provider_latency_seconds` | histogram | provider |

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::circuit_breaker::CircuitState;
use crate::Capability;

pub fn record_invocation(capability: Capability) {
    counter!("aigate_invocations_total", "capability" => capability.as_str()).increment(1);
}

pub fn record_cache_hit(capability: Capability) {
    counter!("aigate_cache_hits_total", "capability" => capability.as_str()).increment(1);
}

pub fn record_degraded(capability: Capability) {
    counter!("aigate_degraded_total", "capability" => capability.as_str()).increment(1);
}

pub fn record_provider_failure(provider: &str, kind: &'static str) {
    counter!(
        "aigate_provider_failures_total",
        "provider" => provider.to_owned(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_rate_limited(provider: &str) {
    counter!("aigate_rate_limited_total", "provider" => provider.to_owned()).increment(1);
}

pub fn record_circuit_rejection(provider: &str) {
    counter!("aigate_circuit_rejections_total", "provider" => provider.to_owned()).increment(1);
}

pub fn record_breaker_state(provider: &str, state: CircuitState) {
    gauge!("aigate_breaker_state", "provider" => provider.to_owned()).set(state.gauge_value());
}

pub fn record_provider_latency(provider: &str, latency: Duration) {
    histogram!("aigate_provider_latency_seconds", "provider" => provider.to_owned())
        .record(latency.as_secs_f64());
}
