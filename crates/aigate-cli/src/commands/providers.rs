use aigate_core::{Gateway, ProviderKind, RoutingTraits};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

#[derive(Debug, Serialize)]
struct ProviderRow {
    name: String,
    kind: ProviderKind,
    priority: u32,
    capabilities: Vec<&'static str>,
    traits: RoutingTraits,
    failure_threshold: u32,
    recovery_timeout_secs: u64,
    success_threshold: u32,
    rate_limit_count: u32,
    rate_limit_window_secs: u64,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct ProvidersResponseData {
    providers: Vec<ProviderRow>,
}

pub fn run(gateway: &Gateway) -> Result<Value, CliError> {
    let providers = gateway
        .registry()
        .providers()
        .iter()
        .map(|descriptor| {
            let policy = descriptor.policy();
            ProviderRow {
                name: descriptor.name().to_owned(),
                kind: descriptor.kind(),
                priority: descriptor.priority(),
                capabilities: descriptor.capabilities().supported(),
                traits: descriptor.traits(),
                failure_threshold: policy.breaker.failure_threshold,
                recovery_timeout_secs: policy.breaker.recovery_timeout.as_secs(),
                success_threshold: policy.breaker.success_threshold,
                rate_limit_count: policy.rate_limit.limit,
                rate_limit_window_secs: policy.rate_limit.window.as_secs(),
                timeout_secs: policy.timeout.as_secs(),
            }
        })
        .collect();

    Ok(serde_json::to_value(ProvidersResponseData { providers })?)
}
