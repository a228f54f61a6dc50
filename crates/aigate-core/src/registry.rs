//! Provider registry: which providers serve which capability, and in what order.

use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{AppConfig, GatewaySettings, ProviderConfig};
use crate::error::ConfigError;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::provider_policy::ProviderPolicy;
use crate::providers::{
    AnthropicProvider, OpenAiCompatibleProvider, Provider, ProviderKind, ScriptedProvider,
    SpeechServiceProvider, Step,
};
use crate::request::RequestEnvelope;
use crate::throttling::RateLimiter;
use crate::{Capability, CapabilitySet};

/// Routing traits used to perturb the priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RoutingTraits {
    /// Low latency; preferred for short high-priority requests.
    pub fast: bool,
    /// Large context window; preferred for long payloads.
    pub large_input: bool,
    pub max_input_chars: Option<usize>,
}

/// Per-request routing inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingHints {
    pub high_priority: bool,
    pub payload_len: usize,
}

impl RoutingHints {
    pub fn from_envelope(envelope: &RequestEnvelope) -> Self {
        Self {
            high_priority: envelope.options.is_high_priority(),
            payload_len: envelope.payload.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingThresholds {
    pub short_payload_chars: usize,
    pub long_payload_chars: usize,
}

impl Default for RoutingThresholds {
    fn default() -> Self {
        Self::from(&GatewaySettings::default())
    }
}

impl From<&GatewaySettings> for RoutingThresholds {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            short_payload_chars: settings.short_payload_chars,
            long_payload_chars: settings.long_payload_chars,
        }
    }
}

/// One registered provider with its breaker and policy. Immutable once built.
pub struct ProviderDescriptor {
    name: String,
    capabilities: CapabilitySet,
    priority: u32,
    traits: RoutingTraits,
    policy: ProviderPolicy,
    breaker: Arc<CircuitBreaker>,
    provider: Arc<dyn Provider>,
}

impl ProviderDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn traits(&self) -> RoutingTraits {
        self.traits
    }

    pub fn policy(&self) -> ProviderPolicy {
        self.policy
    }

    /// Key under which the provider's rate-limit budget is registered.
    pub fn policy_key(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.policy.timeout
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    fn exceeds_input_limit(&self, payload_len: usize) -> bool {
        self.traits
            .max_input_chars
            .is_some_and(|limit| payload_len > limit)
    }
}

impl Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("capabilities", &self.capabilities.supported())
            .field("priority", &self.priority)
            .field("traits", &self.traits)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Read-only registry built once at startup.
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: Vec<Arc<ProviderDescriptor>>,
    rate_limiter: Arc<RateLimiter>,
    thresholds: RoutingThresholds,
}

impl ProviderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Providers able to serve `capability`, in attempt order.
    ///
    /// Base order is ascending priority then name. A short high-priority
    /// request moves `fast` providers forward; a long payload moves
    /// `large_input` providers forward. Providers whose input limit the
    /// payload exceeds always go last.
    pub fn candidates_for(
        &self,
        capability: Capability,
        hints: RoutingHints,
    ) -> Vec<Arc<ProviderDescriptor>> {
        let mut candidates = self
            .providers
            .iter()
            .filter(|descriptor| descriptor.capabilities.supports(capability))
            .cloned()
            .collect::<Vec<_>>();

        let short = hints.payload_len <= self.thresholds.short_payload_chars;
        let long = hints.payload_len >= self.thresholds.long_payload_chars;

        candidates.sort_by_key(|descriptor| {
            let preferred = if hints.high_priority && short {
                descriptor.traits.fast
            } else if long {
                descriptor.traits.large_input
            } else {
                false
            };
            (
                descriptor.exceeds_input_limit(hints.payload_len),
                !preferred,
            )
        });

        candidates
    }

    pub fn providers(&self) -> &[Arc<ProviderDescriptor>] {
        &self.providers
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ProviderDescriptor>> {
        self.providers
            .iter()
            .find(|descriptor| descriptor.name == name)
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn thresholds(&self) -> RoutingThresholds {
        self.thresholds
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Registration settings for a hand-built provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub priority: u32,
    pub traits: RoutingTraits,
    /// Defaults to the policy for the provider's kind.
    pub policy: Option<ProviderPolicy>,
    /// Defaults to everything the provider reports.
    pub capabilities: Option<CapabilitySet>,
}

impl ProviderSettings {
    pub fn new(priority: u32) -> Self {
        Self {
            priority,
            traits: RoutingTraits::default(),
            policy: None,
            capabilities: None,
        }
    }

    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn fast(mut self) -> Self {
        self.traits.fast = true;
        self
    }

    pub fn large_input(mut self) -> Self {
        self.traits.large_input = true;
        self
    }

    pub fn with_max_input_chars(mut self, limit: usize) -> Self {
        self.traits.max_input_chars = Some(limit);
        self
    }
}

/// Builder for [`ProviderRegistry`].
///
/// Providers come from explicit [`RegistryBuilder::register`] calls or from a
/// loaded [`AppConfig`]. Config entries are turned into adapters at
/// [`RegistryBuilder::build`] time:
///
/// | Mode | Adapter |
/// |------|---------|
/// | default | real adapter over [`ReqwestHttpClient`] (or the injected client) |
/// | `with_mock_mode` | [`ScriptedProvider`] that always succeeds |
/// | `with_mock_outage` | [`ScriptedProvider`] that always fails transiently |
///
/// Entries whose `api_key_env` variable is unset are skipped with a warning.
#[derive(Default)]
pub struct RegistryBuilder {
    registered: Vec<(Arc<dyn Provider>, ProviderSettings)>,
    configured: Vec<ProviderConfig>,
    gateway: GatewaySettings,
    http_client: Option<Arc<dyn HttpClient>>,
    use_mock: bool,
    mock_outage: bool,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Arc<dyn Provider>, settings: ProviderSettings) -> Self {
        self.registered.push((provider, settings));
        self
    }

    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.configured.extend(config.providers.iter().cloned());
        self.gateway = config.gateway.clone();
        self
    }

    /// Replace configured adapters with scripted providers.
    pub fn with_mock_mode(mut self) -> Self {
        self.use_mock = true;
        self
    }

    /// Mock mode where every provider fails, exercising the degraded path.
    pub fn with_mock_outage(mut self) -> Self {
        self.use_mock = true;
        self.mock_outage = true;
        self
    }

    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn build(self) -> Result<ProviderRegistry, ConfigError> {
        let mut entries = Vec::with_capacity(self.registered.len() + self.configured.len());

        for (provider, settings) in &self.registered {
            let policy = settings
                .policy
                .unwrap_or_else(|| ProviderPolicy::default_for(provider.kind()));
            let capabilities = settings
                .capabilities
                .map_or(provider.capabilities(), |declared| {
                    declared.intersect(provider.capabilities())
                });
            entries.push(Entry {
                name: provider.name().to_owned(),
                capabilities,
                priority: settings.priority,
                traits: settings.traits,
                policy,
                provider: Arc::clone(provider),
            });
        }

        for config in &self.configured {
            let policy = config.policy(&self.gateway);
            let Some(provider) = self.adapter_for(config, &policy) else {
                continue;
            };
            entries.push(Entry {
                name: config.name.clone(),
                capabilities: config.capabilities.iter().copied().collect(),
                priority: config.priority,
                traits: RoutingTraits {
                    fast: config.fast,
                    large_input: config.large_input,
                    max_input_chars: config.max_input_chars,
                },
                policy,
                provider,
            });
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.name.clone()) {
                return Err(ConfigError::DuplicateProvider {
                    name: entry.name.clone(),
                });
            }
        }

        entries.sort_by(|left, right| {
            left.priority
                .cmp(&right.priority)
                .then_with(|| left.name.cmp(&right.name))
        });

        let mut rate_limiter = RateLimiter::new();
        let providers = entries
            .into_iter()
            .map(|entry| {
                rate_limiter.register(entry.name.clone(), entry.policy.rate_limit);
                Arc::new(entry.into_descriptor())
            })
            .collect::<Vec<_>>();

        info!(
            providers = providers.len(),
            mock = self.use_mock,
            "provider registry built"
        );

        Ok(ProviderRegistry {
            providers,
            rate_limiter: Arc::new(rate_limiter),
            thresholds: RoutingThresholds::from(&self.gateway),
        })
    }

    fn adapter_for(
        &self,
        config: &ProviderConfig,
        policy: &ProviderPolicy,
    ) -> Option<Arc<dyn Provider>> {
        let capabilities: CapabilitySet = config.capabilities.iter().copied().collect();

        if self.use_mock || config.kind == ProviderKind::Scripted {
            let otherwise = if self.mock_outage {
                Step::Transient
            } else {
                Step::Succeed
            };
            return Some(Arc::new(
                ScriptedProvider::new(config.name.clone())
                    .with_capabilities(capabilities)
                    .otherwise(otherwise),
            ));
        }

        let api_key = config.api_key();
        if let (None, Some(variable)) = (&api_key, &config.api_key_env) {
            warn!(
                provider = %config.name,
                env = %variable,
                "credential environment variable is not set; provider skipped"
            );
            return None;
        }

        let http_client = self
            .http_client
            .clone()
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));

        let provider: Arc<dyn Provider> = match config.kind {
            ProviderKind::OpenAi => {
                let adapter = OpenAiCompatibleProvider::new(config.name.clone(), &config.endpoint, api_key)
                    .with_capabilities(capabilities)
                    .with_timeout(policy.timeout)
                    .with_http_client(http_client);
                Arc::new(match &config.model {
                    Some(model) => adapter.with_model(model.clone()),
                    None => adapter,
                })
            }
            ProviderKind::Anthropic => {
                let adapter = AnthropicProvider::new(config.name.clone(), &config.endpoint, api_key)
                    .with_capabilities(capabilities)
                    .with_timeout(policy.timeout)
                    .with_http_client(http_client);
                Arc::new(match &config.model {
                    Some(model) => adapter.with_model(model.clone()),
                    None => adapter,
                })
            }
            ProviderKind::Speech => Arc::new(
                SpeechServiceProvider::new(config.name.clone(), &config.endpoint, api_key)
                    .with_capabilities(capabilities)
                    .with_timeout(policy.timeout)
                    .with_http_client(http_client),
            ),
            ProviderKind::Scripted => Arc::new(ScriptedProvider::new(config.name.clone())),
        };
        Some(provider)
    }
}

struct Entry {
    name: String,
    capabilities: CapabilitySet,
    priority: u32,
    traits: RoutingTraits,
    policy: ProviderPolicy,
    provider: Arc<dyn Provider>,
}

impl Entry {
    fn into_descriptor(self) -> ProviderDescriptor {
        let breaker = Arc::new(CircuitBreaker::new(self.name.clone(), self.policy.breaker));
        ProviderDescriptor {
            name: self.name,
            capabilities: self.capabilities,
            priority: self.priority,
            traits: self.traits,
            policy: self.policy,
            breaker,
            provider: self.provider,
        }
    }
}
