//! TOML configuration for the gateway.
//!
//! ```toml
//! [gateway]
//! default_timeout_secs = 30
//!
//! [cache]
//! ttl_secs = 3600
//! degraded_ttl_secs = 300
//!
//! [[providers]]
//! name = "openai-main"
//! kind = "openai"
//! endpoint = "https://api.openai.com/v1"
//! api_key_env = "OPENAI_API_KEY"
//! capabilities = ["improve-text", "classify", "sentiment"]
//! priority = 10
//! ```
//!
//! Credentials are never stored in the file: `api_key_env` names the
//! environment variable to read at startup.

use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::ResultCache;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ConfigError;
use crate::provider_policy::{ProviderPolicy, RateLimitPolicy};
use crate::providers::ProviderKind;
use crate::Capability;

const GATEWAY_SECTION: &str = "[gateway]";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub gateway: GatewaySettings,
    pub cache: CacheSettings,
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySettings {
    /// Provider call timeout when a provider sets none.
    pub default_timeout_secs: u64,
    /// Payloads up to this length count as short for routing hints.
    pub short_payload_chars: usize,
    /// Payloads of at least this length count as long for routing hints.
    pub long_payload_chars: usize,
    /// A provider away from `closed` longer than this raises an alert.
    pub health_sla_secs: u64,
    /// Tick period of the health monitor.
    pub health_interval_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            short_payload_chars: 280,
            long_payload_chars: 4_000,
            health_sla_secs: 900,
            health_interval_secs: 60,
        }
    }
}

impl GatewaySettings {
    pub fn health_sla(&self) -> Duration {
        Duration::from_secs(self.health_sla_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub enabled: bool,
    /// TTL for provider results. Zero disables caching.
    pub ttl_secs: u64,
    /// TTL for degraded local results. Zero keeps them out of the cache.
    pub degraded_ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3_600,
            degraded_ttl_secs: 300,
            max_entries: 10_000,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn degraded_ttl(&self) -> Duration {
        Duration::from_secs(self.degraded_ttl_secs)
    }
}

/// One `[[providers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub capabilities: Vec<Capability>,
    /// Lower runs first.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub fast: bool,
    #[serde(default)]
    pub large_input: bool,
    #[serde(default)]
    pub max_input_chars: Option<usize>,
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub recovery_timeout_secs: Option<u64>,
    #[serde(default)]
    pub success_threshold: Option<u32>,
    #[serde(default)]
    pub rate_limit_window_secs: Option<u64>,
    #[serde(default)]
    pub rate_limit_count: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_priority() -> u32 {
    100
}

impl ProviderConfig {
    /// Minimal entry for `kind`; everything else takes its default.
    pub fn new(name: impl Into<String>, kind: ProviderKind, capabilities: Vec<Capability>) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: String::new(),
            model: None,
            api_key_env: None,
            capabilities,
            priority: default_priority(),
            fast: false,
            large_input: false,
            max_input_chars: None,
            failure_threshold: None,
            recovery_timeout_secs: None,
            success_threshold: None,
            rate_limit_window_secs: None,
            rate_limit_count: None,
            timeout_secs: None,
        }
    }

    /// Kind defaults with the entry's overrides applied.
    pub fn policy(&self, gateway: &GatewaySettings) -> ProviderPolicy {
        let defaults = ProviderPolicy::default_for(self.kind);
        ProviderPolicy {
            breaker: CircuitBreakerConfig {
                failure_threshold: self
                    .failure_threshold
                    .unwrap_or(defaults.breaker.failure_threshold),
                recovery_timeout: self
                    .recovery_timeout_secs
                    .map_or(defaults.breaker.recovery_timeout, Duration::from_secs),
                success_threshold: self
                    .success_threshold
                    .unwrap_or(defaults.breaker.success_threshold),
            },
            rate_limit: RateLimitPolicy {
                window: self
                    .rate_limit_window_secs
                    .map_or(defaults.rate_limit.window, Duration::from_secs),
                limit: self.rate_limit_count.unwrap_or(defaults.rate_limit.limit),
            },
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(gateway.default_timeout_secs)),
        }
    }

    /// Reads the credential named by `api_key_env`. Empty values count as unset.
    pub fn api_key(&self) -> Option<String> {
        let variable = self.api_key_env.as_deref()?;
        env::var(variable).ok().filter(|value| !value.trim().is_empty())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyProviderName);
        }
        if self.kind != ProviderKind::Scripted && self.endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint {
                provider: self.name.clone(),
            });
        }
        if self.capabilities.is_empty() {
            return Err(ConfigError::NoCapabilities {
                provider: self.name.clone(),
            });
        }

        let supported = self.kind.default_capabilities();
        if let Some(capability) = self
            .capabilities
            .iter()
            .find(|capability| !supported.supports(**capability))
        {
            return Err(ConfigError::UnsupportedCapability {
                provider: self.name.clone(),
                kind: self.kind.to_string(),
                capability: capability.to_string(),
            });
        }

        let numeric = [
            ("failure_threshold", self.failure_threshold.map(u64::from)),
            ("recovery_timeout_secs", self.recovery_timeout_secs),
            ("success_threshold", self.success_threshold.map(u64::from)),
            ("rate_limit_window_secs", self.rate_limit_window_secs),
            ("rate_limit_count", self.rate_limit_count.map(u64::from)),
            ("timeout_secs", self.timeout_secs),
            ("max_input_chars", self.max_input_chars.map(|value| value as u64)),
        ];
        if let Some((field, _)) = numeric.iter().find(|(_, value)| *value == Some(0)) {
            return Err(ConfigError::ZeroValue {
                provider: self.name.clone(),
                field: *field,
            });
        }

        Ok(())
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.default_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue {
                provider: String::from(GATEWAY_SECTION),
                field: "default_timeout_secs",
            });
        }
        if self.gateway.long_payload_chars <= self.gateway.short_payload_chars {
            return Err(ConfigError::PayloadThresholds {
                short: self.gateway.short_payload_chars,
                long: self.gateway.long_payload_chars,
            });
        }
        let max_secs = ResultCache::MAX_TTL.as_secs();
        for (field, secs) in [
            ("ttl_secs", self.cache.ttl_secs),
            ("degraded_ttl_secs", self.cache.degraded_ttl_secs),
        ] {
            if secs > max_secs {
                return Err(ConfigError::TtlTooLong {
                    field,
                    secs,
                    max_secs,
                });
            }
        }
        if self.cache.ttl_secs > 0 && self.cache.degraded_ttl_secs >= self.cache.ttl_secs {
            return Err(ConfigError::DegradedTtlNotShorter {
                ttl_secs: self.cache.ttl_secs,
                degraded_secs: self.cache.degraded_ttl_secs,
            });
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::DuplicateProvider {
                    name: provider.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Offline configuration backed by scripted providers.
    pub fn demo() -> Self {
        let text = vec![
            Capability::ImproveText,
            Capability::Classify,
            Capability::Sentiment,
            Capability::Summarize,
        ];

        let primary = ProviderConfig {
            priority: 10,
            large_input: true,
            ..ProviderConfig::new("primary", ProviderKind::Scripted, text.clone())
        };
        let secondary = ProviderConfig {
            priority: 20,
            fast: true,
            max_input_chars: Some(8_000),
            ..ProviderConfig::new("secondary", ProviderKind::Scripted, text)
        };
        let speech = ProviderConfig {
            priority: 10,
            ..ProviderConfig::new(
                "speech",
                ProviderKind::Scripted,
                vec![Capability::SpeechToText, Capability::TextToSpeech],
            )
        };

        Self {
            providers: vec![primary, secondary, speech],
            ..Self::default()
        }
    }
}
