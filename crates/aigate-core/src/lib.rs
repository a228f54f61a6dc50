//! # Aigate Core
//!
//! Resilient orchestration of calls to external AI providers.
//!
//! ## Overview
//!
//! This crate sits between application code and third-party AI services
//! (text improvement, classification, sentiment, summaries, speech):
//!
//! - **Circuit breakers** per provider with single-flight half-open probes
//! - **Admission control** with one bounded-window budget per provider
//! - **Priority routing** with fast / large-input hints
//! - **Result caching** keyed by a hash of the normalized request
//! - **Degraded mode**: when every provider is unavailable the gateway
//!   computes a deterministic local answer instead of failing
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Content-addressed result cache and cache modes |
//! | [`capability`] | Capability enum and capability sets |
//! | [`circuit_breaker`] | Circuit breaker state machine |
//! | [`config`] | TOML configuration and validation |
//! | [`error`] | Validation and configuration errors |
//! | [`fallback`] | Local degraded-mode computations |
//! | [`gateway`] | Invocation entry point and fallback cascade |
//! | [`health`] | Health snapshots, stuck-circuit alerts, health reports |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`provider_policy`] | Breaker, rate-limit and timeout policies |
//! | [`providers`] | Provider trait and adapters |
//! | [`registry`] | Provider registry and routing order |
//! | [`request`] | Payloads, options, request envelopes |
//! | [`response`] | Typed outputs and response results |
//! | [`telemetry`] | Metric recording |
//! | [`throttling`] | Rate-limit admission |
//! | [`timestamp`] | UTC timestamps |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use aigate_core::{AppConfig, Capability, Gateway, InvokeOptions, Payload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load("aigate.toml")?;
//!     let gateway = Gateway::from_config(&config)?;
//!
//!     let result = gateway
//!         .invoke(
//!             Capability::Classify,
//!             Payload::text("Streetlight broken on Elm Street"),
//!             InvokeOptions::new(),
//!         )
//!         .await;
//!
//!     println!("{} via {}", result.output.label().unwrap_or("?"), result.provider_used);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CLI / Caller   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │     Gateway     │────▶│   Result Cache   │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Provider        │────▶│ Rate Limiter     │
//! │ Registry        │────▶│ Circuit Breakers │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Provider        │────▶│ HTTP Client      │
//! │ (Adapter Trait) │     │ (reqwest/none)   │
//! └────────┬────────┘     └──────────────────┘
//!          │ all unavailable
//!          ▼
//! ┌─────────────────┐
//! │ Local Fallback  │
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! `Gateway::invoke` has no error path. Failures are visible through the
//! result itself:
//!
//! ```rust
//! use aigate_core::ResponseResult;
//!
//! fn describe(result: &ResponseResult) -> &'static str {
//!     if result.degraded {
//!         "served by local fallback"
//!     } else {
//!         "served by a provider"
//!     }
//! }
//! ```
//!
//! Configuration problems surface once, at startup, as [`ConfigError`].
//!
//! ## Security
//!
//! - API keys are read from environment variables only (never logged)
//! - Provider endpoints are expected to be HTTPS

pub mod cache;
pub mod capability;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod health;
pub mod http_client;
pub mod provider_policy;
pub mod providers;
pub mod registry;
pub mod request;
pub mod response;
pub mod telemetry;
pub mod throttling;
pub mod timestamp;

// Caching
pub use cache::{CacheMode, ResultCache};

// Capabilities
pub use capability::{Capability, CapabilitySet};

// Circuit breaker
pub use circuit_breaker::{
    BreakerError, BreakerSnapshot, BreakerTotals, CircuitBreaker, CircuitBreakerConfig,
    CircuitState,
};

// Configuration
pub use config::{AppConfig, CacheSettings, GatewaySettings, ProviderConfig};

// Error types
pub use error::{ConfigError, ValidationError};

// Gateway
pub use gateway::{Attempt, AttemptOutcome, Gateway, GatewayStats, InvocationTrace};

// Health
pub use health::{
    AlertSink, HealthAggregator, HealthAlert, HealthMonitor, HealthReport, OverallStatus,
    ServiceHealth, StuckService, TracingAlertSink,
};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, NoopHttpClient, ReqwestHttpClient,
};

// Provider policies
pub use provider_policy::{ProviderPolicy, RateLimitPolicy};

// Providers
pub use providers::{
    AnthropicProvider, OpenAiCompatibleProvider, Provider, ProviderError, ProviderErrorKind,
    ProviderKind, ProviderReply, ScriptedProvider, SpeechServiceProvider, Step,
};

// Registry
pub use registry::{
    ProviderDescriptor, ProviderRegistry, ProviderSettings, RegistryBuilder, RoutingHints,
    RoutingThresholds, RoutingTraits,
};

// Requests and responses
pub use request::{InvokeOptions, Payload, RequestEnvelope};
pub use response::{Output, Polarity, ResponseResult, LOCAL_FALLBACK};

// Throttling
pub use throttling::{Admission, AdmissionControl, AdmissionCounters, RateLimiter};

// Timestamps
pub use timestamp::UtcDateTime;
