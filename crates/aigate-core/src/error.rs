use std::path::PathBuf;

use thiserror::Error;

/// Validation errors for values parsed from configuration or caller input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(
        "invalid capability '{value}', expected one of improve-text, classify, sentiment, \
         summarize, speech-to-text, text-to-speech"
    )]
    InvalidCapability { value: String },
    #[error("invalid provider kind '{value}', expected one of openai, anthropic, speech, scripted")]
    InvalidProviderKind { value: String },
    #[error("option '{raw}' must be formatted as key=value")]
    MalformedOption { raw: String },
    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
}

/// Errors raised while loading or validating gateway configuration.
///
/// These only surface at startup; `Gateway::invoke` never returns them.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("duplicate provider name '{name}'")]
    DuplicateProvider { name: String },

    #[error("provider name cannot be empty")]
    EmptyProviderName,

    #[error("provider '{provider}' has an empty endpoint")]
    EmptyEndpoint { provider: String },

    #[error("provider '{provider}': {field} must be greater than zero")]
    ZeroValue {
        provider: String,
        field: &'static str,
    },

    #[error("provider '{provider}' declares no capabilities")]
    NoCapabilities { provider: String },

    #[error("provider '{provider}' of kind '{kind}' cannot serve capability '{capability}'")]
    UnsupportedCapability {
        provider: String,
        kind: String,
        capability: String,
    },

    #[error("cache degraded_ttl_secs ({degraded_secs}) must be shorter than ttl_secs ({ttl_secs})")]
    DegradedTtlNotShorter { ttl_secs: u64, degraded_secs: u64 },

    #[error("cache {field} ({secs}) exceeds the maximum of {max_secs} seconds")]
    TtlTooLong {
        field: &'static str,
        secs: u64,
        max_secs: u64,
    },

    #[error("gateway long_payload_chars ({long}) must exceed short_payload_chars ({short})")]
    PayloadThresholds { short: usize, long: usize },
}
