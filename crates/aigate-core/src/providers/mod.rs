//! Outbound provider adapters.
//!
//! | Kind | Adapter | Capabilities | Auth |
//! |------|---------|--------------|------|
//! | `openai` | [`OpenAiCompatibleProvider`] | text | bearer token |
//! | `anthropic` | [`AnthropicProvider`] | text | `x-api-key` header |
//! | `speech` | [`SpeechServiceProvider`] | speech-to-text, text-to-speech | bearer token |
//! | `scripted` | [`ScriptedProvider`] | any | none |
//!
//! Adapters never retry on their own; resilience lives in the gateway.

mod anthropic;
mod openai;
mod prompt;
mod scripted;
mod speech;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiCompatibleProvider;
pub use scripted::{ScriptedProvider, Step};
pub use speech::SpeechServiceProvider;

use crate::http_client::{HttpClient, HttpError, HttpErrorKind, HttpRequest};
use crate::request::RequestEnvelope;
use crate::response::Output;
use crate::{Capability, CapabilitySet, ValidationError};

pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ProviderReply, ProviderError>> + Send + 'a>>;

/// Contract implemented by every external AI provider adapter.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> CapabilitySet;

    fn invoke<'a>(&'a self, request: &'a RequestEnvelope) -> ProviderFuture<'a>;
}

/// Successful provider answer before the gateway wraps it in a `ResponseResult`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub output: Output,
    pub confidence: f64,
}

impl ProviderReply {
    pub fn new(output: Output, confidence: f64) -> Self {
        Self { output, confidence }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Worth trying again later or elsewhere.
    Transient,
    /// The request itself was rejected (bad credentials, bad input).
    Permanent,
    /// The call exceeded its time budget.
    Timeout,
}

impl ProviderErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
        }
    }
}

/// Structured provider failure. Every kind counts against the provider's breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    provider: String,
    message: String,
    status: Option<u16>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, provider: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.to_owned(),
            message: message.into(),
            status: None,
        }
    }

    pub fn transient(provider: &str, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transient, provider, message)
    }

    pub fn permanent(provider: &str, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Permanent, provider, message)
    }

    pub fn timeout(provider: &str, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, provider, message)
    }

    pub fn unsupported(provider: &str, capability: Capability) -> Self {
        Self::permanent(
            provider,
            format!("capability '{capability}' is not supported by this provider"),
        )
    }

    /// Unparsable or unexpected upstream body.
    pub fn malformed(provider: &str, detail: impl Display) -> Self {
        Self::transient(provider, format!("malformed upstream response: {detail}"))
    }

    /// 408, 429 and 5xx are transient; any other 4xx is permanent.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        let kind = match status {
            408 | 429 => ProviderErrorKind::Transient,
            400..=499 => ProviderErrorKind::Permanent,
            _ => ProviderErrorKind::Transient,
        };
        let snippet = body.chars().take(200).collect::<String>();
        Self {
            status: Some(status),
            ..Self::new(
                kind,
                provider,
                format!("upstream returned status {status}: {snippet}"),
            )
        }
    }

    pub fn from_http(provider: &str, error: &HttpError) -> Self {
        let kind = match error.kind() {
            HttpErrorKind::Timeout => ProviderErrorKind::Timeout,
            HttpErrorKind::Connect | HttpErrorKind::Request | HttpErrorKind::Body => {
                ProviderErrorKind::Transient
            }
        };
        Self::new(kind, provider, format!("transport error: {}", error.message()))
    }

    pub const fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub const fn is_permanent(&self) -> bool {
        matches!(self.kind, ProviderErrorKind::Permanent)
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.kind.as_str(),
            self.provider,
            self.message
        )
    }
}

impl std::error::Error for ProviderError {}

/// Adapter family selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Speech,
    Scripted,
}

impl ProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Speech => "speech",
            Self::Scripted => "scripted",
        }
    }

    /// Capabilities an adapter of this kind is able to serve.
    pub const fn default_capabilities(self) -> CapabilitySet {
        match self {
            Self::OpenAi | Self::Anthropic => CapabilitySet::text(),
            Self::Speech => CapabilitySet::speech(),
            Self::Scripted => {
                let text = CapabilitySet::text();
                text.with(Capability::SpeechToText)
                    .with(Capability::TextToSpeech)
            }
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open-ai" | "openai-compatible" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "speech" => Ok(Self::Speech),
            "scripted" | "mock" => Ok(Self::Scripted),
            other => Err(ValidationError::InvalidProviderKind {
                value: other.to_owned(),
            }),
        }
    }
}

/// Sends `request` and decodes a successful JSON body into `T`.
async fn post_json<T: DeserializeOwned>(
    client: &dyn HttpClient,
    provider: &str,
    request: HttpRequest,
) -> Result<T, ProviderError> {
    let response = client
        .execute(request)
        .await
        .map_err(|error| ProviderError::from_http(provider, &error))?;

    if !response.is_success() {
        return Err(ProviderError::from_status(
            provider,
            response.status,
            &response.body,
        ));
    }

    serde_json::from_str(&response.body).map_err(|error| ProviderError::malformed(provider, error))
}

fn trim_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_owned()
}
