use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::{
    post_json, prompt, trim_endpoint, Provider, ProviderError, ProviderFuture, ProviderKind,
    ProviderReply,
};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, NoopHttpClient};
use crate::request::RequestEnvelope;
use crate::CapabilitySet;

const API_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic messages API.
#[derive(Clone)]
pub struct AnthropicProvider {
    name: String,
    endpoint: String,
    model: String,
    auth: HttpAuth,
    capabilities: CapabilitySet,
    timeout: Duration,
    http_client: Arc<dyn HttpClient>,
}

impl AnthropicProvider {
    pub const DEFAULT_MODEL: &'static str = "claude-3-5-haiku-latest";

    pub fn new(name: impl Into<String>, endpoint: &str, api_key: Option<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: trim_endpoint(endpoint),
            model: String::from(Self::DEFAULT_MODEL),
            auth: api_key.map_or(HttpAuth::None, |value| HttpAuth::Header {
                name: String::from("x-api-key"),
                value,
            }),
            capabilities: ProviderKind::Anthropic.default_capabilities(),
            timeout: Duration::from_secs(30),
            http_client: Arc::new(NoopHttpClient),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = http_client;
        self
    }

    async fn message(&self, request: &RequestEnvelope) -> Result<ProviderReply, ProviderError> {
        if !self.capabilities.supports(request.capability) {
            return Err(ProviderError::unsupported(&self.name, request.capability));
        }

        let prompt = prompt::build(&self.name, request)?;
        let body = json!({
            "model": self.model,
            "max_tokens": prompt.max_tokens,
            "system": prompt.system,
            "messages": [{ "role": "user", "content": prompt.user }],
        });
        let http_request = HttpRequest::post(format!("{}/v1/messages", self.endpoint))
            .with_auth(&self.auth)
            .with_header("anthropic-version", API_VERSION)
            .with_json(&body)
            .with_timeout(self.timeout);

        let response: MessageResponse =
            post_json(self.http_client.as_ref(), &self.name, http_request).await?;
        let answer = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        prompt::parse_reply(&self.name, request, &answer)
    }
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn invoke<'a>(&'a self, request: &'a RequestEnvelope) -> ProviderFuture<'a> {
        Box::pin(self.message(request))
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}
