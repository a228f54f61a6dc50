use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::{post_json, prompt, trim_endpoint, Provider, ProviderError, ProviderFuture, ProviderKind};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, NoopHttpClient};
use crate::request::RequestEnvelope;
use crate::CapabilitySet;

/// Adapter for any OpenAI-compatible `chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    name: String,
    endpoint: String,
    model: String,
    auth: HttpAuth,
    capabilities: CapabilitySet,
    timeout: Duration,
    http_client: Arc<dyn HttpClient>,
}

impl OpenAiCompatibleProvider {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    pub fn new(name: impl Into<String>, endpoint: &str, api_key: Option<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: trim_endpoint(endpoint),
            model: String::from(Self::DEFAULT_MODEL),
            auth: api_key.map_or(HttpAuth::None, HttpAuth::BearerToken),
            capabilities: ProviderKind::OpenAi.default_capabilities(),
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

    async fn complete(&self, request: &RequestEnvelope) -> Result<super::ProviderReply, ProviderError> {
        if !self.capabilities.supports(request.capability) {
            return Err(ProviderError::unsupported(&self.name, request.capability));
        }

        let prompt = prompt::build(&self.name, request)?;
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "max_tokens": prompt.max_tokens,
            "temperature": 0.2,
        });
        let http_request = HttpRequest::post(format!("{}/chat/completions", self.endpoint))
            .with_auth(&self.auth)
            .with_json(&body)
            .with_timeout(self.timeout);

        let completion: ChatCompletion =
            post_json(self.http_client.as_ref(), &self.name, http_request).await?;
        let answer = completion
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::malformed(&self.name, "no choices in completion"))?;

        prompt::parse_reply(&self.name, request, &answer)
    }
}

impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn invoke<'a>(&'a self, request: &'a RequestEnvelope) -> ProviderFuture<'a> {
        Box::pin(self.complete(request))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
