use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use super::{
    post_json, trim_endpoint, Provider, ProviderError, ProviderFuture, ProviderKind, ProviderReply,
};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, NoopHttpClient};
use crate::request::RequestEnvelope;
use crate::response::Output;
use crate::{Capability, CapabilitySet};

const DEFAULT_MIME: &str = "audio/mpeg";

/// Adapter for a JSON speech service exposing `/transcriptions` and `/speech`.
///
/// Audio travels base64-encoded in both directions.
#[derive(Clone)]
pub struct SpeechServiceProvider {
    name: String,
    endpoint: String,
    auth: HttpAuth,
    capabilities: CapabilitySet,
    timeout: Duration,
    http_client: Arc<dyn HttpClient>,
}

impl SpeechServiceProvider {
    pub fn new(name: impl Into<String>, endpoint: &str, api_key: Option<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: trim_endpoint(endpoint),
            auth: api_key.map_or(HttpAuth::None, HttpAuth::BearerToken),
            capabilities: ProviderKind::Speech.default_capabilities(),
            timeout: Duration::from_secs(30),
            http_client: Arc::new(NoopHttpClient),
        }
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

    fn request(&self, path: &str, body: &serde_json::Value) -> HttpRequest {
        HttpRequest::post(format!("{}/{path}", self.endpoint))
            .with_auth(&self.auth)
            .with_json(body)
            .with_timeout(self.timeout)
    }

    async fn transcribe(&self, request: &RequestEnvelope) -> Result<ProviderReply, ProviderError> {
        let Some(audio) = request.payload.as_audio() else {
            return Err(ProviderError::permanent(
                &self.name,
                "speech-to-text requires an audio payload",
            ));
        };

        let body = json!({
            "audio": STANDARD.encode(audio),
            "language": request.options.language(),
        });
        let response: TranscriptionResponse = post_json(
            self.http_client.as_ref(),
            &self.name,
            self.request("transcriptions", &body),
        )
        .await?;

        Ok(ProviderReply::new(
            Output::Transcript {
                text: response.text,
                language: response.language,
            },
            response.confidence.unwrap_or(0.9),
        ))
    }

    async fn synthesize(&self, request: &RequestEnvelope) -> Result<ProviderReply, ProviderError> {
        let Some(text) = request.text() else {
            return Err(ProviderError::permanent(
                &self.name,
                "text-to-speech requires a text payload",
            ));
        };

        let body = json!({
            "text": text,
            "voice": request.options.voice(),
        });
        let response: SpeechResponse = post_json(
            self.http_client.as_ref(),
            &self.name,
            self.request("speech", &body),
        )
        .await?;

        let bytes = STANDARD
            .decode(response.audio.as_bytes())
            .map_err(|error| ProviderError::malformed(&self.name, error))?;

        Ok(ProviderReply::new(
            Output::Audio {
                bytes,
                mime: response.mime.unwrap_or_else(|| String::from(DEFAULT_MIME)),
            },
            0.9,
        ))
    }

    async fn dispatch(&self, request: &RequestEnvelope) -> Result<ProviderReply, ProviderError> {
        if !self.capabilities.supports(request.capability) {
            return Err(ProviderError::unsupported(&self.name, request.capability));
        }

        match request.capability {
            Capability::SpeechToText => self.transcribe(request).await,
            Capability::TextToSpeech => self.synthesize(request).await,
            other => Err(ProviderError::unsupported(&self.name, other)),
        }
    }
}

impl Provider for SpeechServiceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Speech
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn invoke<'a>(&'a self, request: &'a RequestEnvelope) -> ProviderFuture<'a> {
        Box::pin(self.dispatch(request))
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    language: Option<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SpeechResponse {
    audio: String,
    mime: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::RecordingHttpClient;
    use crate::providers::ProviderErrorKind;
    use crate::request::{InvokeOptions, Payload};

    fn provider(client: Arc<RecordingHttpClient>) -> SpeechServiceProvider {
        SpeechServiceProvider::new("speech", "https://speech.example.test", Some(String::from("k")))
            .with_http_client(client)
    }

    #[tokio::test]
    async fn transcription_sends_base64_audio() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"text":"there is a gas leak","language":"en"}"#,
        ));
        let request = RequestEnvelope::new(
            Capability::SpeechToText,
            Payload::audio(vec![0xde, 0xad, 0xbe, 0xef]),
            InvokeOptions::new().with("language", "en"),
        );

        let reply = provider(client.clone())
            .invoke(&request)
            .await
            .expect("transcript");
        assert_eq!(
            reply.output,
            Output::Transcript {
                text: String::from("there is a gas leak"),
                language: Some(String::from("en")),
            }
        );

        let requests = client.recorded_requests();
        assert_eq!(requests[0].url, "https://speech.example.test/transcriptions");
        let body: serde_json::Value =
            serde_json::from_str(requests[0].body.as_deref().unwrap_or_default()).expect("json");
        assert_eq!(body["audio"], "3q2+7w==");
        assert_eq!(body["language"], "en");
    }

    #[tokio::test]
    async fn synthesis_decodes_audio() {
        let client = Arc::new(RecordingHttpClient::json(
            r#"{"audio":"AQID","mime":"audio/wav"}"#,
        ));
        let request = RequestEnvelope::new(
            Capability::TextToSpeech,
            Payload::text("your case was resolved"),
            InvokeOptions::new().with("voice", "alloy"),
        );

        let reply = provider(client).invoke(&request).await.expect("audio");
        assert_eq!(
            reply.output,
            Output::Audio {
                bytes: vec![1, 2, 3],
                mime: String::from("audio/wav"),
            }
        );
    }

    #[tokio::test]
    async fn invalid_base64_is_transient() {
        let client = Arc::new(RecordingHttpClient::json(r#"{"audio":"***"}"#));
        let request = RequestEnvelope::new(
            Capability::TextToSpeech,
            Payload::text("hello"),
            InvokeOptions::new(),
        );

        let error = provider(client).invoke(&request).await.expect_err("bad audio");
        assert_eq!(error.kind(), ProviderErrorKind::Transient);
    }

    #[tokio::test]
    async fn text_capabilities_are_unsupported() {
        let client = Arc::new(RecordingHttpClient::json("{}"));
        let request = RequestEnvelope::new(
            Capability::Classify,
            Payload::text("hello"),
            InvokeOptions::new(),
        );

        let error = provider(client).invoke(&request).await.expect_err("unsupported");
        assert!(error.is_permanent());
    }
}
