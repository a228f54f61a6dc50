use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aigate_core::http_client::HttpFuture;
use aigate_core::{
    AnthropicProvider, Capability, Gateway, HttpClient, HttpRequest, HttpResponse,
    InvokeOptions, OpenAiCompatibleProvider, Output, Payload, Provider, ProviderErrorKind,
    ProviderRegistry, ProviderSettings, RequestEnvelope, ScriptedProvider, SpeechServiceProvider,
};

/// Answers every request with the same status and body.
struct CannedHttpClient {
    status: u16,
    body: String,
    calls: AtomicUsize,
}

impl CannedHttpClient {
    fn new(status: u16, body: &str) -> Arc<Self> {
        Arc::new(Self {
            status,
            body: body.to_owned(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HttpClient for CannedHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        let _ = request;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = HttpResponse::with_status(self.status, self.body.clone());
        Box::pin(async move { Ok(response) })
    }
}

const OPENAI_SENTIMENT: &str = r#"{"choices":[{"message":{"content":"negative"}}]}"#;
const ANTHROPIC_SENTIMENT: &str = r#"{"content":[{"type":"text","text":"negative"}]}"#;

fn openai(client: Arc<CannedHttpClient>) -> OpenAiCompatibleProvider {
    OpenAiCompatibleProvider::new("openai", "https://api.openai.example/v1", Some(String::from("sk-test")))
        .with_http_client(client)
}

fn anthropic(client: Arc<CannedHttpClient>) -> AnthropicProvider {
    AnthropicProvider::new("anthropic", "https://api.anthropic.example", Some(String::from("key")))
        .with_http_client(client)
}

fn speech(client: Arc<CannedHttpClient>) -> SpeechServiceProvider {
    SpeechServiceProvider::new("speech", "https://speech.example", Some(String::from("key")))
        .with_http_client(client)
}

fn sentiment_request() -> RequestEnvelope {
    RequestEnvelope::new(
        Capability::Sentiment,
        Payload::text("the streetlight is still broken"),
        InvokeOptions::new(),
    )
}

#[tokio::test]
async fn test_every_adapter_declares_name_and_capabilities() {
    let client = CannedHttpClient::new(200, "{}");
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(openai(client.clone())),
        Arc::new(anthropic(client.clone())),
        Arc::new(speech(client)),
        Arc::new(ScriptedProvider::new("scripted")),
    ];

    for provider in providers {
        assert!(!provider.name().is_empty());
        assert!(!provider.capabilities().is_empty(), "{}", provider.name());
    }
}

#[tokio::test]
async fn test_text_adapters_parse_single_label_sentiment() {
    let openai_client = CannedHttpClient::new(200, OPENAI_SENTIMENT);
    let anthropic_client = CannedHttpClient::new(200, ANTHROPIC_SENTIMENT);
    let request = sentiment_request();

    for provider in [
        Arc::new(openai(openai_client.clone())) as Arc<dyn Provider>,
        Arc::new(anthropic(anthropic_client.clone())),
    ] {
        let reply = provider.invoke(&request).await.expect("sentiment reply");
        assert_eq!(reply.output.label(), Some("negative"), "{}", provider.name());
        assert!(reply.confidence > 0.0 && reply.confidence <= 1.0);
    }

    assert_eq!(openai_client.calls(), 1);
    assert_eq!(anthropic_client.calls(), 1);
}

#[tokio::test]
async fn test_unsupported_capability_is_permanent_without_http_call() {
    let client = CannedHttpClient::new(200, "{}");
    let tts = RequestEnvelope::new(
        Capability::TextToSpeech,
        Payload::text("hello"),
        InvokeOptions::new(),
    );
    let classify = RequestEnvelope::new(
        Capability::Classify,
        Payload::text("hello"),
        InvokeOptions::new(),
    );

    let text_error = openai(client.clone()).invoke(&tts).await.expect_err("unsupported");
    let speech_error = speech(client.clone())
        .invoke(&classify)
        .await
        .expect_err("unsupported");

    assert_eq!(text_error.kind(), ProviderErrorKind::Permanent);
    assert_eq!(speech_error.kind(), ProviderErrorKind::Permanent);
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_http_status_classification_is_shared_by_adapters() {
    let request = sentiment_request();
    let cases = [
        (400, ProviderErrorKind::Permanent),
        (401, ProviderErrorKind::Permanent),
        (408, ProviderErrorKind::Transient),
        (429, ProviderErrorKind::Transient),
        (500, ProviderErrorKind::Transient),
        (503, ProviderErrorKind::Transient),
    ];

    for (status, expected) in cases {
        let client = CannedHttpClient::new(status, "upstream says no");
        let error = openai(client.clone())
            .invoke(&request)
            .await
            .expect_err("error status");
        assert_eq!(error.kind(), expected, "openai status {status}");
        assert_eq!(error.status(), Some(status));

        let error = anthropic(client).invoke(&request).await.expect_err("error status");
        assert_eq!(error.kind(), expected, "anthropic status {status}");
    }
}

#[tokio::test]
async fn test_speech_adapter_round_trips_transcript() {
    let client = CannedHttpClient::new(200, r#"{"text":"water main burst","language":"en"}"#);
    let request = RequestEnvelope::new(
        Capability::SpeechToText,
        Payload::audio(vec![1, 2, 3, 4]),
        InvokeOptions::new().with("language", "en"),
    );

    let reply = speech(client).invoke(&request).await.expect("transcript");

    assert_eq!(
        reply.output,
        Output::Transcript {
            text: String::from("water main burst"),
            language: Some(String::from("en")),
        }
    );
}

#[tokio::test]
async fn test_failing_adapter_behind_gateway_degrades_instead_of_failing() {
    let client = CannedHttpClient::new(503, "maintenance");
    let provider: Arc<dyn Provider> = Arc::new(openai(client.clone()));
    let registry = ProviderRegistry::builder()
        .register(provider, ProviderSettings::new(1))
        .build()
        .expect("registry builds");
    let gateway = Gateway::new(registry);

    let result = gateway
        .invoke(
            Capability::ImproveText,
            Payload::text("please   fix the sign"),
            InvokeOptions::new(),
        )
        .await;

    assert!(result.degraded);
    assert_eq!(result.output.as_text(), Some("Please fix the sign."));
    assert_eq!(client.calls(), 1);
}
