//! Prompt construction and answer parsing shared by chat-completion adapters.

use std::collections::BTreeMap;

use super::{ProviderError, ProviderReply};
use crate::request::RequestEnvelope;
use crate::response::{Output, Polarity};
use crate::Capability;

const DEFAULT_SUMMARY_SENTENCES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Prompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

pub(super) fn build(provider: &str, request: &RequestEnvelope) -> Result<Prompt, ProviderError> {
    let Some(text) = request.text() else {
        return Err(ProviderError::permanent(
            provider,
            format!("capability '{}' requires a text payload", request.capability),
        ));
    };

    let language = request
        .options
        .language()
        .map(|language| format!(" Answer in language '{language}'."))
        .unwrap_or_default();

    let (system, max_tokens) = match request.capability {
        Capability::ImproveText => (
            format!(
                "Rewrite the citizen report below with correct spelling and grammar and a clear, \
                 respectful tone. Keep its meaning and its language. Reply with the rewritten \
                 text only.{language}"
            ),
            1024,
        ),
        Capability::Classify => (
            format!(
                "Classify the citizen report below into exactly one of these categories: {}. \
                 Reply with the category name only.",
                request.options.categories().join(", ")
            ),
            16,
        ),
        Capability::Sentiment => (
            String::from(
                "Judge the sentiment of the citizen report below. \
                 Reply with exactly one word: positive, neutral or negative.",
            ),
            8,
        ),
        Capability::Summarize => (
            format!(
                "Summarize the citizen report below in at most {} sentences.{language}",
                request
                    .options
                    .max_sentences()
                    .unwrap_or(DEFAULT_SUMMARY_SENTENCES)
            ),
            256,
        ),
        Capability::SpeechToText | Capability::TextToSpeech => {
            return Err(ProviderError::unsupported(provider, request.capability));
        }
    };

    Ok(Prompt {
        system,
        user: text.to_owned(),
        max_tokens,
    })
}

/// Turns a raw model answer into a typed reply for the requested capability.
pub(super) fn parse_reply(
    provider: &str,
    request: &RequestEnvelope,
    answer: &str,
) -> Result<ProviderReply, ProviderError> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(ProviderError::malformed(provider, "empty answer"));
    }

    match request.capability {
        Capability::ImproveText | Capability::Summarize => {
            Ok(ProviderReply::new(Output::text(answer), 0.9))
        }
        Capability::Classify => {
            let normalized = answer.to_ascii_lowercase();
            let label = request
                .options
                .categories()
                .into_iter()
                .find(|category| normalized.contains(category.as_str()))
                .ok_or_else(|| {
                    ProviderError::malformed(provider, format!("unknown category '{answer}'"))
                })?;
            let scores = BTreeMap::from([(label.clone(), 1.0)]);
            Ok(ProviderReply::new(
                Output::Classification { label, scores },
                0.85,
            ))
        }
        Capability::Sentiment => {
            let polarity = Polarity::from_label(answer).ok_or_else(|| {
                ProviderError::malformed(provider, format!("unknown sentiment '{answer}'"))
            })?;
            let score = match polarity {
                Polarity::Positive => 0.8,
                Polarity::Neutral => 0.0,
                Polarity::Negative => -0.8,
            };
            Ok(ProviderReply::new(Output::Sentiment { polarity, score }, 0.85))
        }
        Capability::SpeechToText | Capability::TextToSpeech => {
            Err(ProviderError::unsupported(provider, request.capability))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderErrorKind;
    use crate::request::{InvokeOptions, Payload};

    fn envelope(capability: Capability, options: InvokeOptions) -> RequestEnvelope {
        RequestEnvelope::new(capability, Payload::text("streetlight broken"), options)
    }

    #[test]
    fn classify_prompt_lists_caller_categories() {
        let request = envelope(
            Capability::Classify,
            InvokeOptions::new().with("categories", "roads,water"),
        );
        let prompt = build("p", &request).expect("text payload");

        assert!(prompt.system.contains("roads, water"));
        assert_eq!(prompt.user, "streetlight broken");
    }

    #[test]
    fn classification_answer_must_name_a_category() {
        let request = envelope(
            Capability::Classify,
            InvokeOptions::new().with("categories", "roads,water"),
        );

        let reply = parse_reply("p", &request, "Category: Roads.").expect("known category");
        assert_eq!(reply.output.label(), Some("roads"));

        let error = parse_reply("p", &request, "weather").expect_err("unknown category");
        assert_eq!(error.kind(), ProviderErrorKind::Transient);
    }

    #[test]
    fn sentiment_answer_is_parsed() {
        let request = envelope(Capability::Sentiment, InvokeOptions::new());
        let reply = parse_reply("p", &request, "Negative").expect("polarity word");

        assert_eq!(
            reply.output,
            Output::Sentiment {
                polarity: Polarity::Negative,
                score: -0.8
            }
        );
    }

    #[test]
    fn audio_payload_is_rejected_permanently() {
        let request = RequestEnvelope::new(
            Capability::ImproveText,
            Payload::audio(vec![1, 2, 3]),
            InvokeOptions::new(),
        );
        let error = build("p", &request).expect_err("no text");
        assert!(error.is_permanent());
    }
}
