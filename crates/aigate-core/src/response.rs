//! Response-side types returned to gateway callers.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::providers::ProviderReply;

/// `provider_used` value for results computed locally.
pub const LOCAL_FALLBACK: &str = "local-fallback";

/// Sentiment direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Neutral,
    Negative,
}

impl Polarity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }

    pub fn from_score(score: f64) -> Self {
        if score > 0.15 {
            Self::Positive
        } else if score < -0.15 {
            Self::Negative
        } else {
            Self::Neutral
        }
    }

    /// Reads the first polarity word found in a free-form model answer.
    pub fn from_label(label: &str) -> Option<Self> {
        label
            .split(|ch: char| !ch.is_ascii_alphabetic())
            .find_map(|word| match word.to_ascii_lowercase().as_str() {
                "positive" => Some(Self::Positive),
                "neutral" | "mixed" => Some(Self::Neutral),
                "negative" => Some(Self::Negative),
                _ => None,
            })
    }
}

impl Display for Polarity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed capability output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    Text {
        text: String,
    },
    Classification {
        label: String,
        scores: BTreeMap<String, f64>,
    },
    Sentiment {
        polarity: Polarity,
        score: f64,
    },
    Transcript {
        text: String,
        language: Option<String>,
    },
    Audio {
        bytes: Vec<u8>,
        mime: String,
    },
}

impl Output {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text { text: value.into() }
    }

    /// Text-bearing outputs (rewritten text or transcript).
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } | Self::Transcript { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Classification { label, .. } => Some(label.as_str()),
            Self::Sentiment { polarity, .. } => Some(polarity.as_str()),
            _ => None,
        }
    }
}

/// Result handed back to the caller. Always present, possibly degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseResult {
    pub output: Output,
    /// Provider name, or [`LOCAL_FALLBACK`].
    pub provider_used: String,
    pub degraded: bool,
    pub latency_ms: u64,
    pub confidence: f64,
}

impl ResponseResult {
    pub fn from_provider(provider: impl Into<String>, reply: ProviderReply, latency: Duration) -> Self {
        Self {
            output: reply.output,
            provider_used: provider.into(),
            degraded: false,
            latency_ms: duration_ms(latency),
            confidence: reply.confidence.clamp(0.0, 1.0),
        }
    }

    pub fn local_fallback(output: Output, confidence: f64, latency: Duration) -> Self {
        Self {
            output,
            provider_used: String::from(LOCAL_FALLBACK),
            degraded: true,
            latency_ms: duration_ms(latency),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn is_local_fallback(&self) -> bool {
        self.provider_used == LOCAL_FALLBACK
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polarity_from_label_reads_first_keyword() {
        assert_eq!(Polarity::from_label("Negative (-0.7)"), Some(Polarity::Negative));
        assert_eq!(Polarity::from_label("answer: positive"), Some(Polarity::Positive));
        assert_eq!(Polarity::from_label("unsure"), None);
    }

    #[test]
    fn polarity_from_score_has_neutral_band() {
        assert_eq!(Polarity::from_score(0.1), Polarity::Neutral);
        assert_eq!(Polarity::from_score(0.5), Polarity::Positive);
        assert_eq!(Polarity::from_score(-0.5), Polarity::Negative);
    }

    #[test]
    fn output_serializes_with_type_tag() {
        let output = Output::Sentiment {
            polarity: Polarity::Negative,
            score: -0.5,
        };
        let json = serde_json::to_value(&output).expect("serializes");

        assert_eq!(json["type"], "sentiment");
        assert_eq!(json["polarity"], "negative");
    }
}
