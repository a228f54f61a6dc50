//! Logical AI capabilities and per-provider capability sets.
//!
//! A [`Capability`] names *what* the caller wants done ("improve this text",
//! "transcribe this audio"), independent of which provider ends up doing it.
//!
//! | Capability | Payload | Output |
//! |------------|---------|--------|
//! | `improve-text` | text | rewritten text |
//! | `classify` | text | category label + scores |
//! | `sentiment` | text | polarity + score |
//! | `summarize` | text | short summary |
//! | `speech-to-text` | audio | transcript |
//! | `text-to-speech` | text | audio |

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Logical operation routed through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    ImproveText,
    Classify,
    Sentiment,
    Summarize,
    SpeechToText,
    TextToSpeech,
}

impl Capability {
    pub const ALL: [Self; 6] = [
        Self::ImproveText,
        Self::Classify,
        Self::Sentiment,
        Self::Summarize,
        Self::SpeechToText,
        Self::TextToSpeech,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ImproveText => "improve-text",
            Self::Classify => "classify",
            Self::Sentiment => "sentiment",
            Self::Summarize => "summarize",
            Self::SpeechToText => "speech-to-text",
            Self::TextToSpeech => "text-to-speech",
        }
    }

    /// Whether the capability is served by a text-completion model.
    pub const fn is_text(self) -> bool {
        !matches!(self, Self::SpeechToText | Self::TextToSpeech)
    }

    /// Whether the capability consumes an audio payload.
    pub const fn takes_audio(self) -> bool {
        matches!(self, Self::SpeechToText)
    }

    const fn bit(self) -> u8 {
        match self {
            Self::ImproveText => 1 << 0,
            Self::Classify => 1 << 1,
            Self::Sentiment => 1 << 2,
            Self::Summarize => 1 << 3,
            Self::SpeechToText => 1 << 4,
            Self::TextToSpeech => 1 << 5,
        }
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "improve-text" => Ok(Self::ImproveText),
            "classify" => Ok(Self::Classify),
            "sentiment" => Ok(Self::Sentiment),
            "summarize" => Ok(Self::Summarize),
            "speech-to-text" | "stt" => Ok(Self::SpeechToText),
            "text-to-speech" | "tts" => Ok(Self::TextToSpeech),
            other => Err(ValidationError::InvalidCapability {
                value: other.to_owned(),
            }),
        }
    }
}

/// Compact set of capabilities a provider can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet {
    bits: u8,
}

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Every text-completion capability.
    pub const fn text() -> Self {
        Self::empty()
            .with(Capability::ImproveText)
            .with(Capability::Classify)
            .with(Capability::Sentiment)
            .with(Capability::Summarize)
    }

    /// Speech-to-text and text-to-speech.
    pub const fn speech() -> Self {
        Self::empty()
            .with(Capability::SpeechToText)
            .with(Capability::TextToSpeech)
    }

    pub const fn with(self, capability: Capability) -> Self {
        Self {
            bits: self.bits | capability.bit(),
        }
    }

    pub const fn supports(self, capability: Capability) -> bool {
        self.bits & capability.bit() != 0
    }

    pub const fn intersect(self, other: Self) -> Self {
        Self {
            bits: self.bits & other.bits,
        }
    }

    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |capability| self.supports(*capability))
    }

    pub fn supported(self) -> Vec<&'static str> {
        self.iter().map(Capability::as_str).collect()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |set, capability| set.with(capability))
    }
}
