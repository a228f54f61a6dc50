//! Request-side types: payloads, caller options and the per-call envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::CacheMode;
use crate::{Capability, ValidationError};

pub const OPTION_PRIORITY: &str = "priority";
pub const OPTION_CACHE: &str = "cache";
pub const OPTION_CATEGORIES: &str = "categories";
pub const OPTION_LANGUAGE: &str = "language";
pub const OPTION_VOICE: &str = "voice";
pub const OPTION_MAX_SENTENCES: &str = "max_sentences";

/// Categories used for classification when the caller supplies none.
pub const DEFAULT_CATEGORIES: [&str; 7] = [
    "infrastructure",
    "public-safety",
    "health",
    "environment",
    "education",
    "transport",
    "administration",
];

/// Raw caller input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Audio(Vec<u8>),
}

impl Payload {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn audio(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Audio(bytes.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&[u8]> {
        match self {
            Self::Audio(bytes) => Some(bytes.as_slice()),
            Self::Text(_) => None,
        }
    }

    /// Characters for text, bytes for audio.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.chars().count(),
            Self::Audio(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text is trimmed with whitespace runs collapsed; audio is left untouched.
    pub fn normalized(&self) -> Self {
        match self {
            Self::Text(text) => Self::Text(normalize_text(text)),
            Self::Audio(bytes) => Self::Audio(bytes.clone()),
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Audio(value)
    }
}

pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Caller options. Keys are case-insensitive; iteration order is stable so
/// options hash identically regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeOptions {
    values: BTreeMap<String, String>,
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.values
            .insert(key.as_ref().trim().to_ascii_lowercase(), value.into());
    }

    /// Parses a `key=value` pair, as accepted on the command line.
    pub fn parse_pair(raw: &str) -> Result<(String, String), ValidationError> {
        match raw.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_owned(), value.trim().to_owned()))
            }
            _ => Err(ValidationError::MalformedOption {
                raw: raw.to_owned(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_high_priority(&self) -> bool {
        self.get(OPTION_PRIORITY)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("high"))
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.get(OPTION_CACHE)
            .map(CacheMode::from_option)
            .unwrap_or_default()
    }

    /// Caller-supplied categories, or [`DEFAULT_CATEGORIES`].
    pub fn categories(&self) -> Vec<String> {
        let supplied = self
            .get(OPTION_CATEGORIES)
            .map(|raw| {
                raw.split(',')
                    .map(|category| category.trim().to_ascii_lowercase())
                    .filter(|category| !category.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if supplied.is_empty() {
            DEFAULT_CATEGORIES.iter().map(|c| (*c).to_owned()).collect()
        } else {
            supplied
        }
    }

    pub fn language(&self) -> Option<&str> {
        self.get(OPTION_LANGUAGE).filter(|value| !value.is_empty())
    }

    pub fn voice(&self) -> Option<&str> {
        self.get(OPTION_VOICE).filter(|value| !value.is_empty())
    }

    pub fn max_sentences(&self) -> Option<usize> {
        self.get(OPTION_MAX_SENTENCES)
            .and_then(|value| value.trim().parse().ok())
            .filter(|count| *count > 0)
    }

    /// Options that change the result. `cache` only steers the lookup.
    fn result_relevant(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(key, _)| *key != OPTION_CACHE)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for InvokeOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Self::new();
        for (key, value) in iter {
            options.insert(key, value);
        }
        options
    }
}

/// Per-call request passed to providers. Built once, discarded after the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub capability: Capability,
    pub payload: Payload,
    pub options: InvokeOptions,
    pub cache_key: String,
}

impl RequestEnvelope {
    pub fn new(capability: Capability, payload: Payload, options: InvokeOptions) -> Self {
        let payload = payload.normalized();
        let cache_key = cache_key(capability, &payload, &options);
        Self {
            capability,
            payload,
            options,
            cache_key,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.as_text()
    }
}

/// Hex SHA-256 over capability, normalized payload and result-relevant options.
///
/// Every variable-length field is length-prefixed, so payload bytes can never
/// be read as an option.
pub fn cache_key(capability: Capability, payload: &Payload, options: &InvokeOptions) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, capability.as_str().as_bytes());

    match payload {
        Payload::Text(text) => {
            hasher.update(b"text");
            hash_field(&mut hasher, text.as_bytes());
        }
        Payload::Audio(bytes) => {
            hasher.update(b"audio");
            hash_field(&mut hasher, bytes);
        }
    }

    for (key, value) in options.result_relevant() {
        hash_field(&mut hasher, key.as_bytes());
        hash_field(&mut hasher, value.as_bytes());
    }

    hex::encode(hasher.finalize())
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
