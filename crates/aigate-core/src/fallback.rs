//! Deterministic local computations used when every provider is unavailable.
//!
//! Results are intentionally modest: they keep the caller's workflow moving
//! and are always flagged `degraded` by the gateway.

use std::collections::BTreeMap;

use crate::request::{normalize_text, InvokeOptions, Payload};
use crate::response::{Output, Polarity};
use crate::Capability;

pub const UNCATEGORIZED: &str = "general";
pub const SILENT_AUDIO_MIME: &str = "audio/mpeg";

const TEXT_CONFIDENCE: f64 = 0.3;
const MAX_CLASSIFY_CONFIDENCE: f64 = 0.5;
const DEFAULT_SUMMARY_SENTENCES: usize = 2;

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "infrastructure",
        &[
            "road", "street", "pothole", "bridge", "sidewalk", "streetlight", "lamp", "pavement",
            "sewer", "pipe", "leak", "drain", "construction", "building", "electric",
        ],
    ),
    (
        "public-safety",
        &[
            "crime", "theft", "robbery", "police", "violence", "assault", "danger", "unsafe",
            "fire", "emergency", "vandal", "accident", "gang",
        ],
    ),
    (
        "health",
        &[
            "hospital", "clinic", "doctor", "health", "medical", "disease", "medicine", "sick",
            "vaccine", "ambulance", "nurse",
        ],
    ),
    (
        "environment",
        &[
            "garbage", "trash", "waste", "pollution", "noise", "tree", "park", "recycl", "smell",
            "river", "dump", "litter",
        ],
    ),
    (
        "education",
        &[
            "school", "teacher", "student", "classroom", "university", "education", "library",
            "scholarship",
        ],
    ),
    (
        "transport",
        &[
            "bus", "train", "metro", "traffic", "parking", "transit", "taxi", "bike", "route",
            "station", "subway",
        ],
    ),
    (
        "administration",
        &[
            "permit", "license", "tax", "office", "paperwork", "fee", "bureaucra", "appointment",
            "document", "certificate", "procedure",
        ],
    ),
];

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "thanks", "thank", "excellent", "happy", "satisfied", "resolved", "fixed",
    "helpful", "clean", "safe", "quick", "appreciate", "love", "wonderful", "nice", "efficient",
    "glad", "improved",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "broken", "dirty", "dangerous", "slow", "angry", "unacceptable",
    "worst", "poor", "problem", "disappointed", "ignored", "unsafe", "noisy", "late", "useless",
    "horrible", "hate", "failed", "abandoned",
];

const NEGATORS: &[&str] = &[
    "not", "no", "never", "don't", "doesn't", "isn't", "wasn't", "aren't", "can't", "won't",
    "didn't", "nobody", "nothing", "without",
];

/// Locally computed output and its confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackOutput {
    pub output: Output,
    pub confidence: f64,
}

/// Computes the degraded-mode result for `capability`. Pure and deterministic.
pub fn compute(capability: Capability, payload: &Payload, options: &InvokeOptions) -> FallbackOutput {
    let text = payload.as_text().unwrap_or_default();

    match capability {
        Capability::ImproveText => FallbackOutput {
            output: Output::text(improve_text(text)),
            confidence: TEXT_CONFIDENCE,
        },
        Capability::Classify => classify(text, &options.categories()),
        Capability::Sentiment => {
            let score = sentiment_score(text);
            FallbackOutput {
                output: Output::Sentiment {
                    polarity: Polarity::from_score(score),
                    score,
                },
                confidence: TEXT_CONFIDENCE,
            }
        }
        Capability::Summarize => FallbackOutput {
            output: Output::text(summarize(
                text,
                options.max_sentences().unwrap_or(DEFAULT_SUMMARY_SENTENCES),
            )),
            confidence: TEXT_CONFIDENCE,
        },
        Capability::SpeechToText => FallbackOutput {
            output: Output::Transcript {
                text: String::new(),
                language: options.language().map(str::to_owned),
            },
            confidence: 0.0,
        },
        Capability::TextToSpeech => FallbackOutput {
            output: Output::Audio {
                bytes: Vec::new(),
                mime: String::from(SILENT_AUDIO_MIME),
            },
            confidence: 0.0,
        },
    }
}

/// Light-touch cleanup: spacing, capitalization and terminal punctuation.
pub fn improve_text(raw: &str) -> String {
    let collapsed = normalize_text(raw);
    if collapsed.is_empty() {
        return collapsed;
    }

    let mut spaced = String::with_capacity(collapsed.len() + 1);
    for ch in collapsed.chars() {
        if matches!(ch, '.' | ',' | ';' | ':' | '!' | '?') && spaced.ends_with(' ') {
            spaced.pop();
        }
        spaced.push(ch);
    }

    let pronouns_fixed = spaced
        .split(' ')
        .map(|word| {
            let core = word.trim_end_matches(|ch: char| ch.is_ascii_punctuation() && ch != '\'');
            if core == "i" || core.starts_with("i'") {
                format!("I{}", &word[1..])
            } else {
                word.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    let mut improved = String::with_capacity(pronouns_fixed.len() + 1);
    let mut sentence_start = true;
    for ch in pronouns_fixed.chars() {
        if sentence_start && ch.is_alphabetic() {
            improved.extend(ch.to_uppercase());
            sentence_start = false;
            continue;
        }
        improved.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            sentence_start = true;
        } else if ch.is_alphanumeric() {
            sentence_start = false;
        }
    }

    if !improved.ends_with(['.', '!', '?']) {
        improved.push('.');
    }
    improved
}

/// Keyword scoring over `categories`. Unknown categories match on their own name.
pub fn classify(text: &str, categories: &[String]) -> FallbackOutput {
    let tokens = tokenize(text);

    let mut scores = BTreeMap::new();
    let mut best: Option<(&str, usize)> = None;
    let mut total = 0usize;

    for category in categories {
        let keywords = keywords_for(category);
        let hits = tokens
            .iter()
            .filter(|token| keywords.iter().any(|keyword| token.starts_with(keyword.as_str())))
            .count();
        total += hits;
        scores.insert(category.clone(), hits as f64);
        if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
            best = Some((category.as_str(), hits));
        }
    }

    let Some((label, hits)) = best else {
        return FallbackOutput {
            output: Output::Classification {
                label: String::from(UNCATEGORIZED),
                scores: scores.into_keys().map(|category| (category, 0.0)).collect(),
            },
            confidence: 0.0,
        };
    };

    let share = hits as f64 / total as f64;
    let label = label.to_owned();
    let scores = scores
        .into_iter()
        .map(|(category, count)| (category, count / total as f64))
        .collect();

    FallbackOutput {
        output: Output::Classification { label, scores },
        confidence: (share * MAX_CLASSIFY_CONFIDENCE).min(MAX_CLASSIFY_CONFIDENCE),
    }
}

fn keywords_for(category: &str) -> Vec<String> {
    CATEGORY_KEYWORDS
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, keywords)| keywords.iter().map(|keyword| (*keyword).to_owned()).collect())
        .unwrap_or_else(|| {
            category
                .split(|ch: char| !ch.is_alphanumeric())
                .filter(|part| part.len() >= 3)
                .map(str::to_owned)
                .collect()
        })
}

/// Lexicon score in `[-1, 1]`; a negator flips the polarity of the next word.
pub fn sentiment_score(text: &str) -> f64 {
    let mut positive = 0u32;
    let mut negative = 0u32;
    let mut negate = false;

    for token in tokenize(text) {
        if NEGATORS.contains(&token.as_str()) {
            negate = true;
            continue;
        }

        let polarity = if POSITIVE_WORDS.contains(&token.as_str()) {
            Some(true)
        } else if NEGATIVE_WORDS.contains(&token.as_str()) {
            Some(false)
        } else {
            None
        };

        if let Some(is_positive) = polarity {
            if is_positive != negate {
                positive += 1;
            } else {
                negative += 1;
            }
        }
        negate = false;
    }

    let counted = positive + negative;
    if counted == 0 {
        return 0.0;
    }
    (f64::from(positive) - f64::from(negative)) / f64::from(counted)
}

/// First `max_sentences` sentences of `text`.
pub fn summarize(text: &str, max_sentences: usize) -> String {
    let text = normalize_text(text);
    let mut sentences = Vec::new();
    let mut start = 0;

    for (index, ch) in text.char_indices() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let end = index + ch.len_utf8();
        let at_boundary = text[end..].chars().next().map_or(true, char::is_whitespace);
        if at_boundary {
            sentences.push(text[start..end].trim());
            start = end;
        }
    }
    if !text[start..].trim().is_empty() {
        sentences.push(text[start..].trim());
    }

    sentences
        .into_iter()
        .filter(|sentence| !sentence.is_empty())
        .take(max_sentences.max(1))
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '\''))
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}
