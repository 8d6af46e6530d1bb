use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Characters and pairs commonly misread by recognition engines.
const CONFUSIONS: &[(&str, &[&str])] = &[
    ("l", &["I", "1", "|"]),
    ("I", &["l", "1", "|"]),
    ("1", &["l", "I", "|"]),
    ("O", &["0", "o"]),
    ("0", &["O", "o"]),
    ("o", &["O", "0"]),
    ("S", &["5", "$"]),
    ("5", &["S"]),
    ("B", &["8"]),
    ("8", &["B"]),
    ("Z", &["2"]),
    ("2", &["Z"]),
    ("rn", &["m"]),
    ("m", &["rn"]),
    ("vv", &["w"]),
    ("w", &["vv"]),
    ("cl", &["d"]),
    ("d", &["cl"]),
    ("nn", &["m"]),
];

static COMMON_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "be", "to", "of", "and", "a", "in", "that", "have", "i", "it", "for", "not", "on",
        "with", "he", "as", "you", "do", "at", "this", "but", "his", "by", "from", "they", "we",
        "say", "her", "she", "or", "an", "will", "my", "one", "all", "would", "there", "their",
        "what", "so", "up", "out", "if", "about", "who", "get", "which", "go", "me", "when",
        "make", "can", "like", "time", "no", "just", "him", "know", "take", "people", "into",
        "year", "your", "good", "some", "could", "them", "see", "other", "than", "then", "now",
        "look", "only", "come", "its", "over", "think", "also", "back", "after", "use", "two",
        "how", "our", "work", "first", "well", "way", "even", "new", "want", "because", "any",
        "these", "give", "day", "most", "us", "is", "was", "are", "been", "has", "had", "were",
        "said", "each", "many", "more", "call", "find", "long", "down", "did", "made", "may",
        "part",
    ]
    .into_iter()
    .collect()
});

/// Words at or above this recognition confidence are trusted.
pub const CANDIDATE_CONFIDENCE_THRESHOLD: f64 = 0.8;
const DEFAULT_WORD_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorCandidate {
    /// Token as it appears in the text.
    pub word: String,
    /// Index among whitespace-separated tokens.
    pub position: usize,
    pub confidence: f64,
    pub alternatives: Vec<String>,
}

pub fn is_common_word(word: &str) -> bool {
    COMMON_WORDS.contains(word)
}

pub fn is_plausible_word(word: &str) -> bool {
    if is_common_word(word) {
        return true;
    }
    let len = word.chars().count();
    (2..=20).contains(&len) && word.chars().all(|c| c.is_ascii_alphabetic())
}

/// Word characters of a token, case preserved.
pub fn word_core(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// Spelling alternatives from single-character and pair substitutions, in
/// discovery order, keeping only plausible words.
pub fn generate_alternatives(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut alternatives: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if candidate != word && is_plausible_word(&candidate) && !alternatives.contains(&candidate) {
            alternatives.push(candidate);
        }
    };

    for width in [1usize, 2] {
        if chars.len() < width {
            continue;
        }
        for i in 0..=chars.len() - width {
            let slice: String = chars[i..i + width].iter().collect();
            let Some((_, replacements)) = CONFUSIONS.iter().find(|(from, _)| *from == slice) else {
                continue;
            };
            for replacement in replacements.iter() {
                let mut candidate: String = chars[..i].iter().collect();
                candidate.push_str(replacement);
                candidate.extend(chars[i + width..].iter());
                push(candidate);
            }
        }
    }

    alternatives
}

/// Tokens that are not common words, fall under the confidence threshold and
/// have at least one plausible alternative.
pub fn identify_error_candidates(text: &str, word_confidence: Option<&[f64]>) -> Vec<ErrorCandidate> {
    text.split_whitespace()
        .enumerate()
        .filter_map(|(position, token)| {
            let clean = word_core(token).to_lowercase();
            if clean.is_empty() || is_common_word(&clean) {
                return None;
            }

            let confidence = word_confidence
                .and_then(|scores| scores.get(position).copied())
                .unwrap_or(DEFAULT_WORD_CONFIDENCE);
            if confidence >= CANDIDATE_CONFIDENCE_THRESHOLD {
                return None;
            }

            let alternatives = generate_alternatives(&clean);
            if alternatives.is_empty() {
                return None;
            }

            Some(ErrorCandidate {
                word: token.to_string(),
                position,
                confidence,
                alternatives,
            })
        })
        .collect()
}
