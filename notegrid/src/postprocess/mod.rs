//! Correction and cleanup of extracted text.
//!
//! Suspected recognition errors are confirmed by a completion model when one
//! is configured, else corrected locally from the confusion table. The result
//! is always normalized and given light markdown formatting.

mod candidates;
mod normalize;

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{NoteError, Result};
use crate::framework::{SharedSink, StageResult};
use crate::llm::{prompts::correction_prompt, TextCompletion};

pub use candidates::{
    generate_alternatives, identify_error_candidates, is_common_word, is_plausible_word, word_core,
    ErrorCandidate, CANDIDATE_CONFIDENCE_THRESHOLD,
};
pub use normalize::{format_markdown, normalize_text};

/// Corrections above this confidence are applied.
pub const APPLY_CONFIDENCE_THRESHOLD: f64 = 0.8;
const REMOTE_RESULT_CONFIDENCE: f64 = 0.9;
const LOCAL_RESULT_CONFIDENCE: f64 = 0.6;
const LOCAL_CORRECTION_CONFIDENCE: f64 = 0.7;

static JSON_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Correction {
    pub original: String,
    pub corrected: String,
    pub confidence: f64,
    pub reason: String,
    /// Character offset of the replaced text.
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrectionResult {
    /// Normalized and formatted.
    pub text: String,
    /// Normalized only.
    pub cleaned_text: String,
    pub original_text: String,
    pub corrections: Vec<Correction>,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct ProposedCorrection {
    #[serde(default)]
    original: String,
    #[serde(default)]
    corrected: String,
    #[serde(default = "default_proposed_confidence")]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

fn default_proposed_confidence() -> f64 {
    0.8
}

#[derive(Clone)]
pub struct PostProcessor {
    completion: Option<Arc<dyn TextCompletion>>,
    sink: SharedSink,
}

impl PostProcessor {
    pub fn new(completion: Option<Arc<dyn TextCompletion>>, sink: SharedSink) -> Self {
        Self { completion, sink }
    }

    pub async fn process(
        &self,
        text: &str,
        word_confidence: Option<&[f64]>,
    ) -> StageResult<CorrectionResult> {
        if text.trim().is_empty() {
            return Ok(CorrectionResult {
                text: String::new(),
                cleaned_text: String::new(),
                original_text: text.to_string(),
                corrections: Vec::new(),
                confidence: 1.0,
            });
        }

        let candidates = identify_error_candidates(text, word_confidence);
        self.sink
            .record("postprocess", "error_candidates", candidates.len() as f64);

        let (corrected, corrections, confidence) = if candidates.is_empty() {
            (text.to_string(), Vec::new(), 1.0)
        } else {
            match self.correct_remotely(text, &candidates).await {
                Ok((corrected, corrections)) => (corrected, corrections, REMOTE_RESULT_CONFIDENCE),
                Err(error) => {
                    tracing::warn!(error = %error, "contextual correction unavailable, using local heuristics");
                    let (corrected, corrections) = correct_locally(text, &candidates);
                    (corrected, corrections, LOCAL_RESULT_CONFIDENCE)
                }
            }
        };

        self.sink
            .record("postprocess", "corrections_applied", corrections.len() as f64);
        self.sink.record("postprocess", "confidence", confidence);

        let cleaned_text = normalize_text(&corrected);
        Ok(CorrectionResult {
            text: format_markdown(&cleaned_text),
            cleaned_text,
            original_text: text.to_string(),
            corrections,
            confidence,
        })
    }

    async fn correct_remotely(
        &self,
        text: &str,
        candidates: &[ErrorCandidate],
    ) -> Result<(String, Vec<Correction>)> {
        let completion = self
            .completion
            .as_ref()
            .ok_or_else(|| NoteError::LlmUnavailable("no completion model configured".to_string()))?;

        let response = completion.complete(&correction_prompt(text, candidates)).await?;
        let proposed = parse_corrections(&response)?;
        Ok(apply_corrections(text, proposed))
    }
}

/// Pulls the first-to-last bracket span out of a reply and parses it.
fn parse_corrections(response: &str) -> Result<Vec<ProposedCorrection>> {
    let array = JSON_ARRAY
        .find(response)
        .ok_or_else(|| NoteError::Llm("no JSON array in correction response".to_string()))?;
    Ok(serde_json::from_str(array.as_str())?)
}

/// Applies confident corrections in order, each to the first occurrence left
/// in the text.
fn apply_corrections(text: &str, proposed: Vec<ProposedCorrection>) -> (String, Vec<Correction>) {
    let mut corrected = text.to_string();
    let mut applied = Vec::new();

    for proposal in proposed {
        if proposal.confidence <= APPLY_CONFIDENCE_THRESHOLD || proposal.original.is_empty() {
            continue;
        }
        let Some(position) = replace_first(&mut corrected, &proposal.original, &proposal.corrected)
        else {
            continue;
        };
        applied.push(Correction {
            original: proposal.original,
            corrected: proposal.corrected,
            confidence: proposal.confidence,
            reason: proposal.reason,
            position,
        });
    }

    (corrected, applied)
}

/// Replaces each candidate's word characters with its first alternative when
/// that alternative is a common word.
fn correct_locally(text: &str, candidates: &[ErrorCandidate]) -> (String, Vec<Correction>) {
    let mut corrected = text.to_string();
    let mut applied = Vec::new();

    for candidate in candidates {
        let Some(best) = candidate.alternatives.first() else {
            continue;
        };
        if !is_common_word(best) {
            continue;
        }
        let core = candidates::word_core(&candidate.word);
        if let Some(position) = replace_first(&mut corrected, &core, best) {
            applied.push(Correction {
                original: core,
                corrected: best.clone(),
                confidence: LOCAL_CORRECTION_CONFIDENCE,
                reason: "Common word alternative".to_string(),
                position,
            });
        }
    }

    (corrected, applied)
}

/// Returns the character offset of the replaced occurrence.
fn replace_first(text: &mut String, from: &str, to: &str) -> Option<usize> {
    if from.is_empty() {
        return None;
    }
    let byte_offset = text.find(from)?;
    text.replace_range(byte_offset..byte_offset + from.len(), to);
    Some(text[..byte_offset].chars().count())
}
