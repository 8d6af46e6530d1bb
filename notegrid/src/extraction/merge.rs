use similar::{capture_diff_slices, Algorithm, DiffTag};

use crate::framework::{calculate_confidence, clamp_unit};
use crate::postprocess::{is_plausible_word, word_core};

use super::{ExtractionMethod, ExtractionResult, HybridResult};

const LOCAL_WEIGHT: f64 = 0.3;
const REMOTE_WEIGHT: f64 = 0.7;
const ALLOWED_PUNCTUATION: &str = ".,!?:;-()[]{}\"'/\\";

fn is_unusual(c: char) -> bool {
    !(c.is_alphanumeric() || c == '_' || c.is_whitespace() || ALLOWED_PUNCTUATION.contains(c))
}

/// Recognizer debris: blank, mostly symbols, an overlong run, or mostly
/// one-letter words.
pub fn looks_like_noise(text: &str) -> bool {
    if text.trim().is_empty() {
        return true;
    }

    let total = text.chars().count() as f64;
    let unusual = text.chars().filter(|&c| is_unusual(c)).count() as f64;
    if unusual > total * 0.3 {
        return true;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.iter().any(|w| w.chars().count() > 20) {
        return true;
    }

    let single = words.iter().filter(|w| w.chars().count() == 1).count() as f64;
    single > words.len() as f64 * 0.5
}

/// Heuristic score for a vision transcription: starts at 0.9, loses for
/// very short replies, gains a little per kind of structure present.
pub fn vision_confidence(text: &str) -> f64 {
    if text.trim().is_empty() {
        return 0.0;
    }

    let words = text.split_whitespace().count();
    let mut confidence: f64 = 0.9;
    if words < 3 {
        confidence -= 0.2;
    } else if words < 10 {
        confidence -= 0.1;
    }

    if text.contains("##") {
        confidence += 0.05;
    }
    if ["•", "-", "*", "1.", "2.", "3."].iter().any(|m| text.contains(m)) {
        confidence += 0.05;
    }
    if ["[ ]", "[x]", "☐", "☑"].iter().any(|m| text.contains(m)) {
        confidence += 0.05;
    }

    clamp_unit(confidence)
}

/// Blends the engine's own score with how clean and word-like its output is.
pub fn local_confidence(text: &str, engine_confidence: f64) -> f64 {
    if text.trim().is_empty() {
        return 0.0;
    }

    let total = text.chars().filter(|c| !c.is_whitespace()).count().max(1) as f64;
    let unusual = text.chars().filter(|&c| is_unusual(c)).count() as f64;
    let clean_ratio = 1.0 - unusual / total;

    let words: Vec<String> = text
        .split_whitespace()
        .map(word_core)
        .filter(|w| !w.is_empty())
        .collect();
    let word_shape = if words.is_empty() {
        0.0
    } else {
        let plausible = words
            .iter()
            .filter(|w| is_plausible_word(w) || w.chars().all(|c| c.is_ascii_digit()))
            .count();
        plausible as f64 / words.len() as f64
    };

    calculate_confidence(
        &[
            ("engine", clamp_unit(engine_confidence)),
            ("clean", clamp_unit(clean_ratio)),
            ("words", word_shape),
        ],
        Some(&[("engine", 0.5), ("clean", 0.25), ("words", 0.25)]),
    )
}

/// Character-level alignment with the vision text winning every conflict.
pub fn merge_texts(local: &str, remote: &str) -> (String, Vec<String>) {
    let a: Vec<char> = local.chars().collect();
    let b: Vec<char> = remote.chars().collect();
    let span = |chars: &[char], range: std::ops::Range<usize>| chars[range].iter().collect::<String>();

    let mut merged = String::with_capacity(remote.len().max(local.len()));
    let mut differences = Vec::new();

    for op in capture_diff_slices(Algorithm::Lcs, &a, &b) {
        let (tag, old, new) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => merged.push_str(&span(&a, old)),
            DiffTag::Replace => {
                let (ocr, vision) = (span(&a, old), span(&b, new));
                differences.push(format!("ocr '{ocr}' replaced by vision '{vision}'"));
                merged.push_str(&vision);
            }
            DiffTag::Delete => {
                let extra = span(&a, old);
                if looks_like_noise(&extra) {
                    differences.push(format!("removed ocr noise '{extra}'"));
                } else {
                    merged.push_str(&extra);
                }
            }
            DiffTag::Insert => {
                let added = span(&b, new);
                differences.push(format!("added vision text '{added}'"));
                merged.push_str(&added);
            }
        }
    }

    (merged, differences)
}

/// Reconciles both passes. A side with zero confidence is ignored; when both
/// are present the vision text is ground truth.
pub fn merge_results(local: &ExtractionResult, remote: &ExtractionResult) -> HybridResult {
    if remote.confidence == 0.0 {
        return HybridResult {
            text: local.text.clone(),
            confidence: local.confidence,
            ocr_text: local.text.clone(),
            vision_text: String::new(),
            ocr_confidence: local.confidence,
            vision_confidence: 0.0,
            differences: vec!["vision extraction failed".to_string()],
            extraction_method: ExtractionMethod::OcrOnly,
            warnings: Vec::new(),
            retry_count: 0,
        };
    }

    if local.confidence == 0.0 {
        return HybridResult {
            text: remote.text.clone(),
            confidence: remote.confidence,
            ocr_text: String::new(),
            vision_text: remote.text.clone(),
            ocr_confidence: 0.0,
            vision_confidence: remote.confidence,
            differences: vec!["ocr extraction failed".to_string()],
            extraction_method: ExtractionMethod::VisionOnly,
            warnings: Vec::new(),
            retry_count: 0,
        };
    }

    let (text, differences) = merge_texts(&local.text, &remote.text);
    let confidence = (local.confidence * LOCAL_WEIGHT + remote.confidence * REMOTE_WEIGHT).min(1.0);

    HybridResult {
        text,
        confidence,
        ocr_text: local.text.clone(),
        vision_text: remote.text.clone(),
        ocr_confidence: local.confidence,
        vision_confidence: remote.confidence,
        differences,
        extraction_method: ExtractionMethod::Hybrid,
        warnings: Vec::new(),
        retry_count: 0,
    }
}
