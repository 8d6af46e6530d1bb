//! Prompt templates for the remote vision and completion capabilities.
//!
//! Plain `format!()` interpolation, so a missing variable is a compile error.

use crate::postprocess::ErrorCandidate;

/// Prompt asking a vision model to describe how many notes a page holds and
/// how they are arranged.
///
/// # Example
/// ```
/// use notegrid::llm::prompts::layout_analysis_prompt;
///
/// assert!(layout_analysis_prompt().contains("total_notes"));
/// ```
pub fn layout_analysis_prompt() -> String {
    r#"Analyze this image and identify all individual notes. For each note you can see:
1. Count the total number of notes
2. Describe the layout (e.g., "3x3 grid", "2x4 layout", etc.)
3. For each note, provide:
   - Position number (1-9 for 3x3 grid, or sequential numbering)
   - Brief description of the content
   - Whether it has a QR code
   - Whether it has a title (look for ##Title## format or underlined text)
   - Type of content (bullet points, numbered list, checkbox list, plain text, etc.)

Return your analysis as JSON in this format:
{
  "total_notes": 9,
  "layout": "3x3 grid",
  "notes": [
    {"position": 1, "description": "Brief description of content", "has_qr_code": true, "has_title": false, "content_type": "bullet_points"}
  ]
}"#
    .to_string()
}

/// Prompt asking a vision model to transcribe one note region verbatim.
///
/// # Example
/// ```
/// use notegrid::llm::prompts::region_extraction_prompt;
///
/// let prompt = region_extraction_prompt("Note 2 of 9");
/// assert!(prompt.contains("Note 2 of 9"));
/// ```
pub fn region_extraction_prompt(region_description: &str) -> String {
    format!(
        r#"Extract all text from this note region. Pay special attention to:
1. Preserve the exact formatting (bullet points, numbered lists, checkboxes)
2. Look for titles marked with ##Title## format or underlined text
3. Identify action items with checkboxes (☐, ☑, [ ], [x])
4. Preserve special characters and symbols
5. Maintain line breaks and spacing

Note description: {region_description}

Return the extracted text exactly as written, preserving all formatting."#
    )
}

/// Prompt asking a completion model to confirm or reject suspected
/// recognition errors, answering with a JSON array.
pub fn correction_prompt(text: &str, candidates: &[ErrorCandidate]) -> String {
    let error_context = candidates
        .iter()
        .map(|candidate| {
            format!(
                "- Word '{}' (confidence: {:.2}, alternatives: {})",
                candidate.word,
                candidate.confidence,
                candidate.alternatives.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are correcting potential OCR errors in handwritten text.

Original text:
{text}

Potential errors identified:
{error_context}

For each error, determine:
1. Is it actually an error?
2. If yes, what is the correct word?
3. Why (provide brief reasoning)

Consider the context carefully. Only correct if you are confident.

Respond with valid JSON only, as an array:
[
  {{"original": "word", "corrected": "word", "confidence": 0.95, "reason": "explanation"}}
]"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correction_prompt_lists_candidates() {
        let candidates = vec![ErrorCandidate {
            word: "tirne".to_string(),
            position: 3,
            confidence: 0.4,
            alternatives: vec!["time".to_string(), "tine".to_string()],
        }];

        let prompt = correction_prompt("meet at tirne", &candidates);

        assert!(prompt.contains("meet at tirne"));
        assert!(prompt.contains("- Word 'tirne' (confidence: 0.40, alternatives: time, tine)"));
        assert!(prompt.contains(r#"{"original": "word""#));
    }

    #[test]
    fn test_layout_prompt_requests_json_shape() {
        let prompt = layout_analysis_prompt();
        assert!(prompt.contains("\"layout\""));
        assert!(prompt.contains("has_qr_code"));
    }
}
