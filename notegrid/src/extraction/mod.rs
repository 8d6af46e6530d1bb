//! Hybrid text extraction for one note region.
//!
//! In hybrid mode the local engine and the vision model read the crop
//! concurrently and their texts are aligned, the vision text winning where
//! they disagree. LLM mode calls the vision model alone and has no fallback.

mod merge;

use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::OcrMode;
use crate::error::{NoteError, Result};
use crate::framework::{execute_with_retry_counted, PartialResult, RetryPolicy, SharedSink, StageResult};
use crate::llm::prompts::region_extraction_prompt;
use crate::ocr::LocalRecognizer;
use crate::preprocess::{encode_png, enhance_for_ocr};
use crate::vision::VisionClient;

pub use merge::{local_confidence, looks_like_noise, merge_results, merge_texts, vision_confidence};

const REGION_DESCRIPTION: &str =
    "a single handwritten note; titles may be marked ##Title##, with bullet points, numbered lists and checkboxes";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    OcrOnly,
    VisionOnly,
    Hybrid,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OcrOnly => write!(f, "ocr_only"),
            Self::VisionOnly => write!(f, "vision_only"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Output of one extraction pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    pub text: String,
    pub confidence: f64,
    pub method: String,
    pub raw: serde_json::Value,
}

impl ExtractionResult {
    fn failed(method: &str, error: &NoteError) -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            method: format!("{method}_failed"),
            raw: json!({ "error": error.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HybridResult {
    pub text: String,
    pub confidence: f64,
    pub ocr_text: String,
    pub vision_text: String,
    pub ocr_confidence: f64,
    pub vision_confidence: f64,
    pub differences: Vec<String>,
    pub extraction_method: ExtractionMethod,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
}

pub struct ExtractionEngine {
    ocr: Arc<dyn LocalRecognizer>,
    vision: Arc<dyn VisionClient>,
    retry: RetryPolicy,
    sink: SharedSink,
}

impl ExtractionEngine {
    pub fn new(
        ocr: Arc<dyn LocalRecognizer>,
        vision: Arc<dyn VisionClient>,
        retry: RetryPolicy,
        sink: SharedSink,
    ) -> Self {
        Self {
            ocr,
            vision,
            retry,
            sink,
        }
    }

    /// Reads the text of an already-cropped region.
    ///
    /// `ocr_confidence_threshold` is on the 0-100 scale; a hybrid result whose
    /// local confidence falls under it carries a warning.
    pub async fn process(
        &self,
        region: &DynamicImage,
        mode: OcrMode,
        vision_model: &str,
        ocr_confidence_threshold: u8,
    ) -> StageResult<HybridResult> {
        let color_png = encode_png(region)
            .map_err(|e| PartialResult::from(e).with_data(json!({ "ocr_mode": mode.to_string() })))?;

        let (outcome, retries) = match mode {
            OcrMode::Llm => {
                let (outcome, retries) =
                    execute_with_retry_counted("extraction", &self.retry, self.sink.as_ref(), || {
                        self.extract_vision_only(&color_png, vision_model)
                    })
                    .await;
                (
                    outcome.map_err(|partial| partial.with_data(json!({ "ocr_mode": "llm" }))),
                    retries,
                )
            }
            OcrMode::Hybrid => {
                let gray_png = encode_png(&DynamicImage::ImageLuma8(enhance_for_ocr(region)))
                    .map_err(PartialResult::from)?;
                execute_with_retry_counted("extraction", &self.retry, self.sink.as_ref(), || {
                    self.extract_hybrid(&gray_png, &color_png, vision_model)
                })
                .await
            }
        };
        let mut result = outcome?;
        result.retry_count = retries;

        let threshold = f64::from(ocr_confidence_threshold) / 100.0;
        if result.extraction_method != ExtractionMethod::VisionOnly && result.ocr_confidence < threshold {
            result.warnings.push(format!(
                "local recognition confidence {:.0} below threshold {ocr_confidence_threshold}",
                result.ocr_confidence * 100.0
            ));
        }

        self.sink
            .record("extraction", "ocr_confidence", result.ocr_confidence);
        self.sink
            .record("extraction", "vision_confidence", result.vision_confidence);
        self.sink
            .record("extraction", "final_confidence", result.confidence);
        self.sink
            .record("extraction", "text_length", result.text.chars().count() as f64);

        Ok(result)
    }

    async fn extract_vision_only(&self, png: &[u8], model: &str) -> Result<HybridResult> {
        let remote = self.extract_with_vision(png, model).await;
        if remote.confidence == 0.0 || remote.text.trim().is_empty() {
            let reason = remote.raw["error"]
                .as_str()
                .unwrap_or("vision model returned no text")
                .to_string();
            tracing::error!(reason = %reason, "vision-only extraction failed");
            return Err(NoteError::Vision(format!(
                "vision extraction failed in llm mode: {reason}"
            )));
        }

        Ok(HybridResult {
            text: remote.text.clone(),
            confidence: remote.confidence,
            ocr_text: String::new(),
            vision_text: remote.text,
            ocr_confidence: 0.0,
            vision_confidence: remote.confidence,
            differences: vec!["OCR skipped in LLM mode".to_string()],
            extraction_method: ExtractionMethod::VisionOnly,
            warnings: Vec::new(),
            retry_count: 0,
        })
    }

    async fn extract_hybrid(&self, gray_png: &[u8], color_png: &[u8], model: &str) -> Result<HybridResult> {
        let (local, remote) = tokio::join!(
            self.extract_with_ocr(gray_png),
            self.extract_with_vision(color_png, model)
        );

        if local.confidence == 0.0 && remote.confidence == 0.0 {
            return Err(NoteError::Processing(format!(
                "both extraction passes failed (ocr: {}, vision: {})",
                local.raw["error"].as_str().unwrap_or("no text"),
                remote.raw["error"].as_str().unwrap_or("no text"),
            )));
        }

        let merged = merge_results(&local, &remote);
        tracing::debug!(
            method = %merged.extraction_method,
            ocr_confidence = local.confidence,
            vision_confidence = remote.confidence,
            differences = merged.differences.len(),
            "extraction merged"
        );
        Ok(merged)
    }

    async fn extract_with_ocr(&self, png: &[u8]) -> ExtractionResult {
        match self.ocr.recognize(png).await {
            Ok(local) => {
                let confidence = local_confidence(&local.text, local.engine_confidence);
                ExtractionResult {
                    raw: json!({
                        "engine_confidence": local.engine_confidence,
                        "word_count": local.text.split_whitespace().count(),
                    }),
                    text: local.text,
                    confidence,
                    method: "tesseract".to_string(),
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "local recognition failed");
                ExtractionResult::failed("ocr", &error)
            }
        }
    }

    async fn extract_with_vision(&self, png: &[u8], model: &str) -> ExtractionResult {
        let prompt = region_extraction_prompt(REGION_DESCRIPTION);
        match self.vision.extract_text(png, &prompt, model).await {
            Ok(text) => {
                let text = text.trim().to_string();
                ExtractionResult {
                    confidence: vision_confidence(&text),
                    raw: json!({
                        "model_used": model,
                        "word_count": text.split_whitespace().count(),
                        "character_count": text.chars().count(),
                    }),
                    text,
                    method: "vision_llm".to_string(),
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "vision extraction failed");
                ExtractionResult::failed("vision_llm", &error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::noop_sink;
    use crate::ocr::LocalText;
    use crate::vision::LayoutAnalysis;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};

    struct StubOcr(Option<(&'static str, f64)>);

    #[async_trait]
    impl LocalRecognizer for StubOcr {
        async fn recognize(&self, _png: &[u8]) -> Result<LocalText> {
            self.0
                .map(|(text, engine_confidence)| LocalText {
                    text: text.to_string(),
                    engine_confidence,
                })
                .ok_or_else(|| NoteError::OcrUnavailable("no engine".to_string()))
        }
    }

    struct StubVision(Option<&'static str>);

    #[async_trait]
    impl VisionClient for StubVision {
        async fn extract_text(&self, _png: &[u8], _prompt: &str, _model: &str) -> Result<String> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| NoteError::Vision("service down".to_string()))
        }

        async fn analyze_layout(&self, _png: &[u8], _model: &str) -> Result<LayoutAnalysis> {
            Err(NoteError::Vision("not used".to_string()))
        }
    }

    fn engine(ocr: StubOcr, vision: StubVision) -> ExtractionEngine {
        ExtractionEngine::new(Arc::new(ocr), Arc::new(vision), RetryPolicy::none(), noop_sink())
    }

    fn crop() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([250, 240, 130])))
    }

    #[tokio::test]
    async fn test_hybrid_merges_both_passes() {
        let engine = engine(
            StubOcr(Some(("Meetign at 3 with the team", 0.9))),
            StubVision(Some("Meeting at 3 with the team")),
        );
        let result = engine
            .process(&crop(), OcrMode::Hybrid, "openai/gpt-4o", 60)
            .await
            .unwrap();

        assert_eq!(result.text, "Meeting at 3 with the team");
        assert_eq!(result.extraction_method, ExtractionMethod::Hybrid);
        assert_eq!(result.ocr_text, "Meetign at 3 with the team");
    }

    #[tokio::test]
    async fn test_hybrid_survives_vision_outage() {
        let engine = engine(StubOcr(Some(("call the bank", 0.8))), StubVision(None));
        let result = engine
            .process(&crop(), OcrMode::Hybrid, "openai/gpt-4o", 60)
            .await
            .unwrap();

        assert_eq!(result.text, "call the bank");
        assert_eq!(result.extraction_method, ExtractionMethod::OcrOnly);
    }

    #[tokio::test]
    async fn test_hybrid_with_both_sides_failing_is_partial() {
        let engine = engine(StubOcr(None), StubVision(None));
        let partial = engine
            .process(&crop(), OcrMode::Hybrid, "openai/gpt-4o", 60)
            .await
            .unwrap_err();
        assert!(partial.error_message().contains("both extraction passes failed"));
    }

    #[tokio::test]
    async fn test_llm_mode_with_empty_reply_fails_hard() {
        let engine = engine(StubOcr(Some(("local text is ignored", 0.9))), StubVision(Some("   ")));
        let partial = engine
            .process(&crop(), OcrMode::Llm, "openai/gpt-4o", 60)
            .await
            .unwrap_err();

        assert!(!partial.error_message().is_empty());
        assert_eq!(partial.data["ocr_mode"], "llm");
    }

    #[tokio::test]
    async fn test_llm_mode_skips_local_engine() {
        let engine = engine(StubOcr(None), StubVision(Some("## Groceries ##\n- milk\n- eggs")));
        let result = engine
            .process(&crop(), OcrMode::Llm, "openai/gpt-4o", 60)
            .await
            .unwrap();

        assert_eq!(result.extraction_method, ExtractionMethod::VisionOnly);
        assert_eq!(result.differences, vec!["OCR skipped in LLM mode".to_string()]);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_low_local_confidence_is_flagged() {
        let engine = engine(
            StubOcr(Some(("~~ x q ##", 0.1))),
            StubVision(Some("buy stamps and envelopes today")),
        );
        let result = engine
            .process(&crop(), OcrMode::Hybrid, "openai/gpt-4o", 60)
            .await
            .unwrap();

        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("below threshold 60"));
    }
}
