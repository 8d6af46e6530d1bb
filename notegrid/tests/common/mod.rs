#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::json;
use tempfile::NamedTempFile;

use notegrid::config::{Config, GraphConfig, LlmConfig, OcrConfig, PipelineConfig, VisionConfig};
use notegrid::error::Result;
use notegrid::ocr::{LocalRecognizer, LocalText};

pub const NOTE_YELLOW: Rgb<u8> = Rgb([250, 235, 120]);

/// Config with every remote endpoint pointed at `base_url` and no retries.
pub fn test_config(base_url: Option<&str>) -> Config {
    Config {
        vision: VisionConfig {
            model: "openai/gpt-4o".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: base_url.map(str::to_string),
            timeout_secs: 5,
            max_tokens: 500,
            temperature: 0.0,
            max_retries: 0,
        },
        ocr: OcrConfig::default(),
        llm: base_url.map(|url| LlmConfig {
            model: "openai/gpt-4o-mini".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: Some(url.to_string()),
            timeout_secs: 5,
            max_retries: 0,
        }),
        pipeline: PipelineConfig {
            max_retries: 0,
            retry_base_ms: 10,
            processing_timeout_secs: 30,
            max_working_dimension: 2000,
        },
        graph: base_url.map(|url| GraphConfig {
            extractor_url: url.to_string(),
            timeout_secs: 5,
        }),
    }
}

/// Plain sticky-note colored page.
pub fn blank_page(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, NOTE_YELLOW))
}

/// Writes `image` as PNG into a temp file that lives as long as the handle.
pub fn write_temp_png(image: &DynamicImage) -> NamedTempFile {
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("Failed to encode PNG");

    let mut file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(&bytes).expect("Failed to write temp image");
    file
}

/// OpenAI-style chat completion body carrying `content`.
pub fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o",
        "choices": [
            {
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }
        ],
        "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 }
    })
}

/// Local recognizer that always reads the same text.
pub struct FixedOcr {
    pub text: String,
    pub confidence: f64,
}

impl FixedOcr {
    pub fn shared(text: &str, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            confidence,
        })
    }
}

#[async_trait]
impl LocalRecognizer for FixedOcr {
    async fn recognize(&self, _image_png: &[u8]) -> Result<LocalText> {
        Ok(LocalText {
            text: self.text.clone(),
            engine_confidence: self.confidence,
        })
    }
}
