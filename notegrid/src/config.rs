use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) if val.trim().is_empty() => None,
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub vision: VisionConfig,
    pub ocr: OcrConfig,
    pub llm: Option<LlmConfig>,
    pub pipeline: PipelineConfig,
    pub graph: Option<GraphConfig>,
}

/// Remote vision model used for layout analysis and text extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retries: u32,
}

/// Local recognition engine.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    pub model: String,
    pub languages: String,
    pub timeout_secs: u64,
    pub max_image_dimension: u32,
    pub min_image_dimension: u32,
}

/// Text completion model used for contextual correction.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Retries per stage after the first attempt.
    pub max_retries: u32,
    /// Backoff unit; attempt `n` sleeps `retry_base_ms * 2^n`.
    pub retry_base_ms: u64,
    pub processing_timeout_secs: u64,
    /// Longest side of the working copy used for detection.
    pub max_working_dimension: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    pub extractor_url: String,
    pub timeout_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o".to_string(),
            api_key: None,
            base_url: None,
            timeout_secs: 60,
            max_tokens: 2000,
            temperature: 0.1,
            max_retries: 3,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model: "local/tesseract".to_string(),
            languages: "eng".to_string(),
            timeout_secs: 60,
            max_image_dimension: 4096,
            min_image_dimension: 50,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_base_ms: 1000,
            processing_timeout_secs: 120,
            max_working_dimension: 2000,
        }
    }
}

impl PipelineConfig {
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        let vision_defaults = VisionConfig::default();
        let ocr_defaults = OcrConfig::default();
        let pipeline_defaults = PipelineConfig::default();

        Self {
            vision: VisionConfig {
                model: env::var("VISION_MODEL").unwrap_or(vision_defaults.model),
                api_key: env::var("VISION_API_KEY")
                    .or_else(|_| env::var("OPENAI_API_KEY"))
                    .ok(),
                base_url: env::var("VISION_BASE_URL").ok(),
                timeout_secs: parse_env_or("VISION_TIMEOUT", vision_defaults.timeout_secs),
                max_tokens: parse_env_or("VISION_MAX_TOKENS", vision_defaults.max_tokens),
                temperature: parse_env_or("VISION_TEMPERATURE", vision_defaults.temperature),
                max_retries: parse_env_or("VISION_MAX_RETRIES", vision_defaults.max_retries),
            },
            ocr: OcrConfig {
                model: env::var("OCR_MODEL").unwrap_or(ocr_defaults.model),
                languages: env::var("OCR_LANGUAGES").unwrap_or(ocr_defaults.languages),
                timeout_secs: parse_env_or("OCR_TIMEOUT", ocr_defaults.timeout_secs),
                max_image_dimension: parse_env_or(
                    "OCR_MAX_DIMENSION",
                    ocr_defaults.max_image_dimension,
                ),
                min_image_dimension: parse_env_or(
                    "OCR_MIN_DIMENSION",
                    ocr_defaults.min_image_dimension,
                ),
            },
            llm: env::var("LLM_MODEL").ok().map(|model| LlmConfig {
                model,
                api_key: env::var("LLM_API_KEY")
                    .or_else(|_| env::var("OPENAI_API_KEY"))
                    .ok(),
                base_url: env::var("LLM_BASE_URL").ok(),
                timeout_secs: parse_env_or("LLM_TIMEOUT", 30),
                max_retries: parse_env_or("LLM_MAX_RETRIES", 3),
            }),
            pipeline: PipelineConfig {
                max_retries: parse_env_or("MAX_RETRIES", pipeline_defaults.max_retries),
                retry_base_ms: parse_env_or("RETRY_BASE_MS", pipeline_defaults.retry_base_ms),
                processing_timeout_secs: parse_env_or(
                    "PROCESSING_TIMEOUT_SECS",
                    pipeline_defaults.processing_timeout_secs,
                ),
                max_working_dimension: parse_env_or(
                    "MAX_WORKING_DIMENSION",
                    pipeline_defaults.max_working_dimension,
                ),
            },
            graph: parse_env_opt::<String>("GRAPH_EXTRACTOR_URL").map(|extractor_url| {
                GraphConfig {
                    extractor_url,
                    timeout_secs: parse_env_or("GRAPH_TIMEOUT", 30),
                }
            }),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Known providers that speak the OpenAI chat-completions protocol.
pub const KNOWN_LLM_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

/// Parse a model name into (provider, model) tuple.
pub fn parse_llm_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_LLM_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    ("local", model)
}

/// Which extraction sources run for a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrMode {
    /// Remote vision model only, no fallback.
    Llm,
    #[default]
    Hybrid,
}

impl FromStr for OcrMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llm" => Ok(OcrMode::Llm),
            "hybrid" | "traditional" | "auto" | "" => Ok(OcrMode::Hybrid),
            other => Err(format!("unknown OCR mode: {other}")),
        }
    }
}

impl fmt::Display for OcrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcrMode::Llm => write!(f, "llm"),
            OcrMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// The physical multi-note format whose pages follow a 3x3 layout.
pub const ROCKETBOOK_SOURCE: &str = "rocketbook";

/// Options recognized per `process` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Local confidence (0-100) under which a region is flagged for escalation.
    pub ocr_confidence_threshold: u8,
    pub vision_model_preference: Option<String>,
    pub source_type: Option<String>,
    pub ocr_mode: OcrMode,
    pub multi_note_detection_enabled: bool,
    pub parallel_processing: bool,
    pub timeout_secs: Option<u64>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            ocr_confidence_threshold: 60,
            vision_model_preference: None,
            source_type: None,
            ocr_mode: OcrMode::Hybrid,
            multi_note_detection_enabled: true,
            parallel_processing: true,
            timeout_secs: None,
        }
    }
}

impl ProcessOptions {
    pub fn is_rocketbook(&self) -> bool {
        is_rocketbook(self.source_type.as_deref())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

pub fn is_rocketbook(source_type: Option<&str>) -> bool {
    source_type
        .map(|s| s.trim().eq_ignore_ascii_case(ROCKETBOOK_SOURCE))
        .unwrap_or(false)
}
