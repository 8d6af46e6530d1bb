use thiserror::Error;

#[derive(Error, Debug)]
pub enum NoteError {
    #[error("Image error: {0}")]
    Image(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vision error: {0}")]
    Vision(String),

    #[error("Vision unavailable: {0}")]
    VisionUnavailable(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM rate limit exceeded, retry after {retry_after:?} seconds")]
    LlmRateLimit { retry_after: Option<u64> },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Note store error: {0}")]
    Store(String),

    #[error("Graph extraction error: {0}")]
    Graph(String),
}

impl From<image::ImageError> for NoteError {
    fn from(error: image::ImageError) -> Self {
        NoteError::Image(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NoteError>;
