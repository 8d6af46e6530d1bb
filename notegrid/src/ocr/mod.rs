//! Local text recognition.
//!
//! The engine is reached through [`LocalRecognizer`] so extraction can run
//! against Tesseract in production and a stub in tests.
//!
//! ```rust,ignore
//! let ocr = OcrProvider::new(&config.ocr);
//! let LocalText { text, engine_confidence } = ocr.recognize(&png).await?;
//! ```

mod provider;

use async_trait::async_trait;

use crate::error::Result;

pub use provider::OcrProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct LocalText {
    pub text: String,
    /// Engine's own mean word confidence in `[0, 1]`.
    pub engine_confidence: f64,
}

#[async_trait]
pub trait LocalRecognizer: Send + Sync {
    async fn recognize(&self, image_png: &[u8]) -> Result<LocalText>;
}
