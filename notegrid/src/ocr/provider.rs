use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leptess::LepTess;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::OcrConfig;
use crate::error::{NoteError, Result};

use super::{LocalRecognizer, LocalText};

#[derive(Clone)]
enum OcrBackend {
    Local { tesseract: Arc<Mutex<LepTess>> },
    Unavailable { reason: String },
}

/// Local Tesseract engine. Recognition runs on the blocking pool behind a
/// mutex since one `LepTess` handle is not reentrant.
#[derive(Clone)]
pub struct OcrProvider {
    backend: OcrBackend,
    timeout: Duration,
}

fn create_tesseract(languages: &str) -> std::result::Result<LepTess, String> {
    LepTess::new(None, languages).map_err(|e| e.to_string())
}

impl OcrProvider {
    pub fn new(config: &OcrConfig) -> Self {
        let model_lower = config.model.to_lowercase();
        let provider_prefix = model_lower.split('/').next().unwrap_or("local");

        let backend = match provider_prefix {
            "local" | "tesseract" => match create_tesseract(&config.languages) {
                Ok(lt) => {
                    info!(languages = %config.languages, "Tesseract OCR initialized");
                    OcrBackend::Local {
                        tesseract: Arc::new(Mutex::new(lt)),
                    }
                }
                Err(e) => {
                    let reason = format!("Tesseract not available: {e}");
                    warn!("{}", reason);
                    OcrBackend::Unavailable { reason }
                }
            },
            other => {
                let reason = format!("Unsupported local OCR engine: {other}");
                warn!("{}", reason);
                OcrBackend::Unavailable { reason }
            }
        };

        Self {
            backend,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            backend: OcrBackend::Unavailable {
                reason: reason.to_string(),
            },
            timeout: Duration::from_secs(60),
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, OcrBackend::Unavailable { .. })
    }

    async fn recognize_internal(&self, image_png: &[u8]) -> Result<LocalText> {
        let tesseract = match &self.backend {
            OcrBackend::Local { tesseract } => Arc::clone(tesseract),
            OcrBackend::Unavailable { reason } => {
                return Err(NoteError::OcrUnavailable(reason.clone()))
            }
        };
        let bytes = image_png.to_vec();

        let (text, confidence) = tokio::task::spawn_blocking(move || {
            let mut lt = tesseract.blocking_lock();
            lt.set_image_from_mem(&bytes)
                .map_err(|e| NoteError::Ocr(format!("Failed to set image: {e}")))?;
            let text = lt
                .get_utf8_text()
                .map_err(|e| NoteError::Ocr(format!("Failed to extract text: {e}")))?;
            Ok::<_, NoteError>((text, lt.mean_text_conf()))
        })
        .await
        .map_err(|e| NoteError::Ocr(format!("OCR task panicked: {e}")))??;

        Ok(LocalText {
            text: text.trim().to_string(),
            engine_confidence: (f64::from(confidence) / 100.0).clamp(0.0, 1.0),
        })
    }
}

#[async_trait]
impl LocalRecognizer for OcrProvider {
    async fn recognize(&self, image_png: &[u8]) -> Result<LocalText> {
        match tokio::time::timeout(self.timeout, self.recognize_internal(image_png)).await {
            Ok(inner) => inner,
            Err(_) => Err(NoteError::Timeout(format!(
                "OCR operation timed out after {} seconds",
                self.timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(model: &str) -> OcrConfig {
        OcrConfig {
            model: model.to_string(),
            ..OcrConfig::default()
        }
    }

    #[tokio::test]
    async fn test_unavailable_returns_error() {
        let provider = OcrProvider::unavailable("Test unavailable");
        let result = provider.recognize(&[]).await;
        assert!(matches!(result, Err(NoteError::OcrUnavailable(_))));
    }

    #[test]
    fn test_remote_engine_is_not_local() {
        let provider = OcrProvider::new(&make_config("mistral/pixtral-12b"));
        assert!(!provider.is_available());
    }

    #[test]
    fn test_local_model_routes_to_tesseract() {
        // Availability depends on the host having tessdata installed.
        let provider = OcrProvider::new(&make_config("local/tesseract"));
        let cloned = provider.clone();
        assert_eq!(provider.is_available(), cloned.is_available());
    }
}
