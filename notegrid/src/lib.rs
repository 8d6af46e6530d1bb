//! Turns a photograph of one or more handwritten notes into structured,
//! per-note records.

pub mod codes;
pub mod config;
pub mod error;
pub mod extraction;
pub mod framework;
pub mod ingest;
pub mod llm;
pub mod metadata;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod postprocess;
pub mod preprocess;
pub mod separation;
pub mod structure;
pub mod vision;

pub use config::{Config, OcrMode, ProcessOptions};
pub use error::{NoteError, Result};
pub use framework::PartialResult;
pub use models::ProcessingOutput;
pub use orchestrator::Orchestrator;
