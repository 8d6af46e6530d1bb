//! End-to-end page processing.
//!
//! preprocess -> separate -> per region {extract -> structure -> post-process
//! -> metadata} -> aggregate. A failed region becomes an error note and the
//! rest of the page carries on; only unreadable input or a blown time budget
//! fails the whole run.

mod aggregate;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::json;

use crate::config::{Config, OcrMode, ProcessOptions};
use crate::error::NoteError;
use crate::extraction::{ExtractionEngine, ExtractionMethod};
use crate::framework::{PartialResult, RetryPolicy, SharedSink, StageResult};
use crate::llm::{LlmProvider, TextCompletion};
use crate::metadata::{read_capture_metadata, CaptureMetadata, MetadataExtractor};
use crate::models::{note_id, Note, NoteRegion, ProcessingOutput};
use crate::ocr::{LocalRecognizer, OcrProvider};
use crate::postprocess::PostProcessor;
use crate::preprocess::{crop, ImagePreprocessor, PreparedImage};
use crate::separation::RegionSeparator;
use crate::structure::StructureRecognizer;
use crate::vision::{VisionClient, VisionProvider};

pub use aggregate::{build_note, finalize, image_metadata, RegionOutcome};

const LOCAL_ENGINE: &str = "tesseract";

/// External capabilities the pipeline calls out to.
#[derive(Clone)]
pub struct Capabilities {
    pub ocr: Arc<dyn LocalRecognizer>,
    pub vision: Arc<dyn VisionClient>,
    pub completion: Option<Arc<dyn TextCompletion>>,
}

impl Capabilities {
    pub fn from_config(config: &Config) -> Self {
        let llm = LlmProvider::new(config.llm.as_ref());
        let completion: Option<Arc<dyn TextCompletion>> = if llm.is_available() {
            Some(Arc::new(llm))
        } else {
            tracing::info!("no completion model, post-processing uses local corrections only");
            None
        };

        Self {
            ocr: Arc::new(OcrProvider::new(&config.ocr)),
            vision: Arc::new(VisionProvider::new(&config.vision)),
            completion,
        }
    }
}

pub struct Orchestrator {
    preprocessor: ImagePreprocessor,
    separator: RegionSeparator,
    extraction: ExtractionEngine,
    structure: StructureRecognizer,
    postprocess: PostProcessor,
    metadata: MetadataExtractor,
    vision_model: String,
    processing_timeout: Duration,
    sink: SharedSink,
}

impl Orchestrator {
    pub fn new(config: &Config, sink: SharedSink) -> Self {
        Self::with_capabilities(config, Capabilities::from_config(config), sink)
    }

    pub fn with_capabilities(config: &Config, capabilities: Capabilities, sink: SharedSink) -> Self {
        let retry = RetryPolicy::new(config.pipeline.max_retries, config.pipeline.retry_base());

        Self {
            preprocessor: ImagePreprocessor::new(sink.clone(), config.pipeline.max_working_dimension),
            separator: RegionSeparator::new(
                Arc::clone(&capabilities.vision),
                config.vision.model.clone(),
                sink.clone(),
            ),
            extraction: ExtractionEngine::new(capabilities.ocr, capabilities.vision, retry, sink.clone()),
            structure: StructureRecognizer::new(sink.clone()),
            postprocess: PostProcessor::new(capabilities.completion, sink.clone()),
            metadata: MetadataExtractor::new(sink.clone()),
            vision_model: config.vision.model.clone(),
            processing_timeout: config.pipeline.processing_timeout(),
            sink,
        }
    }

    /// Processes the image at `image_path`.
    pub async fn process(
        &self,
        image_path: impl AsRef<Path>,
        options: &ProcessOptions,
    ) -> StageResult<ProcessingOutput> {
        let path = image_path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            failure(NoteError::from(e), &filename, "input")
        })?;

        self.process_bytes(&filename, bytes, options).await
    }

    /// Same as [`Orchestrator::process`] for bytes already in memory.
    pub async fn process_bytes(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        options: &ProcessOptions,
    ) -> StageResult<ProcessingOutput> {
        let budget = options.timeout().unwrap_or(self.processing_timeout);
        let started = Instant::now();

        let result = match tokio::time::timeout(budget, self.run(filename, bytes, options)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(filename, budget_secs = budget.as_secs(), "processing timed out");
                Err(failure(
                    NoteError::Timeout(format!(
                        "image processing exceeded {} seconds",
                        budget.as_secs()
                    )),
                    filename,
                    "timeout",
                ))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as f64;
        self.sink.record("orchestrator", "processing_time_ms", elapsed_ms);
        self.sink.record(
            "orchestrator",
            "success",
            if result.is_ok() { 1.0 } else { 0.0 },
        );
        result
    }

    async fn run(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        options: &ProcessOptions,
    ) -> StageResult<ProcessingOutput> {
        let started = Instant::now();
        let bytes = Arc::new(bytes);

        let prepared = {
            let preprocessor = self.preprocessor.clone();
            let bytes = Arc::clone(&bytes);
            tokio::task::spawn_blocking(move || preprocessor.process(&bytes))
                .await
                .map_err(|e| failure(NoteError::Processing(format!("preprocessing task failed: {e}")), filename, "preprocessing"))?
                .map_err(|partial| {
                    partial.with_data(json!({
                        "image_path": filename,
                        "error_type": "preprocessing",
                        "processing_status": "failed",
                    }))
                })?
        };
        let exif = read_capture_metadata(&bytes);
        let properties = &prepared.loaded.properties;

        let regions = if options.multi_note_detection_enabled {
            self.separator
                .process(&prepared.loaded, options)
                .await
                .map_err(|partial| partial.with_warning("region separation failed"))?
        } else {
            vec![NoteRegion::single(properties.width, properties.height)]
        };
        tracing::info!(filename, regions = regions.len(), "processing regions");

        let model = options
            .vision_model_preference
            .as_deref()
            .unwrap_or(self.vision_model.as_str());

        let results: Vec<(Note, Vec<String>)> = if options.parallel_processing {
            join_all(
                regions
                    .iter()
                    .map(|region| self.process_region(&prepared, region, exif.as_ref(), options, model)),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(regions.len());
            for region in &regions {
                results.push(
                    self.process_region(&prepared, region, exif.as_ref(), options, model)
                        .await,
                );
            }
            results
        };

        let mut notes = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for (note, note_warnings) in results {
            if let Some(error) = &note.error {
                errors.push(format!("{}: {error}", note.note_id));
            }
            warnings.extend(note_warnings);
            notes.push(note);
        }

        let output = ProcessingOutput::new(
            image_metadata(filename, properties),
            notes,
            started.elapsed().as_millis() as u64,
            errors,
            warnings,
        );
        self.sink
            .record("orchestrator", "total_notes", output.summary.total_notes as f64);
        self.sink.record(
            "orchestrator",
            "average_confidence",
            output.summary.average_confidence,
        );
        tracing::info!(
            filename,
            notes = output.summary.total_notes,
            todos = output.summary.total_todos,
            average_confidence = output.summary.average_confidence,
            "page processed"
        );

        finalize(output)
    }

    async fn process_region(
        &self,
        prepared: &PreparedImage,
        region: &NoteRegion,
        exif: Option<&CaptureMetadata>,
        options: &ProcessOptions,
        model: &str,
    ) -> (Note, Vec<String>) {
        match self.run_region(prepared, region, exif, options, model).await {
            Ok(done) => done,
            Err(partial) => {
                tracing::warn!(
                    region = region.position,
                    error = partial.error_message(),
                    "region failed"
                );
                let warnings = partial
                    .warnings
                    .iter()
                    .map(|w| format!("{}: {w}", note_id(region.position)))
                    .collect();
                (
                    Note::error(region.position, region.bbox, partial.error_message()),
                    warnings,
                )
            }
        }
    }

    async fn run_region(
        &self,
        prepared: &PreparedImage,
        region: &NoteRegion,
        exif: Option<&CaptureMetadata>,
        options: &ProcessOptions,
        model: &str,
    ) -> StageResult<(Note, Vec<String>)> {
        let started = Instant::now();
        let region_image = crop(&prepared.loaded.image, region.bbox);

        let extraction = self
            .extraction
            .process(&region_image, options.ocr_mode, model, options.ocr_confidence_threshold)
            .await?;
        let structure = self.structure.process(&extraction.text)?;
        let correction = self.postprocess.process(&extraction.text, None).await?;

        let metadata = {
            let extractor = self.metadata.clone();
            let exif = exif.cloned();
            tokio::task::spawn_blocking(move || extractor.process(&region_image, exif.as_ref()))
                .await
                .map_err(|e| PartialResult::from_error(format!("metadata task failed: {e}")))??
        };

        let warnings = extraction
            .warnings
            .iter()
            .map(|w| format!("{}: {w}", note_id(region.position)))
            .collect();
        let ocr_engine = if options.ocr_mode == OcrMode::Llm
            || extraction.extraction_method == ExtractionMethod::VisionOnly
        {
            "none"
        } else {
            LOCAL_ENGINE
        };

        let note = build_note(RegionOutcome {
            region,
            extraction,
            structure,
            correction,
            metadata,
            image_quality: prepared.analysis.quality.overall_score,
            ocr_engine,
            llm_model: model,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        Ok((note, warnings))
    }
}

fn failure(error: NoteError, filename: &str, error_type: &str) -> PartialResult {
    PartialResult::from(error)
        .with_data(json!({
            "image_path": filename,
            "error_type": error_type,
            "processing_status": "failed",
        }))
        .with_warning(format!("Processing failed: {error_type}"))
}
