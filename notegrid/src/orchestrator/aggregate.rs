use serde_json::json;

use crate::extraction::HybridResult;
use crate::framework::{PartialResult, StageResult};
use crate::metadata::NoteMetadata;
use crate::models::{
    note_id, CodeInfo, Dimensions, Entities, ImageMetadata, Note, NoteRegion, ProcessingDetails,
    ProcessingOutput, QualityMetrics, SpatialPosition, Structure, Tags, TextContent, VisualMetadata,
};
use crate::postprocess::CorrectionResult;
use crate::preprocess::ImageProperties;
use crate::structure::DocumentStructure;

const OCR_SHARE: f64 = 0.3;
const LLM_SHARE: f64 = 0.7;

/// Everything one region's pipeline produced.
pub struct RegionOutcome<'a> {
    pub region: &'a NoteRegion,
    pub extraction: HybridResult,
    pub structure: DocumentStructure,
    pub correction: CorrectionResult,
    pub metadata: NoteMetadata,
    pub image_quality: f64,
    pub ocr_engine: &'a str,
    pub llm_model: &'a str,
    pub elapsed_ms: u64,
}

pub fn build_note(outcome: RegionOutcome<'_>) -> Note {
    let RegionOutcome {
        region,
        extraction,
        structure,
        correction,
        metadata,
        image_quality,
        ocr_engine,
        llm_model,
        elapsed_ms,
    } = outcome;

    let confidence = extraction.confidence;
    let mut qr_codes: Vec<CodeInfo> = metadata.codes.iter().map(CodeInfo::from).collect();
    if let Some(data) = &region.qr_data {
        if !qr_codes.iter().any(|c| &c.data == data) {
            qr_codes.push(CodeInfo {
                data: data.clone(),
                code_type: crate::codes::QR_CODE_TYPE.to_string(),
                position: region.bbox,
                confidence: 1.0,
            });
        }
    }

    Note {
        note_id: note_id(region.position),
        position: region.position,
        spatial_position: SpatialPosition::from_bbox(region.bbox),
        visual_metadata: Some(VisualMetadata {
            dominant_color: metadata.dominant_color,
            background_color: metadata.background_color,
            estimated_note_type: metadata.note_type,
            physical_size_estimate: metadata.estimated_size,
        }),
        qr_codes,
        text_content: TextContent {
            raw_text: extraction.text,
            cleaned_text: correction.cleaned_text,
            formatted_text: correction.text,
            extraction_method: extraction.extraction_method.to_string(),
            confidence_score: confidence,
            language: None,
        },
        structure: Structure::from(&structure),
        tags: Tags::from_structure(&structure),
        entities: Entities::default(),
        quality_metrics: QualityMetrics {
            image_quality,
            text_clarity: confidence,
            ocr_confidence: confidence * OCR_SHARE,
            llm_confidence: confidence * LLM_SHARE,
            overall_confidence: confidence,
        },
        processing_details: ProcessingDetails {
            extraction_method: extraction.extraction_method.to_string(),
            ocr_engine: ocr_engine.to_string(),
            llm_model: llm_model.to_string(),
            processing_time_ms: elapsed_ms,
            retry_count: extraction.retry_count,
            post_processing_corrections: correction.corrections.len(),
            differences: extraction.differences,
        },
        error: None,
    }
}

pub fn image_metadata(filename: &str, properties: &ImageProperties) -> ImageMetadata {
    ImageMetadata {
        filename: filename.to_string(),
        original_dimensions: Dimensions {
            width: properties.width,
            height: properties.height,
        },
        file_size_bytes: properties.file_size,
        format: properties.format.clone(),
        color_space: properties.color_space.clone(),
    }
}

/// Validates the envelope; a rejected envelope still hands back the notes.
pub fn finalize(output: ProcessingOutput) -> StageResult<ProcessingOutput> {
    match output.validate() {
        Ok(()) => Ok(output),
        Err(error) => {
            tracing::error!(error = %error, "output failed validation, returning raw notes");
            let notes = serde_json::to_value(&output.notes).unwrap_or_default();
            Err(PartialResult::from(error)
                .with_data(json!({ "notes": notes, "raw_data": true }))
                .with_warning("structured output assembly failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractionMethod;
    use crate::models::{BoundingBox, ColorInfo, DetectionMethod, NoteType};
    use crate::preprocess::NoteSize;
    use crate::structure::recognize_structure;

    fn outcome_parts(text: &str, confidence: f64) -> (HybridResult, DocumentStructure, CorrectionResult, NoteMetadata) {
        let extraction = HybridResult {
            text: text.to_string(),
            confidence,
            ocr_text: text.to_string(),
            vision_text: text.to_string(),
            ocr_confidence: confidence,
            vision_confidence: confidence,
            differences: Vec::new(),
            extraction_method: ExtractionMethod::Hybrid,
            warnings: Vec::new(),
            retry_count: 1,
        };
        let correction = CorrectionResult {
            text: text.to_string(),
            cleaned_text: text.to_string(),
            original_text: text.to_string(),
            corrections: Vec::new(),
            confidence: 1.0,
        };
        let metadata = NoteMetadata {
            codes: Vec::new(),
            dominant_color: ColorInfo::from_rgb([250, 235, 120]),
            background_color: ColorInfo::from_rgb([250, 235, 120]),
            note_type: NoteType::StickyNote,
            estimated_size: NoteSize::Square3x3,
            exif: None,
            code_categories: Vec::new(),
        };
        (extraction, recognize_structure(text), correction, metadata)
    }

    #[test]
    fn test_build_note_splits_confidence() {
        let region = NoteRegion::new(BoundingBox::new(0, 250, 100, 100), 2, DetectionMethod::QrCode, 1.0)
            .with_qr_data("page-7");
        let (extraction, structure, correction, metadata) = outcome_parts("[ ] call mom", 0.8);

        let note = build_note(RegionOutcome {
            region: &region,
            extraction,
            structure,
            correction,
            metadata,
            image_quality: 0.6,
            ocr_engine: "tesseract",
            llm_model: "openai/gpt-4o",
            elapsed_ms: 12,
        });

        assert_eq!(note.note_id, "note_002");
        assert!((note.quality_metrics.ocr_confidence - 0.24).abs() < 1e-9);
        assert!((note.quality_metrics.llm_confidence - 0.56).abs() < 1e-9);
        assert_eq!(note.structure.todos.len(), 1);
        assert_eq!(note.qr_codes.len(), 1);
        assert_eq!(note.qr_codes[0].data, "page-7");
        assert_eq!(note.processing_details.retry_count, 1);
        assert_eq!(note.text_content.extraction_method, "hybrid");
    }

    #[test]
    fn test_finalize_degrades_to_raw_notes() {
        let bad = Note::error(2, BoundingBox::default(), "boom");
        let properties = ImageProperties {
            width: 10,
            height: 10,
            channels: 3,
            file_size: 10,
            format: "PNG".to_string(),
            color_space: "RGB".to_string(),
        };
        let output = ProcessingOutput::new(image_metadata("page.png", &properties), vec![bad], 1, vec![], vec![]);

        let partial = finalize(output).unwrap_err();
        assert_eq!(partial.data["raw_data"], true);
        assert_eq!(partial.data["notes"][0]["note_id"], "note_002");
    }
}
