use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BoundingBox, ColorInfo, Dimensions, NoteType};
use crate::codes::DetectedCode;
use crate::error::{NoteError, Result};
use crate::preprocess::NoteSize;
use crate::structure::{DocumentStructure, Section, Title, TodoItem};

pub const OUTPUT_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelativePosition {
    Top,
    Middle,
    Bottom,
}

impl RelativePosition {
    pub fn from_y(y: u32) -> Self {
        if y < 200 {
            Self::Top
        } else if y > 400 {
            Self::Bottom
        } else {
            Self::Middle
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpatialPosition {
    pub bounding_box: BoundingBox,
    pub relative_position: RelativePosition,
    pub rotation_angle: f64,
}

impl SpatialPosition {
    pub fn from_bbox(bbox: BoundingBox) -> Self {
        Self {
            bounding_box: bbox,
            relative_position: RelativePosition::from_y(bbox.y),
            rotation_angle: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisualMetadata {
    pub dominant_color: ColorInfo,
    pub background_color: ColorInfo,
    pub estimated_note_type: NoteType,
    pub physical_size_estimate: NoteSize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeInfo {
    pub data: String,
    #[serde(rename = "type")]
    pub code_type: String,
    pub position: BoundingBox,
    pub confidence: f64,
}

impl From<&DetectedCode> for CodeInfo {
    fn from(code: &DetectedCode) -> Self {
        Self {
            data: code.data.clone(),
            code_type: code.code_type.clone(),
            position: code.position,
            confidence: code.confidence,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TextContent {
    pub raw_text: String,
    pub cleaned_text: String,
    pub formatted_text: String,
    pub extraction_method: String,
    pub confidence_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Structure {
    pub title: Option<Title>,
    pub sections: Vec<Section>,
    pub todos: Vec<TodoItem>,
    pub has_title: bool,
    pub has_lists: bool,
    pub has_todos: bool,
    pub has_tags: bool,
}

impl From<&DocumentStructure> for Structure {
    fn from(doc: &DocumentStructure) -> Self {
        Self {
            title: doc.title.clone(),
            sections: doc.sections.clone(),
            todos: doc.todos.clone(),
            has_title: doc.has_title,
            has_lists: doc.has_lists,
            has_todos: doc.has_todos,
            has_tags: doc.has_tags,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Tags {
    pub simple_tags: Vec<String>,
    pub key_value_tags: BTreeMap<String, String>,
}

impl Tags {
    pub fn from_structure(doc: &DocumentStructure) -> Self {
        Self {
            simple_tags: doc.simple_tags.iter().map(|t| t.name.clone()).collect(),
            key_value_tags: doc
                .key_value_tags
                .iter()
                .map(|t| (t.key.clone(), t.value.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.simple_tags.len() + self.key_value_tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reserved for entity recognition; always empty for now.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Entities {
    pub dates: Vec<String>,
    pub numbers: Vec<String>,
    pub monetary_values: Vec<String>,
    pub people: Vec<String>,
    pub organizations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QualityMetrics {
    pub image_quality: f64,
    pub text_clarity: f64,
    pub ocr_confidence: f64,
    pub llm_confidence: f64,
    pub overall_confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessingDetails {
    pub extraction_method: String,
    pub ocr_engine: String,
    pub llm_model: String,
    pub processing_time_ms: u64,
    pub retry_count: u32,
    pub post_processing_corrections: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub differences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub note_id: String,
    pub position: usize,
    pub spatial_position: SpatialPosition,
    pub visual_metadata: Option<VisualMetadata>,
    pub qr_codes: Vec<CodeInfo>,
    pub text_content: TextContent,
    pub structure: Structure,
    pub tags: Tags,
    pub entities: Entities,
    pub quality_metrics: QualityMetrics,
    pub processing_details: ProcessingDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn note_id(position: usize) -> String {
    format!("note_{position:03}")
}

impl Note {
    /// Placeholder for a region whose pipeline failed: zeroed metrics and
    /// the failure message.
    pub fn error(position: usize, bbox: BoundingBox, message: impl Into<String>) -> Self {
        Self {
            note_id: note_id(position),
            position,
            spatial_position: SpatialPosition::from_bbox(bbox),
            visual_metadata: None,
            qr_codes: Vec::new(),
            text_content: TextContent {
                extraction_method: "error".to_string(),
                ..TextContent::default()
            },
            structure: Structure::default(),
            tags: Tags::default(),
            entities: Entities::default(),
            quality_metrics: QualityMetrics::default(),
            processing_details: ProcessingDetails {
                extraction_method: "error".to_string(),
                ocr_engine: "none".to_string(),
                ..ProcessingDetails::default()
            },
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageMetadata {
    pub filename: String,
    pub original_dimensions: Dimensions,
    pub file_size_bytes: u64,
    pub format: String,
    pub color_space: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub total_notes: usize,
    pub total_todos: usize,
    pub total_tags: usize,
    pub total_qr_codes: usize,
    /// Mean over notes that did not fail.
    pub average_confidence: f64,
    pub processing_status: ProcessingStatus,
}

impl Summary {
    pub fn from_notes(notes: &[Note]) -> Self {
        let succeeded: Vec<&Note> = notes.iter().filter(|n| !n.is_error()).collect();
        let average_confidence = if succeeded.is_empty() {
            0.0
        } else {
            succeeded
                .iter()
                .map(|n| n.quality_metrics.overall_confidence)
                .sum::<f64>()
                / succeeded.len() as f64
        };

        Self {
            total_notes: notes.len(),
            total_todos: notes.iter().map(|n| n.structure.todos.len()).sum(),
            total_tags: notes.iter().map(|n| n.tags.len()).sum(),
            total_qr_codes: notes.iter().map(|n| n.qr_codes.len()).sum(),
            average_confidence,
            processing_status: if succeeded.is_empty() {
                ProcessingStatus::Failed
            } else {
                ProcessingStatus::Success
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingOutput {
    pub version: String,
    pub processed_at: DateTime<Utc>,
    pub processing_time_ms: u64,
    pub image_metadata: ImageMetadata,
    pub notes: Vec<Note>,
    pub summary: Summary,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ProcessingOutput {
    pub fn new(
        image_metadata: ImageMetadata,
        notes: Vec<Note>,
        processing_time_ms: u64,
        errors: Vec<String>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            version: OUTPUT_VERSION.to_string(),
            processed_at: Utc::now(),
            processing_time_ms,
            summary: Summary::from_notes(&notes),
            image_metadata,
            notes,
            errors,
            warnings,
        }
    }

    /// Checks the envelope before it leaves the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.version != OUTPUT_VERSION {
            return Err(NoteError::Validation(format!(
                "unsupported output version {}",
                self.version
            )));
        }
        if self.notes.is_empty() {
            return Err(NoteError::Validation("output has no notes".to_string()));
        }

        for (i, note) in self.notes.iter().enumerate() {
            if note.position != i + 1 {
                return Err(NoteError::Validation(format!(
                    "note {} has position {}, expected {}",
                    note.note_id,
                    note.position,
                    i + 1
                )));
            }

            let metrics = &note.quality_metrics;
            let scores = [
                ("text_content.confidence_score", note.text_content.confidence_score),
                ("image_quality", metrics.image_quality),
                ("text_clarity", metrics.text_clarity),
                ("ocr_confidence", metrics.ocr_confidence),
                ("llm_confidence", metrics.llm_confidence),
                ("overall_confidence", metrics.overall_confidence),
            ];
            if let Some((name, value)) = scores
                .iter()
                .find(|(_, v)| !(0.0..=1.0).contains(v))
            {
                return Err(NoteError::Validation(format!(
                    "note {} has {name} = {value} outside [0, 1]",
                    note.note_id
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.summary.average_confidence) {
            return Err(NoteError::Validation(format!(
                "average confidence {} outside [0, 1]",
                self.summary.average_confidence
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::recognize_structure;
    use pretty_assertions::assert_eq;

    fn note(position: usize, confidence: f64, text: &str) -> Note {
        let doc = recognize_structure(text);
        let mut note = Note::error(position, BoundingBox::new(0, 0, 10, 10), "");
        note.error = None;
        note.structure = Structure::from(&doc);
        note.tags = Tags::from_structure(&doc);
        note.quality_metrics.overall_confidence = confidence;
        note
    }

    fn image_metadata() -> ImageMetadata {
        ImageMetadata {
            filename: "page.png".to_string(),
            original_dimensions: Dimensions {
                width: 100,
                height: 100,
            },
            file_size_bytes: 1024,
            format: "PNG".to_string(),
            color_space: "RGB".to_string(),
        }
    }

    #[test]
    fn test_summary_averages_successful_notes() {
        let notes = vec![
            note(1, 0.9, "[ ] buy milk\n[x] pay rent"),
            note(2, 0.7, "Buy milk @errands ::due:friday"),
            Note::error(3, BoundingBox::new(0, 0, 10, 10), "extraction failed"),
        ];
        let summary = Summary::from_notes(&notes);

        assert_eq!(summary.total_notes, 3);
        assert!((summary.average_confidence - 0.8).abs() < 1e-9);
        assert_eq!(summary.processing_status, ProcessingStatus::Success);
        assert_eq!(summary.total_todos, 2);
        assert_eq!(summary.total_tags, 2);
    }

    #[test]
    fn test_all_failed_is_failed() {
        let notes = vec![Note::error(1, BoundingBox::default(), "boom")];
        let summary = Summary::from_notes(&notes);
        assert_eq!(summary.average_confidence, 0.0);
        assert_eq!(summary.processing_status, ProcessingStatus::Failed);
    }

    #[test]
    fn test_error_note_shape() {
        let note = Note::error(7, BoundingBox::new(10, 450, 50, 50), "timed out");
        assert_eq!(note.note_id, "note_007");
        assert_eq!(note.processing_details.ocr_engine, "none");
        assert_eq!(note.spatial_position.relative_position, RelativePosition::Bottom);
        assert_eq!(note.quality_metrics, QualityMetrics::default());
    }

    #[test]
    fn test_validate_rejects_gaps_and_out_of_range() {
        let output = ProcessingOutput::new(image_metadata(), vec![note(1, 0.5, "a"), note(2, 0.5, "b")], 5, vec![], vec![]);
        assert!(output.validate().is_ok());
        assert_eq!(output.version, "2.0");

        let gap = ProcessingOutput::new(image_metadata(), vec![note(1, 0.5, "a"), note(3, 0.5, "b")], 5, vec![], vec![]);
        assert!(matches!(gap.validate(), Err(NoteError::Validation(_))));

        let wild = ProcessingOutput::new(image_metadata(), vec![note(1, 1.5, "a")], 5, vec![], vec![]);
        assert!(wild.validate().is_err());
    }

    #[test]
    fn test_serialized_field_names() {
        let value = serde_json::to_value(note(1, 0.9, "@home")).unwrap();
        assert_eq!(value["note_id"], "note_001");
        assert_eq!(value["spatial_position"]["relative_position"], "top");
        assert_eq!(value["tags"]["simple_tags"][0], "home");
        assert!(value.get("error").is_none());
    }
}
