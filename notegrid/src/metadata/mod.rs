//! Per-region metadata: embedded codes, colors, note type and capture-time
//! fields.

mod category;
mod exif;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::codes::{detect_codes, DetectedCode};
use crate::framework::{SharedSink, StageResult};
use crate::models::{ColorInfo, NoteType};
use crate::preprocess::{background_color, dominant_color, estimate_size, NoteSize};

pub use self::exif::{read_capture_metadata, CaptureMetadata, GpsCoordinates};
pub use category::{associate_codes, color_category, suggest_category, CodeCategory};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteMetadata {
    pub codes: Vec<DetectedCode>,
    pub dominant_color: ColorInfo,
    pub background_color: ColorInfo,
    pub note_type: NoteType,
    pub estimated_size: NoteSize,
    pub exif: Option<CaptureMetadata>,
    pub code_categories: Vec<CodeCategory>,
}

#[derive(Clone)]
pub struct MetadataExtractor {
    sink: SharedSink,
}

impl MetadataExtractor {
    pub fn new(sink: SharedSink) -> Self {
        Self { sink }
    }

    /// Runs on one region crop. `exif` is read once per file by the caller.
    pub fn process(
        &self,
        region: &DynamicImage,
        exif: Option<&CaptureMetadata>,
    ) -> StageResult<NoteMetadata> {
        let gray = region.to_luma8();
        let codes = detect_codes(&gray);

        let rgb = region.to_rgb8();
        let background = background_color(&rgb);
        let code_categories = associate_codes(&codes, background.name);

        self.sink
            .record("metadata", "qr_codes_found", codes.len() as f64);
        self.sink.record(
            "metadata",
            "has_exif_data",
            if exif.is_some() { 1.0 } else { 0.0 },
        );

        Ok(NoteMetadata {
            codes,
            dominant_color: dominant_color(&rgb),
            note_type: NoteType::from_background(background.name),
            background_color: background,
            estimated_size: estimate_size(region.width(), region.height()),
            exif: exif.cloned(),
            code_categories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::noop_sink;
    use crate::models::ColorName;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_plain_blue_region() {
        let region = DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 120, Rgb([140, 190, 240])));
        let capture = CaptureMetadata {
            camera_make: Some("Acme".to_string()),
            ..Default::default()
        };

        let metadata = MetadataExtractor::new(noop_sink())
            .process(&region, Some(&capture))
            .unwrap();

        assert!(metadata.codes.is_empty());
        assert!(metadata.code_categories.is_empty());
        assert_eq!(metadata.background_color.name, ColorName::Blue);
        assert_eq!(metadata.note_type, NoteType::StickyNote);
        assert_eq!(metadata.estimated_size, NoteSize::Square3x3);
        assert_eq!(metadata.exif.unwrap().camera_make.as_deref(), Some("Acme"));
    }
}
