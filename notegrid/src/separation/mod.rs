//! Region separation: how many notes are on the page and where.
//!
//! Three detectors run concurrently (embedded codes, contours, the vision
//! model's layout description). The detector with the highest mean region
//! confidence wins; a detector that errors counts as having found nothing.

mod contour;
mod layout;

use std::sync::Arc;

use image::{DynamicImage, GenericImageView, GrayImage};

use crate::codes::detect_codes;
use crate::config::ProcessOptions;
use crate::framework::{SharedSink, StageResult};
use crate::models::{grid_regions, renumber, DetectionMethod, NoteRegion};
use crate::preprocess::{encode_png, LoadedImage};
use crate::vision::VisionClient;

pub use contour::{contour_confidence, detect_contour_regions};
pub use layout::{regions_from_codes, regions_from_layout};

const GRID_FALLBACK_CONFIDENCE: f64 = 0.7;
const GRID_CELLS: usize = 9;
const MIN_REGIONS_FOR_GRID: usize = 4;

/// What each detector produced for one page.
#[derive(Debug, Clone, Default)]
pub struct DetectorOutput {
    pub code_regions: Vec<NoteRegion>,
    /// Codes decoded anywhere on the page, even when too few to form a grid.
    pub codes_found: usize,
    pub contour_regions: Vec<NoteRegion>,
    pub vision_regions: Vec<NoteRegion>,
}

#[derive(Clone)]
pub struct RegionSeparator {
    vision: Arc<dyn VisionClient>,
    vision_model: String,
    sink: SharedSink,
}

impl RegionSeparator {
    pub fn new(vision: Arc<dyn VisionClient>, vision_model: impl Into<String>, sink: SharedSink) -> Self {
        Self {
            vision,
            vision_model: vision_model.into(),
            sink,
        }
    }

    /// Regions in original-image coordinates, never empty.
    pub async fn process(
        &self,
        image: &LoadedImage,
        options: &ProcessOptions,
    ) -> StageResult<Vec<NoteRegion>> {
        let model = options
            .vision_model_preference
            .as_deref()
            .unwrap_or(self.vision_model.as_str());
        let detected = self.detect(&image.working, model).await;
        let (width, height) = image.working.dimensions();

        let mut regions = select_regions(detected, options.is_rocketbook(), width, height);
        for region in regions.iter_mut() {
            region.bbox = image.to_original(region.bbox);
        }
        renumber(&mut regions);

        let best = regions.iter().map(|r| r.confidence).fold(0.0, f64::max);
        self.sink
            .record("separation", "total_regions", regions.len() as f64);
        self.sink
            .record("separation", "best_detection_confidence", best);
        tracing::info!(
            regions = regions.len(),
            method = %regions[0].detection_method,
            "page separated"
        );

        Ok(regions)
    }

    async fn detect(&self, working: &DynamicImage, model: &str) -> DetectorOutput {
        let gray = Arc::new(working.to_luma8());
        let (width, height) = working.dimensions();

        let codes_task = tokio::task::spawn_blocking({
            let gray = Arc::clone(&gray);
            move || {
                let codes = detect_codes(&gray);
                let regions = regions_from_codes(&codes, width, height);
                (regions, codes.len())
            }
        });
        let contour_task = tokio::task::spawn_blocking({
            let gray: Arc<GrayImage> = Arc::clone(&gray);
            move || detect_contour_regions(&gray)
        });
        let vision_task = self.detect_with_vision(working, model);

        let (codes, contours, vision) = tokio::join!(codes_task, contour_task, vision_task);

        let (code_regions, codes_found) = codes.unwrap_or_else(|error| {
            tracing::warn!(error = %error, "code detection failed");
            (Vec::new(), 0)
        });
        let contour_regions = contours.unwrap_or_else(|error| {
            tracing::warn!(error = %error, "contour detection failed");
            Vec::new()
        });

        tracing::debug!(
            code_regions = code_regions.len(),
            codes_found,
            contour_regions = contour_regions.len(),
            vision_regions = vision.len(),
            "detectors finished"
        );

        DetectorOutput {
            code_regions,
            codes_found,
            contour_regions,
            vision_regions: vision,
        }
    }

    async fn detect_with_vision(&self, working: &DynamicImage, model: &str) -> Vec<NoteRegion> {
        let (width, height) = working.dimensions();
        let png = match encode_png(working) {
            Ok(png) => png,
            Err(error) => {
                tracing::warn!(error = %error, "could not encode page for layout analysis");
                return Vec::new();
            }
        };

        match self.vision.analyze_layout(&png, model).await {
            Ok(layout) => {
                tracing::debug!(total_notes = layout.total_notes, layout = %layout.layout, "layout analyzed");
                regions_from_layout(&layout, width, height)
            }
            Err(error) => {
                tracing::warn!(error = %error, "vision layout analysis failed");
                Vec::new()
            }
        }
    }
}

fn mean_confidence(regions: &[NoteRegion]) -> f64 {
    if regions.is_empty() {
        return 0.0;
    }
    regions.iter().map(|r| r.confidence).sum::<f64>() / regions.len() as f64
}

/// Picks the detector with the highest mean confidence; ties keep the
/// earlier of codes, contours, vision. Positions in the result are dense.
pub fn select_regions(
    detected: DetectorOutput,
    rocketbook: bool,
    width: u32,
    height: u32,
) -> Vec<NoteRegion> {
    let grid = || {
        grid_regions(
            width,
            height,
            3,
            3,
            GRID_CELLS,
            DetectionMethod::GridFallback,
            GRID_FALLBACK_CONFIDENCE,
        )
    };

    let mut best: Option<Vec<NoteRegion>> = None;
    for candidate in [
        detected.code_regions,
        detected.contour_regions,
        detected.vision_regions,
    ] {
        if candidate.is_empty() {
            continue;
        }
        let better = best
            .as_ref()
            .map_or(true, |b| mean_confidence(&candidate) > mean_confidence(b));
        if better {
            best = Some(candidate);
        }
    }

    let mut regions = match best {
        None if rocketbook => {
            tracing::info!("no regions detected, assuming 3x3 grid");
            grid()
        }
        None => {
            tracing::info!("no regions detected, treating page as one note");
            vec![NoteRegion::single(width, height)]
        }
        Some(best)
            if rocketbook
                && best.len() < GRID_CELLS
                && (detected.codes_found > 0 || best.len() >= MIN_REGIONS_FOR_GRID) =>
        {
            tracing::info!(
                detected = best.len(),
                codes_found = detected.codes_found,
                "partial grid detected, assuming full 3x3 grid"
            );
            grid()
        }
        Some(best) => best,
    };

    renumber(&mut regions);
    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NoteError, Result};
    use crate::framework::noop_sink;
    use crate::models::BoundingBox;
    use crate::preprocess::load_image;
    use crate::vision::LayoutAnalysis;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};

    struct FixedLayout(Option<LayoutAnalysis>);

    #[async_trait]
    impl VisionClient for FixedLayout {
        async fn extract_text(&self, _png: &[u8], _prompt: &str, _model: &str) -> Result<String> {
            Err(NoteError::VisionUnavailable("layout only".to_string()))
        }

        async fn analyze_layout(&self, _png: &[u8], _model: &str) -> Result<LayoutAnalysis> {
            self.0
                .clone()
                .ok_or_else(|| NoteError::Vision("service down".to_string()))
        }
    }

    fn regions(method: DetectionMethod, confidences: &[f64]) -> Vec<NoteRegion> {
        confidences
            .iter()
            .enumerate()
            .map(|(i, &c)| NoteRegion::new(BoundingBox::new(i as u32 * 10, 0, 10, 10), i + 1, method, c))
            .collect()
    }

    fn blank_page(width: u32, height: u32) -> LoadedImage {
        let page = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([230, 230, 230])));
        load_image(&encode_png(&page).unwrap(), 2000).unwrap()
    }

    #[test]
    fn test_highest_mean_confidence_wins() {
        let detected = DetectorOutput {
            contour_regions: regions(DetectionMethod::Contour, &[0.95, 0.5]),
            vision_regions: regions(DetectionMethod::VisionModel, &[0.8]),
            ..DetectorOutput::default()
        };
        let selected = select_regions(detected, false, 300, 300);

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].detection_method, DetectionMethod::VisionModel);
    }

    #[test]
    fn test_nothing_found_yields_single_region() {
        let selected = select_regions(DetectorOutput::default(), false, 640, 480);
        assert_eq!(selected, vec![NoteRegion::single(640, 480)]);
    }

    #[test]
    fn test_nothing_found_on_rocketbook_yields_grid() {
        let selected = select_regions(DetectorOutput::default(), true, 900, 900);
        assert_eq!(selected.len(), 9);
        assert!(selected.iter().all(|r| r.detection_method == DetectionMethod::GridFallback));
        assert!(selected.iter().all(|r| r.confidence == 0.7));
    }

    #[test]
    fn test_partial_rocketbook_detection_expands_to_grid() {
        let detected = DetectorOutput {
            contour_regions: regions(DetectionMethod::Contour, &[0.9, 0.9, 0.9, 0.9]),
            ..DetectorOutput::default()
        };
        let selected = select_regions(detected, true, 900, 900);
        assert_eq!(selected.len(), 9);
    }

    #[test]
    fn test_partial_detection_elsewhere_is_kept() {
        let detected = DetectorOutput {
            contour_regions: regions(DetectionMethod::Contour, &[0.9, 0.9, 0.9, 0.9]),
            codes_found: 1,
            ..DetectorOutput::default()
        };
        let selected = select_regions(detected, false, 900, 900);
        assert_eq!(selected.len(), 4);
    }

    #[test]
    fn test_positions_are_dense() {
        let mut sparse = regions(DetectionMethod::QrCode, &[1.0, 1.0]);
        sparse[0].position = 3;
        sparse[1].position = 8;
        let detected = DetectorOutput {
            code_regions: sparse,
            codes_found: 2,
            ..DetectorOutput::default()
        };
        let selected = select_regions(detected, false, 900, 900);
        let positions: Vec<usize> = selected.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failing_vision_still_returns_a_region() {
        let separator = RegionSeparator::new(Arc::new(FixedLayout(None)), "openai/gpt-4o", noop_sink());
        let regions = separator
            .process(&blank_page(320, 240), &ProcessOptions::default())
            .await
            .unwrap();

        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].detection_method, DetectionMethod::SingleNote);
        assert_eq!(regions[0].bbox, BoundingBox::full_frame(320, 240));
    }

    #[tokio::test]
    async fn test_vision_layout_used_when_alone() {
        let layout = LayoutAnalysis {
            total_notes: 9,
            layout: "3x3 grid".to_string(),
            notes: Vec::new(),
        };
        let separator =
            RegionSeparator::new(Arc::new(FixedLayout(Some(layout))), "openai/gpt-4o", noop_sink());
        let regions = separator
            .process(&blank_page(300, 300), &ProcessOptions::default())
            .await
            .unwrap();

        assert_eq!(regions.len(), 9);
        assert_eq!(regions[8].position, 9);
        assert_eq!(regions[8].bbox, BoundingBox::new(200, 200, 100, 100));
    }
}
