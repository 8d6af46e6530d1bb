use crate::codes::DetectedCode;
use crate::models::{grid_regions, renumber, BoundingBox, DetectionMethod, NoteRegion};
use crate::vision::LayoutAnalysis;

const VISION_CONFIDENCE: f64 = 0.8;
const MIN_CODES_FOR_GRID: usize = 2;

/// Regions implied by the vision model's description of the page.
pub fn regions_from_layout(layout: &LayoutAnalysis, width: u32, height: u32) -> Vec<NoteRegion> {
    let total = layout.total_notes as usize;

    if layout.layout.to_lowercase().contains("3x3") && total <= 9 {
        return grid_regions(
            width,
            height,
            3,
            3,
            total.min(9),
            DetectionMethod::VisionModel,
            VISION_CONFIDENCE,
        );
    }

    let mut regions: Vec<NoteRegion> = Vec::with_capacity(layout.notes.len());
    for hint in &layout.notes {
        let position = hint
            .position
            .map(|p| p as usize)
            .unwrap_or(regions.len() + 1);
        let bbox = if total <= 4 {
            quadrant(position, width, height)
        } else {
            BoundingBox::full_frame(width, height)
        };
        regions.push(NoteRegion::new(
            bbox,
            position,
            DetectionMethod::VisionModel,
            VISION_CONFIDENCE,
        ));
    }

    renumber(&mut regions);
    regions
}

/// Cell of a 2x2 tiling for a 1-based position; out-of-range positions land
/// in the last cell.
fn quadrant(position: usize, width: u32, height: u32) -> BoundingBox {
    let index = position.saturating_sub(1).min(3) as u32;
    let (row, col) = (index / 2, index % 2);
    let (cell_w, cell_h) = ((width / 2).max(1), (height / 2).max(1));
    BoundingBox::new(col * cell_w, row * cell_h, cell_w, cell_h)
}

/// Places each decoded code in the 3x3 cell holding its center. Needs at
/// least two codes; one code alone says nothing about the layout.
pub fn regions_from_codes(codes: &[DetectedCode], width: u32, height: u32) -> Vec<NoteRegion> {
    if codes.len() < MIN_CODES_FOR_GRID {
        return Vec::new();
    }

    let cell_w = (width / 3).max(1);
    let cell_h = (height / 3).max(1);

    let mut regions: Vec<NoteRegion> = Vec::new();
    for code in codes {
        let (cx, cy) = code.position.center();
        let col = ((cx / f64::from(cell_w)) as u32).min(2);
        let row = ((cy / f64::from(cell_h)) as u32).min(2);
        let position = (row * 3 + col + 1) as usize;

        if regions.iter().any(|r| r.position == position) {
            tracing::debug!(position, data = %code.data, "second code in one grid cell ignored");
            continue;
        }

        regions.push(
            NoteRegion::new(
                BoundingBox::new(col * cell_w, row * cell_h, cell_w, cell_h),
                position,
                DetectionMethod::QrCode,
                1.0,
            )
            .with_qr_data(code.data.clone()),
        );
    }

    regions.sort_by_key(|r| r.position);
    regions
}
