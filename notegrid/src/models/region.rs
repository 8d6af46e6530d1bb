use serde::{Deserialize, Serialize};

use super::BoundingBox;

/// Strategy that produced a region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DetectionMethod {
    #[serde(rename = "qr_code")]
    QrCode,
    #[serde(rename = "contour")]
    Contour,
    #[serde(rename = "vision_llm")]
    VisionModel,
    #[serde(rename = "single_note")]
    SingleNote,
    #[serde(rename = "3x3_grid_fallback")]
    GridFallback,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QrCode => write!(f, "qr_code"),
            Self::Contour => write!(f, "contour"),
            Self::VisionModel => write!(f, "vision_llm"),
            Self::SingleNote => write!(f, "single_note"),
            Self::GridFallback => write!(f, "3x3_grid_fallback"),
        }
    }
}

/// One detected note inside the captured page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteRegion {
    pub bbox: BoundingBox,
    /// 1-based, dense within one run.
    pub position: usize,
    pub qr_data: Option<String>,
    pub detection_method: DetectionMethod,
    pub confidence: f64,
}

impl NoteRegion {
    pub fn new(
        bbox: BoundingBox,
        position: usize,
        detection_method: DetectionMethod,
        confidence: f64,
    ) -> Self {
        Self {
            bbox,
            position,
            qr_data: None,
            detection_method,
            confidence,
        }
    }

    pub fn with_qr_data(mut self, data: impl Into<String>) -> Self {
        self.qr_data = Some(data.into());
        self
    }

    /// Region covering the whole frame, used when nothing else was found.
    pub fn single(width: u32, height: u32) -> Self {
        Self::new(
            BoundingBox::full_frame(width, height),
            1,
            DetectionMethod::SingleNote,
            0.5,
        )
    }
}

/// Tiles a `width` x `height` frame into `rows` x `cols` cells, row-major,
/// keeping the first `count` cells.
pub fn grid_regions(
    width: u32,
    height: u32,
    rows: u32,
    cols: u32,
    count: usize,
    method: DetectionMethod,
    confidence: f64,
) -> Vec<NoteRegion> {
    let rows = rows.max(1);
    let cols = cols.max(1);
    let cell_w = (width / cols).max(1);
    let cell_h = (height / rows).max(1);

    (0..rows)
        .flat_map(|row| (0..cols).map(move |col| (row, col)))
        .take(count)
        .enumerate()
        .map(|(i, (row, col))| {
            NoteRegion::new(
                BoundingBox::new(col * cell_w, row * cell_h, cell_w, cell_h),
                i + 1,
                method,
                confidence,
            )
        })
        .collect()
}

/// Renumbers positions 1..=n in place.
pub fn renumber(regions: &mut [NoteRegion]) {
    for (i, region) in regions.iter_mut().enumerate() {
        region.position = i + 1;
    }
}
