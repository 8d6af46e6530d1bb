//! Embedded QR code detection with a rotation sweep.

use image::{imageops, GrayImage};
use serde::{Deserialize, Serialize};

use crate::models::BoundingBox;

pub const QR_CODE_TYPE: &str = "QRCODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Clockwise90,
    Half,
    Clockwise270,
}

impl Rotation {
    pub const SWEEP: [Rotation; 4] = [
        Rotation::None,
        Rotation::Clockwise90,
        Rotation::Half,
        Rotation::Clockwise270,
    ];

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Half => 180,
            Rotation::Clockwise270 => 270,
        }
    }

    fn apply(self, image: &GrayImage) -> GrayImage {
        match self {
            Rotation::None => image.clone(),
            Rotation::Clockwise90 => imageops::rotate90(image),
            Rotation::Half => imageops::rotate180(image),
            Rotation::Clockwise270 => imageops::rotate270(image),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedCode {
    pub data: String,
    #[serde(rename = "type")]
    pub code_type: String,
    /// Position in the un-rotated image.
    pub position: BoundingBox,
    pub confidence: f64,
}

/// Decodes QR codes, trying 0/90/180/270 degrees and stopping at the first
/// rotation that yields anything. Codes are unique by payload.
pub fn detect_codes(image: &GrayImage) -> Vec<DetectedCode> {
    let (width, height) = image.dimensions();

    for rotation in Rotation::SWEEP {
        let rotated = rotation.apply(image);
        let codes = decode_all(&rotated);
        if codes.is_empty() {
            continue;
        }

        tracing::debug!(
            rotation = rotation.degrees(),
            count = codes.len(),
            "codes decoded"
        );
        let codes = codes
            .into_iter()
            .map(|(data, rect)| DetectedCode {
                data,
                code_type: QR_CODE_TYPE.to_string(),
                position: unrotate_rect(rect, rotation, width, height),
                confidence: 1.0,
            })
            .collect();
        return dedupe_by_payload(codes);
    }

    Vec::new()
}

fn decode_all(image: &GrayImage) -> Vec<(String, BoundingBox)> {
    let (width, height) = image.dimensions();
    let mut prepared =
        rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
            image.get_pixel(x as u32, y as u32)[0]
        });

    prepared
        .detect_grids()
        .into_iter()
        .filter_map(|grid| {
            let bounds = bounds_rect(&grid.bounds);
            match grid.decode() {
                Ok((_meta, content)) => Some((content, bounds)),
                Err(error) => {
                    tracing::trace!(error = %error, "grid found but not decodable");
                    None
                }
            }
        })
        .collect()
}

fn bounds_rect(points: &[rqrr::Point; 4]) -> BoundingBox {
    let xs = points.iter().map(|p| p.x.max(0) as u32);
    let ys = points.iter().map(|p| p.y.max(0) as u32);
    let (min_x, max_x) = (xs.clone().min().unwrap_or(0), xs.max().unwrap_or(0));
    let (min_y, max_y) = (ys.clone().min().unwrap_or(0), ys.max().unwrap_or(0));
    BoundingBox::new(min_x, min_y, max_x - min_x, max_y - min_y)
}

/// Maps a rectangle found in the rotated image back into the original
/// `width` x `height` frame.
pub fn unrotate_rect(rect: BoundingBox, rotation: Rotation, width: u32, height: u32) -> BoundingBox {
    let BoundingBox {
        x,
        y,
        width: w,
        height: h,
    } = rect;
    match rotation {
        Rotation::None => rect,
        Rotation::Clockwise90 => BoundingBox::new(y, height.saturating_sub(x + w), h, w),
        Rotation::Half => BoundingBox::new(
            width.saturating_sub(x + w),
            height.saturating_sub(y + h),
            w,
            h,
        ),
        Rotation::Clockwise270 => BoundingBox::new(width.saturating_sub(y + h), x, h, w),
    }
}

pub fn dedupe_by_payload(codes: Vec<DetectedCode>) -> Vec<DetectedCode> {
    let mut unique: Vec<DetectedCode> = Vec::with_capacity(codes.len());
    for code in codes {
        if !unique.iter().any(|seen| seen.data == code.data) {
            unique.push(code);
        }
    }
    unique
}
