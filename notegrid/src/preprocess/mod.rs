//! Decoding, working-copy resize and whole-image analysis.
//!
//! Quality scores and colors are computed once per page and shared by every
//! region.

mod color;
mod enhance;

use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};

use crate::error::{NoteError, Result};
use crate::framework::{calculate_confidence, SharedSink, StageResult};
use crate::models::{BoundingBox, ColorInfo, NoteType};

pub use color::{background_color, dominant_color};
pub use enhance::{enhance_for_ocr, stretch_contrast};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageProperties {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub file_size: u64,
    pub format: String,
    pub color_space: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageQuality {
    pub blur_score: f64,
    pub contrast_score: f64,
    pub brightness_score: f64,
    pub resolution_score: f64,
    pub overall_score: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum NoteSize {
    #[serde(rename = "3x3_inches")]
    Square3x3,
    #[serde(rename = "3x5_inches")]
    Rect3x5,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageAnalysis {
    pub properties: ImageProperties,
    pub quality: ImageQuality,
    pub dominant_color: ColorInfo,
    pub background_color: ColorInfo,
    pub note_type: NoteType,
    pub estimated_size: NoteSize,
}

/// A decoded page plus the bounded copy detectors run on.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub image: DynamicImage,
    pub working: DynamicImage,
    /// Original pixels per working pixel.
    pub scale: f64,
    pub properties: ImageProperties,
}

impl LoadedImage {
    /// Maps a working-copy box onto the original image.
    pub fn to_original(&self, bbox: BoundingBox) -> BoundingBox {
        if (self.scale - 1.0).abs() < f64::EPSILON {
            return bbox;
        }
        let scale = |v: u32| (f64::from(v) * self.scale).round() as u32;
        BoundingBox::new(scale(bbox.x), scale(bbox.y), scale(bbox.width), scale(bbox.height))
            .clamp_to(self.properties.width, self.properties.height)
    }
}

#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub loaded: LoadedImage,
    pub analysis: ImageAnalysis,
}

pub fn load_image(bytes: &[u8], max_working_dimension: u32) -> Result<LoadedImage> {
    let format = image::guess_format(bytes).ok();
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| NoteError::Image(format!("Failed to read image: {e}")))?
        .decode()
        .map_err(|e| NoteError::Image(format!("Failed to decode image: {e}")))?;

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(NoteError::Image("Image has no pixels".to_string()));
    }

    let working = resize_if_needed(&image, max_working_dimension);
    let scale = f64::from(width) / f64::from(working.width().max(1));

    let properties = ImageProperties {
        width,
        height,
        channels: image.color().channel_count(),
        file_size: bytes.len() as u64,
        format: format
            .map(|f| format!("{f:?}").to_uppercase())
            .unwrap_or_else(|| "UNKNOWN".to_string()),
        color_space: color_space_name(&image).to_string(),
    };

    Ok(LoadedImage {
        image,
        working,
        scale,
        properties,
    })
}

fn color_space_name(image: &DynamicImage) -> &'static str {
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => "grayscale",
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => "grayscale_alpha",
        DynamicImage::ImageRgba8(_) | DynamicImage::ImageRgba16(_) | DynamicImage::ImageRgba32F(_) => "rgba",
        _ => "rgb",
    }
}

/// Downscales so the longest side is at most `max_dim`, keeping aspect ratio.
fn resize_if_needed(image: &DynamicImage, max_dim: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if max_dim == 0 || (width <= max_dim && height <= max_dim) {
        return image.clone();
    }
    // `resize` fits within the bounds and preserves aspect ratio.
    image.resize(max_dim, max_dim, FilterType::Lanczos3)
}

/// Focus, contrast, exposure and resolution scores, each in `[0, 1]`.
pub fn assess_quality(gray: &GrayImage, original_pixels: u64) -> ImageQuality {
    let pixel_count = gray.pixels().len().max(1) as f64;
    let mean = gray.pixels().map(|p| f64::from(p[0])).sum::<f64>() / pixel_count;
    let variance = gray
        .pixels()
        .map(|p| (f64::from(p[0]) - mean).powi(2))
        .sum::<f64>()
        / pixel_count;

    let laplacian = imageproc::filter::laplacian_filter(gray);
    let lap_count = laplacian.pixels().len().max(1) as f64;
    let lap_mean = laplacian.pixels().map(|p| f64::from(p[0])).sum::<f64>() / lap_count;
    let lap_variance = laplacian
        .pixels()
        .map(|p| (f64::from(p[0]) - lap_mean).powi(2))
        .sum::<f64>()
        / lap_count;

    let blur_score = (lap_variance / 100.0).min(1.0);
    let contrast_score = (variance.sqrt() / 127.5).min(1.0);
    let brightness_score = ((mean - 127.5).abs() / 127.5).min(1.0);
    let resolution_score = (original_pixels as f64 / 1_000_000.0).min(1.0);

    let overall_score = calculate_confidence(
        &[
            ("blur", blur_score),
            ("contrast", contrast_score),
            ("brightness", brightness_score),
            ("resolution", resolution_score),
        ],
        Some(&[
            ("blur", 0.3),
            ("contrast", 0.3),
            ("brightness", 0.2),
            ("resolution", 0.2),
        ]),
    );

    ImageQuality {
        blur_score,
        contrast_score,
        brightness_score,
        resolution_score,
        overall_score,
    }
}

/// Physical size guess from the short/long side ratio.
pub fn estimate_size(width: u32, height: u32) -> NoteSize {
    let (short, long) = (width.min(height), width.max(height));
    if long == 0 {
        return NoteSize::Unknown;
    }
    let ratio = f64::from(short) / f64::from(long);
    if (0.8..=1.2).contains(&ratio) {
        NoteSize::Square3x3
    } else if (0.6..0.8).contains(&ratio) {
        NoteSize::Rect3x5
    } else {
        NoteSize::Unknown
    }
}

pub fn analyze(loaded: &LoadedImage) -> ImageAnalysis {
    let rgb = loaded.working.to_rgb8();
    let gray = loaded.working.to_luma8();
    let original_pixels = u64::from(loaded.properties.width) * u64::from(loaded.properties.height);

    let background = background_color(&rgb);
    ImageAnalysis {
        properties: loaded.properties.clone(),
        quality: assess_quality(&gray, original_pixels),
        dominant_color: dominant_color(&rgb),
        note_type: NoteType::from_background(background.name),
        background_color: background,
        estimated_size: estimate_size(loaded.properties.width, loaded.properties.height),
    }
}

pub fn crop(image: &DynamicImage, bbox: BoundingBox) -> DynamicImage {
    let bbox = bbox.clamp_to(image.width(), image.height());
    image.crop_imm(bbox.x, bbox.y, bbox.width, bbox.height)
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| NoteError::Image(format!("Failed to encode image: {e}")))?;
    Ok(output)
}

/// First pipeline stage: decode, bound and analyze the page.
#[derive(Clone)]
pub struct ImagePreprocessor {
    sink: SharedSink,
    max_working_dimension: u32,
}

impl ImagePreprocessor {
    pub fn new(sink: SharedSink, max_working_dimension: u32) -> Self {
        Self {
            sink,
            max_working_dimension,
        }
    }

    /// Unreadable input is reported as a partial result straight away.
    pub fn process(&self, bytes: &[u8]) -> StageResult<PreparedImage> {
        let loaded = load_image(bytes, self.max_working_dimension)?;
        let analysis = analyze(&loaded);

        let quality = &analysis.quality;
        self.sink.record("preprocess", "blur_score", quality.blur_score);
        self.sink
            .record("preprocess", "contrast_score", quality.contrast_score);
        self.sink
            .record("preprocess", "overall_quality", quality.overall_score);

        tracing::debug!(
            width = loaded.properties.width,
            height = loaded.properties.height,
            scale = loaded.scale,
            quality = quality.overall_score,
            background = %analysis.background_color.name,
            "image prepared"
        );

        Ok(PreparedImage { loaded, analysis })
    }
}
