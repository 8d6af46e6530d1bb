use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::filter::{box_filter, gaussian_blur_f32};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology::close;
use imageproc::point::Point;

use crate::framework::calculate_confidence;
use crate::models::{BoundingBox, DetectionMethod, NoteRegion};

const BLUR_SIGMA: f32 = 1.1;
/// 11x11 neighbourhood.
const THRESHOLD_RADIUS: u32 = 5;
const THRESHOLD_OFFSET: i16 = 2;
const CLOSE_RADIUS: u8 = 2;
const MIN_AREA_RATIO: f64 = 0.01;
const MAX_AREA_RATIO: f64 = 0.95;
const MIN_SIDE: u32 = 50;

/// Note outlines from an adaptive-threshold edge map.
pub fn detect_contour_regions(gray: &GrayImage) -> Vec<NoteRegion> {
    let (width, height) = gray.dimensions();
    let image_area = f64::from(width) * f64::from(height);
    if image_area == 0.0 {
        return Vec::new();
    }

    let edges = edge_map(gray);
    let mut regions: Vec<NoteRegion> = find_contours::<i32>(&edges)
        .into_iter()
        .filter(|c| c.parent.is_none() && c.border_type == BorderType::Outer)
        .filter_map(|contour| score_contour(&contour.points, image_area))
        .map(|(bbox, confidence)| NoteRegion::new(bbox, 0, DetectionMethod::Contour, confidence))
        .collect();

    regions.sort_by_key(|r| (r.bbox.y, r.bbox.x));
    for (i, region) in regions.iter_mut().enumerate() {
        region.position = i + 1;
    }
    regions
}

/// Blur, inverted mean-adaptive threshold, then morphological close.
fn edge_map(gray: &GrayImage) -> GrayImage {
    let blurred = gaussian_blur_f32(gray, BLUR_SIGMA);
    let local_mean = box_filter(&blurred, THRESHOLD_RADIUS, THRESHOLD_RADIUS);

    let thresholded = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = i16::from(blurred.get_pixel(x, y)[0]);
        let mean = i16::from(local_mean.get_pixel(x, y)[0]);
        Luma([if value <= mean - THRESHOLD_OFFSET { 255 } else { 0 }])
    });

    close(&thresholded, Norm::LInf, CLOSE_RADIUS)
}

fn score_contour(points: &[Point<i32>], image_area: f64) -> Option<(BoundingBox, f64)> {
    if points.len() < 3 {
        return None;
    }

    let area = polygon_area(points);
    if area <= image_area * MIN_AREA_RATIO || area >= image_area * MAX_AREA_RATIO {
        return None;
    }

    let bbox = bounding_rect(points);
    let aspect = bbox.aspect_ratio();
    if aspect <= 0.3 || aspect >= 3.0 {
        return None;
    }
    if bbox.width < MIN_SIDE || bbox.height < MIN_SIDE {
        return None;
    }

    let vertices = polygon_vertices(points);
    if !(4..=8).contains(&vertices) {
        return None;
    }

    Some((bbox, contour_confidence(area / image_area, aspect, vertices)))
}

/// Blend of area, aspect and corner-count scores, weighted 0.4/0.3/0.3.
pub fn contour_confidence(area_ratio: f64, aspect: f64, vertices: usize) -> f64 {
    let area_score = if (0.01..=0.1).contains(&area_ratio) {
        1.0
    } else if (0.005..=0.2).contains(&area_ratio) {
        0.7
    } else {
        0.3
    };
    let aspect_score = if (0.5..=2.0).contains(&aspect) {
        1.0
    } else if (0.3..=3.0).contains(&aspect) {
        0.7
    } else {
        0.3
    };
    let shape_score = match vertices {
        4..=6 => 1.0,
        3..=8 => 0.7,
        _ => 0.3,
    };

    calculate_confidence(
        &[("area", area_score), ("aspect", aspect_score), ("shape", shape_score)],
        Some(&[("area", 0.4), ("aspect", 0.3), ("shape", 0.3)]),
    )
}

/// Shoelace area.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    (twice as f64 / 2.0).abs()
}

fn bounding_rect(points: &[Point<i32>]) -> BoundingBox {
    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0).max(0);
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0).max(0);
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0).max(0);
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0).max(0);
    BoundingBox::new(
        min_x as u32,
        min_y as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    )
}

fn polygon_vertices(points: &[Point<i32>]) -> usize {
    let epsilon = 0.02 * arc_length(points, true);
    let mut approx = approximate_polygon_dp(points, epsilon, true);
    if approx.len() > 1 && approx.first() == approx.last() {
        approx.pop();
    }
    approx.len()
}
