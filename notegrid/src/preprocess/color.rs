use image::RgbImage;

use crate::models::ColorInfo;

const MAX_SAMPLES: usize = 10_000;
const CLUSTERS: usize = 5;
const ITERATIONS: usize = 20;

/// Dominant color: k-means over an evenly strided pixel sample, centroid of
/// the largest cluster.
pub fn dominant_color(image: &RgbImage) -> ColorInfo {
    let samples = sample_pixels(image, MAX_SAMPLES);
    if samples.is_empty() {
        return ColorInfo::default();
    }

    let (centroids, counts) = kmeans(&samples, CLUSTERS, ITERATIONS);
    let largest = counts
        .iter()
        .enumerate()
        .max_by_key(|(i, count)| (**count, std::cmp::Reverse(*i)))
        .map(|(i, _)| i)
        .unwrap_or(0);

    ColorInfo::from_rgb(to_rgb(centroids[largest]))
}

/// Background color: per-channel median of the border pixels.
pub fn background_color(image: &RgbImage) -> ColorInfo {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return ColorInfo::default();
    }

    let mut edge: Vec<[u8; 3]> = Vec::with_capacity(2 * (width + height) as usize);
    for x in 0..width {
        edge.push(image.get_pixel(x, 0).0);
        edge.push(image.get_pixel(x, height - 1).0);
    }
    for y in 0..height {
        edge.push(image.get_pixel(0, y).0);
        edge.push(image.get_pixel(width - 1, y).0);
    }

    let mut rgb = [0u8; 3];
    for (channel, value) in rgb.iter_mut().enumerate() {
        let mut values: Vec<u8> = edge.iter().map(|p| p[channel]).collect();
        values.sort_unstable();
        *value = median(&values);
    }
    ColorInfo::from_rgb(rgb)
}

fn median(sorted: &[u8]) -> u8 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        ((u16::from(sorted[mid - 1]) + u16::from(sorted[mid])) / 2) as u8
    } else {
        sorted[mid]
    }
}

fn sample_pixels(image: &RgbImage, max: usize) -> Vec<[f64; 3]> {
    let total = image.pixels().len();
    let stride = total.div_ceil(max).max(1);
    image
        .pixels()
        .step_by(stride)
        .map(|p| [f64::from(p[0]), f64::from(p[1]), f64::from(p[2])])
        .collect()
}

/// Lloyd's algorithm with farthest-point seeding.
fn kmeans(points: &[[f64; 3]], k: usize, iterations: usize) -> (Vec<[f64; 3]>, Vec<usize>) {
    let k = k.min(points.len()).max(1);
    let mut centroids = seed_centroids(points, k);
    let mut assignment = vec![0usize; points.len()];

    for _ in 0..iterations {
        let mut changed = false;
        for (point, slot) in points.iter().zip(assignment.iter_mut()) {
            let nearest = nearest_centroid(point, &centroids);
            if nearest != *slot {
                *slot = nearest;
                changed = true;
            }
        }

        let mut sums = vec![[0.0f64; 3]; k];
        let mut counts = vec![0usize; k];
        for (point, &cluster) in points.iter().zip(&assignment) {
            counts[cluster] += 1;
            for c in 0..3 {
                sums[cluster][c] += point[c];
            }
        }
        for cluster in 0..k {
            if counts[cluster] > 0 {
                let n = counts[cluster] as f64;
                centroids[cluster] = [sums[cluster][0] / n, sums[cluster][1] / n, sums[cluster][2] / n];
            }
        }

        if !changed {
            break;
        }
    }

    let mut counts = vec![0usize; k];
    for &cluster in &assignment {
        counts[cluster] += 1;
    }
    (centroids, counts)
}

/// First sample, then repeatedly the sample farthest from every chosen seed.
fn seed_centroids(points: &[[f64; 3]], k: usize) -> Vec<[f64; 3]> {
    let mut centroids = vec![points[0]];
    while centroids.len() < k {
        let mut farthest = (0usize, -1.0f64);
        for (i, point) in points.iter().enumerate() {
            let d = distance(point, &centroids[nearest_centroid(point, &centroids)]);
            if d > farthest.1 {
                farthest = (i, d);
            }
        }
        centroids.push(points[farthest.0]);
    }
    centroids
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (0..3).map(|j| (a[j] - b[j]).powi(2)).sum()
}

fn nearest_centroid(point: &[f64; 3], centroids: &[[f64; 3]]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, distance(point, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn to_rgb(centroid: [f64; 3]) -> [u8; 3] {
    centroid.map(|v| v.round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColorName;
    use image::Rgb;

    #[test]
    fn test_dominant_color_is_largest_cluster() {
        // Yellow page with a dark stripe through a quarter of it.
        let image = RgbImage::from_fn(100, 100, |x, _| {
            if x < 25 {
                Rgb([20, 20, 20])
            } else {
                Rgb([250, 235, 120])
            }
        });
        let color = dominant_color(&image);
        assert_eq!(color.rgb, [250, 235, 120]);
        assert_eq!(color.name, ColorName::Yellow);
    }

    #[test]
    fn test_background_ignores_dark_center() {
        let image = RgbImage::from_fn(50, 50, |x, y| {
            if (10..40).contains(&x) && (10..40).contains(&y) {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 180, 190])
            }
        });
        let color = background_color(&image);
        assert_eq!(color.rgb, [255, 180, 190]);
        assert_eq!(color.name, ColorName::Pink);
    }

    #[test]
    fn test_dominant_color_is_deterministic() {
        let image = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]));
        assert_eq!(dominant_color(&image), dominant_color(&image));
    }

    #[test]
    fn test_sampling_is_bounded() {
        let image = RgbImage::from_pixel(300, 300, Rgb([1, 2, 3]));
        assert!(sample_pixels(&image, MAX_SAMPLES).len() <= MAX_SAMPLES);
    }
}
