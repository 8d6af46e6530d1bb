use image::{DynamicImage, GrayImage, Luma};

/// Prepares a region crop for the local engine: drop alpha, go grayscale,
/// stretch the histogram.
pub fn enhance_for_ocr(image: &DynamicImage) -> GrayImage {
    stretch_contrast(remove_alpha(image).to_luma8())
}

/// Composites translucent pixels onto white so they don't read as ink.
fn remove_alpha(image: &DynamicImage) -> DynamicImage {
    if !image.color().has_alpha() {
        return image.clone();
    }

    let rgba = image.to_rgba8();
    DynamicImage::ImageRgb8(image::RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = f32::from(a) / 255.0;
        let blend = |c: u8| (f32::from(c) * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    }))
}

/// Maps the darkest pixel to 0 and the lightest to 255; flat images are
/// returned unchanged.
pub fn stretch_contrast(gray: GrayImage) -> GrayImage {
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));

    if max <= min {
        return gray;
    }

    let range = f32::from(max - min);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = f32::from(gray.get_pixel(x, y)[0] - min) / range;
        Luma([(value * 255.0).round() as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stretch_expands_range() {
        let gray = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 100 } else { 150 }]));
        let stretched = stretch_contrast(gray);
        assert_eq!(stretched.get_pixel(0, 0)[0], 0);
        assert_eq!(stretched.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn test_flat_image_is_unchanged() {
        let gray = GrayImage::from_pixel(4, 4, Luma([77]));
        assert_eq!(stretch_contrast(gray.clone()), gray);
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let rgba = image::RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgba([0, 0, 0, 0])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        let gray = enhance_for_ocr(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(gray.get_pixel(0, 0)[0], 255);
        assert_eq!(gray.get_pixel(1, 0)[0], 0);
    }
}
