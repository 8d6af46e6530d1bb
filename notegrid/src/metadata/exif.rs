use std::io::Cursor;

use exif::{In, Reader, Tag, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Capture-time fields read from the original file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaptureMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsCoordinates>,
}

impl CaptureMetadata {
    pub fn is_empty(&self) -> bool {
        self.capture_time.is_none()
            && self.camera_make.is_none()
            && self.camera_model.is_none()
            && self.gps.is_none()
    }
}

/// Returns `None` when the file carries no usable EXIF block.
pub fn read_capture_metadata(bytes: &[u8]) -> Option<CaptureMetadata> {
    let exif = Reader::new()
        .continue_on_error(true)
        .read_from_container(&mut Cursor::new(bytes))
        .or_else(|error| {
            error.distill_partial_result(|errors| {
                tracing::debug!(count = errors.len(), "ignoring malformed EXIF fields");
            })
        })
        .ok()?;

    let text = |tag: Tag| {
        exif.get_field(tag, In::PRIMARY)
            .and_then(field_text)
    };

    let metadata = CaptureMetadata {
        capture_time: text(Tag::DateTimeOriginal).or_else(|| text(Tag::DateTime)),
        camera_make: text(Tag::Make),
        camera_model: text(Tag::Model),
        gps: gps(&exif),
    };

    (!metadata.is_empty()).then_some(metadata)
}

fn field_text(field: &exif::Field) -> Option<String> {
    let value = match &field.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|v| String::from_utf8_lossy(v).trim().to_string())?,
        _ => field.display_value().to_string().trim().to_string(),
    };
    (!value.is_empty()).then_some(value)
}

fn gps(exif: &exif::Exif) -> Option<GpsCoordinates> {
    let coordinate = |value: Tag, reference: Tag, negative: &str| -> Option<f64> {
        let field = exif.get_field(value, In::PRIMARY)?;
        let Value::Rational(parts) = &field.value else {
            return None;
        };
        let degrees = dms_to_decimal(parts)?;
        let sign = match exif.get_field(reference, In::PRIMARY).and_then(field_text) {
            Some(r) if r.eq_ignore_ascii_case(negative) => -1.0,
            _ => 1.0,
        };
        Some(sign * degrees)
    };

    Some(GpsCoordinates {
        latitude: coordinate(Tag::GPSLatitude, Tag::GPSLatitudeRef, "S")?,
        longitude: coordinate(Tag::GPSLongitude, Tag::GPSLongitudeRef, "W")?,
    })
}

fn dms_to_decimal(dms: &[exif::Rational]) -> Option<f64> {
    match dms {
        [d, m, s, ..] => Some(d.to_f64() + m.to_f64() / 60.0 + s.to_f64() / 3600.0),
        _ => None,
    }
}
