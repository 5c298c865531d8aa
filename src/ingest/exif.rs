//! Camera metadata from embedded EXIF.

use crate::photos::ExifData;
use chrono::NaiveDateTime;
use exif::{Field, In, Reader, Tag, Value};

const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Missing or unreadable EXIF yields empty metadata.
pub fn read_exif(bytes: &[u8]) -> ExifData {
    let exif = match Reader::new().read_from_container(&mut std::io::Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(err) => {
            log::debug!("no exif: {err}");
            return ExifData::default();
        }
    };

    let field = |tag: Tag| exif.get_field(tag, In::PRIMARY);

    let date_taken = field(Tag::DateTimeOriginal)
        .and_then(ascii)
        .or_else(|| field(Tag::DateTime).and_then(ascii))
        .and_then(|value| parse_datetime(&value));

    ExifData {
        camera_make: field(Tag::Make).and_then(ascii),
        camera_model: field(Tag::Model).and_then(ascii),
        date_taken,
        iso: field(Tag::PhotographicSensitivity).and_then(|f| f.value.get_uint(0)),
        aperture: field(Tag::FNumber).and_then(rational).map(|v| v as f32),
        shutter_speed: field(Tag::ExposureTime)
            .and_then(rational)
            .and_then(format_exposure),
        focal_length: field(Tag::FocalLength).and_then(rational).map(|v| v as f32),
        gps_latitude: gps_coordinate(field(Tag::GPSLatitude), field(Tag::GPSLatitudeRef)),
        gps_longitude: gps_coordinate(field(Tag::GPSLongitude), field(Tag::GPSLongitudeRef)),
    }
}

fn ascii(field: &Field) -> Option<String> {
    match &field.value {
        Value::Ascii(values) => values
            .first()
            .map(|v| String::from_utf8_lossy(v).trim_matches(['\0', ' ']).to_string())
            .filter(|v| !v.is_empty()),
        _ => None,
    }
}

fn rational(field: &Field) -> Option<f64> {
    match &field.value {
        Value::Rational(values) => values
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.to_f64()),
        _ => None,
    }
}

pub(crate) fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), EXIF_DATETIME_FORMAT).ok()
}

/// "1/250" below a second, plain seconds otherwise.
pub(crate) fn format_exposure(seconds: f64) -> Option<String> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    if seconds < 1.0 {
        Some(format!("1/{}", (1.0 / seconds).round() as u64))
    } else {
        Some(format!("{}", (seconds * 10.0).round() / 10.0))
    }
}

/// Degrees, minutes, seconds to signed decimal degrees.
pub(crate) fn dms_to_decimal(dms: [f64; 3], reference: &str) -> f64 {
    let decimal = dms[0] + dms[1] / 60.0 + dms[2] / 3600.0;
    match reference.trim().to_ascii_uppercase().as_str() {
        "S" | "W" => -decimal,
        _ => decimal,
    }
}

fn gps_coordinate(value: Option<&Field>, reference: Option<&Field>) -> Option<f64> {
    let Value::Rational(parts) = &value?.value else {
        return None;
    };
    if parts.len() < 3 || parts.iter().take(3).any(|r| r.denom == 0) {
        return None;
    }

    let dms = [parts[0].to_f64(), parts[1].to_f64(), parts[2].to_f64()];
    let reference = reference.and_then(ascii).unwrap_or_default();
    Some(dms_to_decimal(dms, &reference))
}
