//! Capture time and location from embedded EXIF metadata.

use chrono::{DateTime, NaiveDate, Utc};
use exif::{Field, In, Tag, Value};
use std::{fs::File, io::BufReader, path::Path};

/// Fields of interest pulled from an image's EXIF block.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CaptureInfo {
    pub taken_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Read EXIF from `path`. Missing or malformed metadata yields an empty
/// `CaptureInfo`; it is never an error for the caller.
pub fn read_capture_info(path: &Path) -> CaptureInfo {
    let Ok(file) = File::open(path) else {
        return CaptureInfo::default();
    };
    let mut reader = BufReader::new(file);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut reader) else {
        return CaptureInfo::default();
    };

    let taken_at = exif
        .get_field(Tag::DateTimeOriginal, In::PRIMARY)
        .or_else(|| exif.get_field(Tag::DateTime, In::PRIMARY))
        .and_then(parse_datetime);

    let latitude = coordinate(
        exif.get_field(Tag::GPSLatitude, In::PRIMARY),
        exif.get_field(Tag::GPSLatitudeRef, In::PRIMARY),
        b'S',
    );
    let longitude = coordinate(
        exif.get_field(Tag::GPSLongitude, In::PRIMARY),
        exif.get_field(Tag::GPSLongitudeRef, In::PRIMARY),
        b'W',
    );

    CaptureInfo {
        taken_at,
        latitude,
        longitude,
    }
}

// EXIF timestamps carry no zone; they are taken as UTC.
fn parse_datetime(field: &Field) -> Option<DateTime<Utc>> {
    let Value::Ascii(ref parts) = field.value else {
        return None;
    };
    let dt = exif::DateTime::from_ascii(parts.first()?).ok()?;
    NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?
        .and_hms_opt(dt.hour.into(), dt.minute.into(), dt.second.into())
        .map(|naive| naive.and_utc())
}

fn coordinate(value: Option<&Field>, reference: Option<&Field>, negative: u8) -> Option<f64> {
    let Value::Rational(ref dms) = value?.value else {
        return None;
    };
    if dms.len() < 3 {
        return None;
    }
    let degrees = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;
    if !degrees.is_finite() {
        return None;
    }

    let is_negative = match reference.map(|f| &f.value) {
        Some(Value::Ascii(parts)) => parts
            .first()
            .and_then(|p| p.first())
            .is_some_and(|c| c.eq_ignore_ascii_case(&negative)),
        _ => false,
    };

    Some(if is_negative { -degrees } else { degrees })
}
