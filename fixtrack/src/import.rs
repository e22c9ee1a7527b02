//! Recorded track ingestion (GPX and FIT) into raw [`Fix`] values for replay.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{Fix, TrackError};

/// Nominal user-equivalent range error used to turn HDOP into metres.
const GPX_UERE_M: f64 = 5.0;
const SEMICIRCLES_TO_DEG: f64 = 180.0 / 2_147_483_648.0;

/// Parse a recorded track. `format` is either a bare extension (`"gpx"`) or a
/// file name ending in one.
pub fn parse_fixes(input: &[u8], format: &str) -> Result<Vec<Fix>, TrackError> {
    let format_lc = format.to_ascii_lowercase();
    let fixes = if format_lc.ends_with(".fit") || format_lc == "fit" {
        parse_fit_fixes(input)?
    } else if format_lc.ends_with(".gpx") || format_lc == "gpx" {
        parse_gpx_fixes(input)?
    } else {
        return Err(TrackError::UnsupportedFormat(format.to_string()));
    };
    debug!(format = %format, fixes = fixes.len(), "parsed track");
    Ok(fixes)
}

fn parse_fit_fixes(input: &[u8]) -> Result<Vec<Fix>, TrackError> {
    use fitparser::de::from_bytes;
    use fitparser::profile::MesgNum;

    let records = from_bytes(input).map_err(|e| TrackError::FitParse(e.to_string()))?;
    let mut out = Vec::new();

    for record in records.into_iter() {
        if record.kind() != MesgNum::Record {
            continue;
        }
        let mut timestamp: Option<DateTime<Utc>> = None;
        let mut lat: Option<f64> = None;
        let mut lon: Option<f64> = None;
        let mut altitude: Option<f64> = None;
        let mut speed: Option<f64> = None;
        for field in record.fields() {
            match field.name() {
                "timestamp" => {
                    if let fitparser::Value::Timestamp(ts) = field.value() {
                        timestamp = Some(ts.with_timezone(&Utc));
                    }
                }
                "position_lat" => lat = fit_value_to_f64(field.value()).map(semicircles_to_deg),
                "position_long" => lon = fit_value_to_f64(field.value()).map(semicircles_to_deg),
                // enhanced_* wins when both are present.
                "altitude" => altitude = altitude.or(fit_value_to_f64(field.value())),
                "enhanced_altitude" => {
                    if let Some(val) = fit_value_to_f64(field.value()) {
                        altitude = Some(val);
                    }
                }
                "speed" => speed = speed.or(fit_value_to_f64(field.value())),
                "enhanced_speed" => {
                    if let Some(val) = fit_value_to_f64(field.value()) {
                        speed = Some(val);
                    }
                }
                _ => {}
            }
        }
        if let (Some(timestamp), Some(lat), Some(lon)) = (timestamp, lat, lon) {
            let mut fix = Fix::new(lat, lon, timestamp);
            fix.altitude = altitude;
            fix.speed = speed;
            out.push(fix);
        }
    }

    Ok(out)
}

fn semicircles_to_deg(value: f64) -> f64 {
    value * SEMICIRCLES_TO_DEG
}

fn fit_value_to_f64(value: &fitparser::Value) -> Option<f64> {
    match value {
        fitparser::Value::Float32(v) => Some(*v as f64),
        fitparser::Value::Float64(v) => Some(*v),
        fitparser::Value::SInt8(v) => Some(*v as f64),
        fitparser::Value::SInt16(v) => Some(*v as f64),
        fitparser::Value::SInt32(v) => Some(*v as f64),
        fitparser::Value::SInt64(v) => Some(*v as f64),
        fitparser::Value::UInt8(v) => Some(*v as f64),
        fitparser::Value::UInt16(v) => Some(*v as f64),
        fitparser::Value::UInt32(v) => Some(*v as f64),
        fitparser::Value::UInt64(v) => Some(*v as f64),
        fitparser::Value::UInt8z(v) => Some(*v as f64),
        fitparser::Value::UInt16z(v) => Some(*v as f64),
        fitparser::Value::UInt32z(v) => Some(*v as f64),
        fitparser::Value::UInt64z(v) => Some(*v as f64),
        fitparser::Value::Byte(v) => Some(*v as f64),
        fitparser::Value::Array(values) => values.iter().find_map(fit_value_to_f64),
        _ => None,
    }
}

fn parse_gpx_fixes(input: &[u8]) -> Result<Vec<Fix>, TrackError> {
    use gpx::read;
    use std::io::Cursor;

    let mut cursor = Cursor::new(input);
    let gpx = read(&mut cursor).map_err(|e| TrackError::GpxParse(e.to_string()))?;
    let mut out = Vec::new();

    for track in gpx.tracks {
        for segment in track.segments {
            for point in segment.points {
                let time = match point.time {
                    Some(time) => time,
                    None => continue,
                };
                let iso = time
                    .format()
                    .map_err(|e| TrackError::GpxParse(e.to_string()))?;
                let timestamp = DateTime::parse_from_rfc3339(&iso)
                    .map_err(|e| TrackError::GpxParse(e.to_string()))?
                    .with_timezone(&Utc);
                let geo = point.point();
                let mut fix = Fix::new(geo.y(), geo.x(), timestamp);
                fix.altitude = point.elevation;
                fix.speed = point.speed;
                if let Some(hdop) = point.hdop {
                    fix.accuracy = hdop * GPX_UERE_M;
                }
                out.push(fix);
            }
        }
    }
    Ok(out)
}
