//! NMEA 0183 sentence codec.
//!
//! Parses and emits `$...*CS` sentences and decodes `GGA` fixes into a
//! semantic [`GgaData`] record. The wire format: `$` + talker(2) +
//! type(3) + comma-separated fields + `*` + checksum(2 hex) + `\r\n`.
//! Checksum is the XOR of every byte strictly between `$` and `*`.

use chrono::{NaiveTime, Timelike};

use crate::error::{NtripError, Result};

/// A parsed (but not semantically interpreted) NMEA sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    /// Talker + sentence type, e.g. "GPGGA".
    pub kind: String,
    pub fields: Vec<String>,
}

/// GNSS fix quality, as carried in GGA field 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixQuality {
    None,
    Single,
    Dgps,
    Fix,
    Float,
    Unknown(u8),
}

impl FixQuality {
    fn from_code(code: u8) -> Self {
        match code {
            0 => FixQuality::None,
            1 => FixQuality::Single,
            2 => FixQuality::Dgps,
            4 => FixQuality::Fix,
            5 => FixQuality::Float,
            other => FixQuality::Unknown(other),
        }
    }

    fn to_code(self) -> u8 {
        match self {
            FixQuality::None => 0,
            FixQuality::Single => 1,
            FixQuality::Dgps => 2,
            FixQuality::Fix => 4,
            FixQuality::Float => 5,
            FixQuality::Unknown(c) => c,
        }
    }

    /// True if the fix carries a usable position; callers must check this
    /// before trusting latitude/longitude.
    pub fn is_valid(self) -> bool {
        !matches!(self, FixQuality::None)
    }
}

/// Decoded `GGA` fix record.
#[derive(Debug, Clone, PartialEq)]
pub struct GgaData {
    pub time: Option<NaiveTime>,
    pub latitude: f64,
    pub longitude: f64,
    pub quality: FixQuality,
    pub satellites: u32,
    pub hdop: f64,
    pub altitude: f64,
    pub geoid_separation: f64,
    pub age: f64,
    pub station_id: u32,
}

impl Default for GgaData {
    fn default() -> Self {
        Self {
            time: None,
            latitude: 0.0,
            longitude: 0.0,
            quality: FixQuality::None,
            satellites: 0,
            hdop: 0.0,
            altitude: 0.0,
            geoid_separation: 0.0,
            age: 0.0,
            station_id: 0,
        }
    }
}

// ── Checksum ─────────────────────────────────────────────────────────────────

fn xor_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

// ── parse / emit ─────────────────────────────────────────────────────────────

/// Validate framing and checksum, and split into a talker+type kind and
/// comma-separated fields.
pub fn parse(s: &str) -> Result<Sentence> {
    let s = s.trim_end_matches(['\r', '\n']);
    if !s.starts_with('$') {
        return Err(NtripError::Framing("sentence must start with '$'".into()));
    }
    let star = s
        .find('*')
        .ok_or_else(|| NtripError::Framing("missing '*' checksum delimiter".into()))?;
    let body = &s[1..star];
    let hex = s.get(star + 1..star + 3).ok_or_else(|| {
        NtripError::Framing("checksum must be exactly 2 hex digits".into())
    })?;
    let expected =
        u8::from_str_radix(hex, 16).map_err(|_| NtripError::Framing("bad checksum hex".into()))?;
    if xor_checksum(body) != expected {
        return Err(NtripError::Checksum);
    }

    let mut fields = body.split(',');
    let kind = fields
        .next()
        .ok_or_else(|| NtripError::Framing("empty sentence body".into()))?
        .to_string();
    Ok(Sentence {
        kind,
        fields: fields.map(String::from).collect(),
    })
}

/// Render `type` + `fields` with a freshly computed checksum.
pub fn emit(kind: &str, fields: &[String]) -> String {
    let mut body = kind.to_string();
    for f in fields {
        body.push(',');
        body.push_str(f);
    }
    let cs = xor_checksum(&body);
    format!("${body}*{cs:02X}\r\n")
}

/// Lazily yield candidate sentences (substrings starting with `$`) found
/// between CRLF delimiters in `buf`. Restartable over the same buffer: each
/// call re-scans from the start, so callers may invoke it repeatedly as more
/// data arrives.
pub fn find_sentences(buf: &str) -> impl Iterator<Item = &str> {
    buf.split("\r\n")
        .map(str::trim)
        .filter(|line| line.starts_with('$'))
}

// ── GGA ──────────────────────────────────────────────────────────────────────

const GGA_MIN_FIELDS: usize = 14;

/// Decode a `DDMM.mmmm` (or `DDDMM.mmmm`) coordinate field into decimal
/// degrees, applying the hemisphere sign.
fn coord_to_degrees(raw: &str, hemisphere: &str) -> Result<f64> {
    if raw.is_empty() {
        return Ok(0.0);
    }
    let v: f64 = raw
        .parse()
        .map_err(|_| NtripError::Framing(format!("bad coordinate field '{raw}'")))?;
    let degrees = (v / 100.0).floor();
    let minutes = v - degrees * 100.0;
    let mut decimal = degrees + minutes / 60.0;
    if hemisphere == "S" || hemisphere == "W" {
        decimal = -decimal;
    }
    Ok(decimal)
}

fn degrees_to_coord(decimal: f64, positive_hemi: &str, negative_hemi: &str) -> (String, String) {
    let hemi = if decimal < 0.0 { negative_hemi } else { positive_hemi };
    let abs = decimal.abs();
    let degrees = abs.floor();
    let minutes = (abs - degrees) * 60.0;
    (format!("{:02.0}{:07.4}", degrees, minutes), hemi.to_string())
}

fn parse_f64(field: &str) -> f64 {
    field.parse().unwrap_or(0.0)
}

fn parse_time(field: &str) -> Option<NaiveTime> {
    if field.len() < 6 {
        return None;
    }
    let hh: u32 = field.get(0..2)?.parse().ok()?;
    let mm: u32 = field.get(2..4)?.parse().ok()?;
    let frac = &field[4..];
    let ss: f64 = frac.parse().ok()?;
    NaiveTime::from_hms_milli_opt(hh, mm, ss.trunc() as u32, ((ss.fract()) * 1000.0).round() as u32)
}

/// Decode a validated `$xxGGA,...*CS` sentence's fields into a fix record.
pub fn parse_gga(s: &str) -> Result<GgaData> {
    let sentence = parse(s)?;
    if !sentence.kind.ends_with("GGA") {
        return Err(NtripError::Protocol(format!(
            "expected GGA sentence, got {}",
            sentence.kind
        )));
    }
    if sentence.fields.len() < GGA_MIN_FIELDS {
        return Err(NtripError::Framing(format!(
            "GGA requires {GGA_MIN_FIELDS} fields, got {}",
            sentence.fields.len()
        )));
    }
    let f = &sentence.fields;

    let latitude = if f[1].is_empty() || f[2].is_empty() {
        0.0
    } else {
        coord_to_degrees(&f[1], &f[2])?
    };
    let longitude = if f[3].is_empty() || f[4].is_empty() {
        0.0
    } else {
        coord_to_degrees(&f[3], &f[4])?
    };

    Ok(GgaData {
        time: parse_time(&f[0]),
        latitude,
        longitude,
        quality: FixQuality::from_code(f[5].parse().unwrap_or(0)),
        satellites: f[6].parse().unwrap_or(0),
        hdop: parse_f64(&f[7]),
        altitude: parse_f64(&f[8]),
        geoid_separation: parse_f64(&f[10]),
        age: parse_f64(&f[12]),
        station_id: f[13].trim().parse().unwrap_or(0),
    })
}

/// Render a fix record back into a `GPGGA` sentence using the same field
/// layout `parse_gga` consumes.
pub fn emit_gga(fix: &GgaData) -> String {
    let time_field = match fix.time {
        Some(t) => format!(
            "{:02}{:02}{:02}.{:03}",
            t.hour(),
            t.minute(),
            t.second(),
            t.nanosecond() / 1_000_000,
        ),
        None => String::new(),
    };
    let (lat, ns) = degrees_to_coord(fix.latitude, "N", "S");
    let (lon, ew) = degrees_to_coord(fix.longitude, "E", "W");

    let fields = vec![
        time_field,
        lat,
        ns,
        lon,
        ew,
        fix.quality.to_code().to_string(),
        fix.satellites.to_string(),
        format!("{:.1}", fix.hdop),
        format!("{:.1}", fix.altitude),
        "M".to_string(),
        format!("{:.1}", fix.geoid_separation),
        "M".to_string(),
        if fix.age == 0.0 { String::new() } else { format!("{:.1}", fix.age) },
        if fix.station_id == 0 { String::new() } else { fix.station_id.to_string() },
    ];
    emit("GPGGA", &fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    #[test]
    fn decode_sample_gga() {
        let fix = parse_gga(S1).unwrap();
        assert!(matches!(fix.quality, FixQuality::Single));
        assert_eq!(fix.satellites, 8);
        assert!((fix.hdop - 0.9).abs() < 1e-9);
        assert!((fix.altitude - 545.4).abs() < 1e-9);
        assert!((fix.latitude - 48.1173).abs() < 1e-4);
        assert!((fix.longitude - 11.51667).abs() < 1e-4);
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let bad = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*48";
        assert!(matches!(parse_gga(bad), Err(NtripError::Checksum)));
    }

    #[test]
    fn checksum_property_holds_for_emitted_sentences() {
        let sentence = emit("GPGGA", &["1".into(), "2".into()]);
        let parsed = parse(&sentence).unwrap();
        assert_eq!(parsed.kind, "GPGGA");
    }

    #[test]
    fn missing_lat_lon_yields_zero_position_but_parses() {
        let body = "GPGGA,123519,,,,,,08,0.9,545.4,M,46.9,M,,";
        let cs = xor_checksum(body);
        let s = format!("${body}*{cs:02X}");
        let fix = parse_gga(&s).unwrap();
        assert_eq!(fix.latitude, 0.0);
        assert_eq!(fix.longitude, 0.0);
    }

    #[test]
    fn find_sentences_scans_restartably() {
        let buf = "garbage\r\n$GPGGA,1*00\r\n$GPRMC,2*00\r\nmore";
        let found: Vec<&str> = find_sentences(buf).collect();
        assert_eq!(found, vec!["$GPGGA,1*00", "$GPRMC,2*00"]);
        // Re-running over the same buffer yields the same result.
        let found_again: Vec<&str> = find_sentences(buf).collect();
        assert_eq!(found, found_again);
    }

    #[test]
    fn round_trip_emit_then_parse_gga() {
        let fix = GgaData {
            time: NaiveTime::from_hms_opt(12, 35, 19),
            latitude: 48.11730,
            longitude: 11.51667,
            quality: FixQuality::Single,
            satellites: 8,
            hdop: 0.9,
            altitude: 545.4,
            geoid_separation: 46.9,
            age: 0.0,
            station_id: 0,
        };
        let sentence = emit_gga(&fix);
        let decoded = parse_gga(&sentence).unwrap();
        assert!((decoded.latitude - fix.latitude).abs() < 1e-5);
        assert!((decoded.longitude - fix.longitude).abs() < 1e-5);
        assert!((decoded.altitude - fix.altitude).abs() < 0.1);
        assert_eq!(decoded.satellites, fix.satellites);
    }
}
