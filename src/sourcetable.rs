//! Sourcetable model and wire encoder/decoder.
//!
//! The sourcetable is the discovery document a caster returns at `GET /`:
//! three ordered sequences of `;`-delimited entries followed by
//! `ENDSOURCETABLE`. Rendering is a wire contract — field order and float
//! formatting must be reproducible bit-for-bit.

use crate::error::{NtripError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CasterEntry {
    pub host: String,
    pub port: u16,
    pub identifier: String,
    pub operator: String,
    pub nmea: bool,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub fallback_host: String,
    pub fallback_port: u16,
    pub misc: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkEntry {
    pub identifier: String,
    pub operator: String,
    pub auth: String,
    pub fee: bool,
    pub info_url: String,
    pub stream_url: String,
    pub reg_addr: String,
    pub misc: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub name: String,
    pub identifier: String,
    pub format: String,
    pub format_details: String,
    pub carrier: String,
    pub nav_system: String,
    pub network: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub nmea: bool,
    pub solution: bool,
    pub generator: String,
    pub compression: String,
    pub auth: String,
    pub fee: bool,
    pub bitrate: String,
    pub misc: String,
}

impl Default for StreamEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            identifier: String::new(),
            format: String::new(),
            format_details: String::new(),
            carrier: String::new(),
            nav_system: String::new(),
            network: String::new(),
            country: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            nmea: false,
            solution: false,
            generator: String::new(),
            compression: String::new(),
            auth: String::new(),
            fee: false,
            bitrate: "0".to_string(),
            misc: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sourcetable {
    pub casters: Vec<CasterEntry>,
    pub networks: Vec<NetworkEntry>,
    pub streams: Vec<StreamEntry>,
}

fn bool01(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

fn yn(b: bool) -> &'static str {
    if b {
        "Y"
    } else {
        "N"
    }
}

fn parse_bool01(s: &str) -> bool {
    s.trim() == "1"
}

fn parse_yn(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("Y")
}

fn parse_f64(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}

fn parse_u16(s: &str) -> u16 {
    s.trim().parse().unwrap_or(0)
}

impl CasterEntry {
    fn render(&self) -> String {
        format!(
            "CAS;{};{};{};{};{};{};{:.4};{:.4};{};{};{}",
            self.host,
            self.port,
            self.identifier,
            self.operator,
            bool01(self.nmea),
            self.country,
            self.latitude,
            self.longitude,
            self.fallback_host,
            self.fallback_port,
            self.misc,
        )
    }

    fn parse(fields: &[&str]) -> Result<Self> {
        if fields.len() < 11 {
            return Err(NtripError::Framing("CAS entry needs 11 fields".into()));
        }
        Ok(Self {
            host: fields[0].to_string(),
            port: parse_u16(fields[1]),
            identifier: fields[2].to_string(),
            operator: fields[3].to_string(),
            nmea: parse_bool01(fields[4]),
            country: fields[5].to_string(),
            latitude: parse_f64(fields[6]),
            longitude: parse_f64(fields[7]),
            fallback_host: fields[8].to_string(),
            fallback_port: parse_u16(fields[9]),
            misc: fields[10].to_string(),
        })
    }
}

impl NetworkEntry {
    fn render(&self) -> String {
        format!(
            "NET;{};{};{};{};{};{};{};{}",
            self.identifier,
            self.operator,
            self.auth,
            yn(self.fee),
            self.info_url,
            self.stream_url,
            self.reg_addr,
            self.misc,
        )
    }

    fn parse(fields: &[&str]) -> Result<Self> {
        if fields.len() < 8 {
            return Err(NtripError::Framing("NET entry needs 8 fields".into()));
        }
        Ok(Self {
            identifier: fields[0].to_string(),
            operator: fields[1].to_string(),
            auth: fields[2].to_string(),
            fee: parse_yn(fields[3]),
            info_url: fields[4].to_string(),
            stream_url: fields[5].to_string(),
            reg_addr: fields[6].to_string(),
            misc: fields[7].to_string(),
        })
    }
}

impl StreamEntry {
    fn render(&self) -> String {
        format!(
            "STR;{};{};{};{};{};{};{};{};{:.4};{:.4};{};{};{};{};{};{};{};{}",
            self.name,
            self.identifier,
            self.format,
            self.format_details,
            self.carrier,
            self.nav_system,
            self.network,
            self.country,
            self.latitude,
            self.longitude,
            bool01(self.nmea),
            bool01(self.solution),
            self.generator,
            self.compression,
            self.auth,
            yn(self.fee),
            self.bitrate,
            self.misc,
        )
    }

    fn parse(fields: &[&str]) -> Result<Self> {
        if fields.len() < 18 {
            return Err(NtripError::Framing("STR entry needs 18 fields".into()));
        }
        Ok(Self {
            name: fields[0].to_string(),
            identifier: fields[1].to_string(),
            format: fields[2].to_string(),
            format_details: fields[3].to_string(),
            carrier: fields[4].to_string(),
            nav_system: fields[5].to_string(),
            network: fields[6].to_string(),
            country: fields[7].to_string(),
            latitude: parse_f64(fields[8]),
            longitude: parse_f64(fields[9]),
            nmea: parse_bool01(fields[10]),
            solution: parse_bool01(fields[11]),
            generator: fields[12].to_string(),
            compression: fields[13].to_string(),
            auth: fields[14].to_string(),
            fee: parse_yn(fields[15]),
            bitrate: fields[16].to_string(),
            misc: fields[17].to_string(),
        })
    }
}

impl Sourcetable {
    /// Render the canonical wire form: casters, then networks, then streams,
    /// each line `\r\n`-terminated, closed by `ENDSOURCETABLE\r\n`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for c in &self.casters {
            out.push_str(&c.render());
            out.push_str("\r\n");
        }
        for n in &self.networks {
            out.push_str(&n.render());
            out.push_str("\r\n");
        }
        for s in &self.streams {
            out.push_str(&s.render());
            out.push_str("\r\n");
        }
        out.push_str("ENDSOURCETABLE\r\n");
        out
    }

    /// Parse the wire form back into a sourcetable, tolerating a missing
    /// trailing `ENDSOURCETABLE` from lenient peers.
    pub fn parse(text: &str) -> Result<Self> {
        let mut table = Sourcetable::default();
        for line in text.split("\r\n") {
            let line = line.trim();
            if line.is_empty() || line == "ENDSOURCETABLE" {
                continue;
            }
            let mut parts = line.split(';');
            let tag = parts
                .next()
                .ok_or_else(|| NtripError::Framing("empty sourcetable line".into()))?;
            let rest: Vec<&str> = parts.collect();
            match tag {
                "CAS" => table.casters.push(CasterEntry::parse(&rest)?),
                "NET" => table.networks.push(NetworkEntry::parse(&rest)?),
                "STR" => table.streams.push(StreamEntry::parse(&rest)?),
                other => {
                    return Err(NtripError::Framing(format!(
                        "unknown sourcetable entry tag '{other}'"
                    )))
                }
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_minimal_stream_entry() {
        let table = Sourcetable {
            streams: vec![StreamEntry {
                name: "TEST".into(),
                identifier: "TEST".into(),
                format: "RTCM 3.3".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let rendered = table.render();
        assert_eq!(
            rendered,
            "STR;TEST;TEST;RTCM 3.3;;;;;;0.0000;0.0000;0;0;;;;N;0;\r\nENDSOURCETABLE\r\n"
        );
    }

    #[test]
    fn bitrate_defaults_to_zero() {
        let table = Sourcetable {
            streams: vec![StreamEntry {
                name: "X".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(table.render().contains(";N;0;\r\n"));
    }

    #[test]
    fn idempotent_round_trip() {
        let table = Sourcetable {
            casters: vec![CasterEntry {
                host: "caster.example.com".into(),
                port: 2101,
                identifier: "Example".into(),
                operator: "Example Org".into(),
                nmea: true,
                country: "USA".into(),
                latitude: 38.0,
                longitude: -97.0,
                fallback_host: String::new(),
                fallback_port: 0,
                misc: String::new(),
            }],
            networks: vec![NetworkEntry {
                identifier: "EXAMPLE".into(),
                operator: "Example Org".into(),
                auth: "B".into(),
                fee: false,
                info_url: "http://example.com".into(),
                stream_url: String::new(),
                reg_addr: String::new(),
                misc: String::new(),
            }],
            streams: vec![StreamEntry {
                name: "MOUNT1".into(),
                identifier: "MOUNT1".into(),
                format: "RTCM 3.3".into(),
                nav_system: "GPS+GLO".into(),
                country: "USA".into(),
                latitude: 38.1234,
                longitude: -97.5678,
                nmea: true,
                solution: false,
                fee: false,
                ..Default::default()
            }],
        };
        let rendered = table.render();
        let parsed = Sourcetable::parse(&rendered).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn parse_tolerates_missing_terminator() {
        let text = "STR;M;M;RTCM 3.3;;;;;;0.0000;0.0000;0;0;;;;N;0;";
        let table = Sourcetable::parse(text).unwrap();
        assert_eq!(table.streams.len(), 1);
        assert_eq!(table.streams[0].name, "M");
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(Sourcetable::parse("FOO;bar").is_err());
    }
}
