//! Uniform byte-stream abstraction over serial, TCP, and file transports.
//!
//! Every transport this crate talks to — a rover's GNSS receiver, a base
//! station's serial feed, a replayed RTCM log file, a raw TCP connection to
//! a caster — ends up behind the same `AsyncRead + AsyncWrite` handle so the
//! rest of the core never has to know which one it's holding.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;

use crate::error::{NtripError, Result};

/// Anything that can be read from and written to asynchronously. A thin
/// marker over the tokio I/O traits so call sites can hold `Box<dyn
/// ByteStream>` without caring whether it's a serial port, a socket, or a
/// file.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Serial port parameters, parsed from a `port[:baud[:bits[:parity[:stopbits[:flow]]]]]`
/// configuration string. Unspecified fields take the rover's expected
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    pub data_bits: u8,
    pub parity: char,
    pub stop_bits: u8,
    pub flow: char,
}

/// Default baud rate: the expected rate of the target rover's GNSS receiver.
pub const DEFAULT_BAUD: u32 = 38400;

impl SerialConfig {
    /// Parse `port[:baud[:bits[:parity[:stopbits[:flow]]]]]`. Only `port` is
    /// required; every other field falls back to a sane default (8N1, no
    /// flow control, 38400 baud).
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parts = spec.split(':');
        let port = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| NtripError::Config("empty serial port spec".into()))?
            .to_string();

        let baud = match parts.next() {
            Some(b) if !b.is_empty() => b
                .parse()
                .map_err(|_| NtripError::Config(format!("bad baud rate '{b}'")))?,
            _ => DEFAULT_BAUD,
        };
        let data_bits = match parts.next() {
            Some(b) if !b.is_empty() => b
                .parse()
                .map_err(|_| NtripError::Config(format!("bad data bits '{b}'")))?,
            _ => 8,
        };
        let parity = match parts.next() {
            Some(p) if !p.is_empty() => p
                .chars()
                .next()
                .ok_or_else(|| NtripError::Config("empty parity field".into()))?,
            _ => 'N',
        };
        let stop_bits = match parts.next() {
            Some(s) if !s.is_empty() => s
                .parse()
                .map_err(|_| NtripError::Config(format!("bad stop bits '{s}'")))?,
            _ => 1,
        };
        let flow = match parts.next() {
            Some(f) if !f.is_empty() => f
                .chars()
                .next()
                .ok_or_else(|| NtripError::Config("empty flow field".into()))?,
            _ => 'N',
        };

        Ok(Self {
            port,
            baud,
            data_bits,
            parity,
            stop_bits,
            flow,
        })
    }
}

fn data_bits(cfg: &SerialConfig) -> tokio_serial::DataBits {
    match cfg.data_bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn parity(cfg: &SerialConfig) -> tokio_serial::Parity {
    match cfg.parity.to_ascii_uppercase() {
        'E' => tokio_serial::Parity::Even,
        'O' => tokio_serial::Parity::Odd,
        _ => tokio_serial::Parity::None,
    }
}

fn stop_bits(cfg: &SerialConfig) -> tokio_serial::StopBits {
    match cfg.stop_bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

fn flow_control(cfg: &SerialConfig) -> tokio_serial::FlowControl {
    match cfg.flow.to_ascii_uppercase() {
        'H' => tokio_serial::FlowControl::Hardware,
        'S' => tokio_serial::FlowControl::Software,
        _ => tokio_serial::FlowControl::None,
    }
}

/// Open an async serial port for the given configuration. Runs on the tokio
/// reactor rather than a blocking thread, so a stalled receiver never stalls
/// the executor.
pub fn open_serial(cfg: &SerialConfig) -> Result<Box<dyn ByteStream>> {
    let stream = tokio_serial::new(&cfg.port, cfg.baud)
        .data_bits(data_bits(cfg))
        .parity(parity(cfg))
        .stop_bits(stop_bits(cfg))
        .flow_control(flow_control(cfg))
        .open_native_async()
        .map_err(|e| NtripError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    Ok(Box::new(stream))
}

/// Open a plain file for reading (e.g. a captured RTCM log replayed through
/// the server publisher loop in place of a live base station).
pub async fn open_file_reader(path: &Path) -> Result<Box<dyn ByteStream>> {
    let file = tokio::fs::File::open(path).await?;
    Ok(Box::new(file))
}

/// Dial a plain TCP connection.
pub async fn open_tcp_client(host: &str, port: u16) -> Result<Box<dyn ByteStream>> {
    let stream = TcpStream::connect((host, port)).await?;
    Ok(Box::new(stream))
}

/// The data source a [server publisher loop](crate::server_loop) reads bytes
/// from: either a live serial base station or a replayed file, selected by
/// the `server` binary's `-file` flag.
#[derive(Debug, Clone)]
pub enum DataSource {
    Serial(SerialConfig),
    File(PathBuf),
}

impl DataSource {
    pub async fn open(&self) -> Result<Box<dyn ByteStream>> {
        match self {
            DataSource::Serial(cfg) => open_serial(cfg),
            DataSource::File(path) => open_file_reader(path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_only() {
        let cfg = SerialConfig::parse("/dev/ttyUSB0").unwrap();
        assert_eq!(cfg.port, "/dev/ttyUSB0");
        assert_eq!(cfg.baud, DEFAULT_BAUD);
        assert_eq!(cfg.data_bits, 8);
        assert_eq!(cfg.parity, 'N');
        assert_eq!(cfg.stop_bits, 1);
        assert_eq!(cfg.flow, 'N');
    }

    #[test]
    fn parses_full_spec() {
        let cfg = SerialConfig::parse("/dev/ttyACM0:9600:7:E:2:H").unwrap();
        assert_eq!(cfg.port, "/dev/ttyACM0");
        assert_eq!(cfg.baud, 9600);
        assert_eq!(cfg.data_bits, 7);
        assert_eq!(cfg.parity, 'E');
        assert_eq!(cfg.stop_bits, 2);
        assert_eq!(cfg.flow, 'H');
    }

    #[test]
    fn rejects_empty_port() {
        assert!(SerialConfig::parse("").is_err());
    }

    #[test]
    fn rejects_bad_baud() {
        assert!(SerialConfig::parse("/dev/ttyUSB0:notanumber").is_err());
    }

    #[tokio::test]
    async fn file_data_source_opens_for_reading() {
        let path = std::env::temp_dir().join("ntrip_core_bytestream_test_fixture.bin");
        tokio::fs::write(&path, b"\xD3\x00\x01\xAA").await.unwrap();
        let source = DataSource::File(path.clone());
        let mut stream = source.open().await.unwrap();
        let mut buf = [0u8; 4];
        tokio::io::AsyncReadExt::read_exact(&mut stream, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, [0xD3, 0x00, 0x01, 0xAA]);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
