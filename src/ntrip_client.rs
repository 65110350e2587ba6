//! NTRIP client: raw-socket GET to a caster mount with Basic auth.
//!
//! A general-purpose HTTP client isn't used here for the same reason the
//! caster doesn't sit behind a server framework — the rover needs to retain
//! a live write half of the same connection to push GGA uplinks, which rules
//! out fire-and-forget request/response APIs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{NtripError, Result};

/// Credentials + target for a single NTRIP v2 session.
#[derive(Debug, Clone)]
pub struct NtripTarget {
    pub host: String,
    pub port: u16,
    pub mount: String,
    pub user: String,
    pub password: String,
}

/// An open NTRIP session: a live TCP connection past the response headers,
/// ready for [`NtripSession::read`] (downlink bytes) and
/// [`NtripSession::write`] (GGA uplink).
pub struct NtripSession {
    stream: TcpStream,
    /// Body bytes already pulled off the wire while reading response
    /// headers; drained by [`NtripSession::read`] before touching the
    /// socket again.
    pending: Vec<u8>,
}

fn basic_auth_header(user: &str, password: &str) -> String {
    let token = BASE64.encode(format!("{user}:{password}"));
    format!("Authorization: Basic {token}\r\n")
}

impl NtripSession {
    /// Connect, send `GET /<mount>` with `Ntrip-Version: Ntrip/2.0` and Basic
    /// auth, and read past the response status line and headers.
    pub async fn connect(target: &NtripTarget) -> Result<Self> {
        let mut stream = TcpStream::connect((target.host.as_str(), target.port)).await?;

        let mut request = format!(
            "GET /{} HTTP/1.1\r\n\
             Host: {}:{}\r\n\
             Ntrip-Version: Ntrip/2.0\r\n\
             User-Agent: NTRIP ntrip-core\r\n\
             Accept: */*\r\n\
             Connection: keep-alive\r\n",
            target.mount, target.host, target.port
        );
        if !target.user.is_empty() {
            request.push_str(&basic_auth_header(&target.user, &target.password));
        }
        request.push_str("\r\n");

        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let mut buf = Vec::new();
        let header_end = read_headers(&mut stream, &mut buf).await?;
        let headers = String::from_utf8_lossy(&buf[..header_end]);
        let status_line = headers
            .lines()
            .next()
            .ok_or_else(|| NtripError::Protocol("empty response".into()))?;

        if !(status_line.contains("200") || status_line.contains("ICY 200")) {
            return Err(NtripError::Auth);
        }

        debug!("ntrip client connected: {status_line}");
        // Body bytes already read past the header terminator belong to the
        // downlink stream; keep them so the first `read()` call returns them
        // instead of waiting on the socket for data that already arrived.
        let pending = buf.split_off(header_end);
        Ok(Self { stream, pending })
    }

    /// Read downlink bytes (RTCM3 in practice) into `buf`, returning the
    /// number of bytes read (0 = peer closed).
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }
        Ok(self.stream.read(buf).await?)
    }

    /// Write bytes on the same connection — used for GGA uplink to VRS
    /// casters.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Read until `\r\n\r\n` (or the NTRIP v1 single `\r\n` after `ICY 200 OK`)
/// is seen, returning the index of the header block's end within `buf`.
async fn read_headers(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<usize> {
    let mut chunk = [0u8; 512];
    loop {
        if let Some(pos) = find_header_end(buf) {
            return Ok(pos);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(NtripError::Protocol("connection closed before headers".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > 64 * 1024 {
            return Err(NtripError::Protocol("response headers too large".into()));
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
        .or_else(|| {
            // NTRIP v1's "ICY 200 OK\r\n" greeting has no header block at
            // all; treat the first CRLF as the boundary in that case.
            let text = String::from_utf8_lossy(buf);
            if text.starts_with("ICY 200 OK") {
                buf.windows(2).position(|w| w == b"\r\n").map(|i| i + 2)
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt as _;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_and_reads_v2_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            let req = String::from_utf8_lossy(&buf[..n]);
            assert!(req.contains("GET /TEST HTTP/1.1"));
            assert!(req.contains("Authorization: Basic"));
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\n\r\n\xD3\x00\x01\xAA")
                .await
                .unwrap();
        });

        let target = NtripTarget {
            host: "127.0.0.1".into(),
            port: addr.port(),
            mount: "TEST".into(),
            user: "u".into(),
            password: "p".into(),
        };
        let mut session = NtripSession::connect(&target).await.unwrap();
        let mut buf = [0u8; 4];
        session.read(&mut buf).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_non_200_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 401 Unauthorized\r\n\r\n").await.unwrap();
        });

        let target = NtripTarget {
            host: "127.0.0.1".into(),
            port: addr.port(),
            mount: "TEST".into(),
            user: String::new(),
            password: String::new(),
        };
        let result = NtripSession::connect(&target).await;
        assert!(matches!(result, Err(NtripError::Auth)));
    }
}
