//! Caster HTTP front-end: a hand-rolled `TcpListener` accept loop that
//! dispatches each connection to NTRIP v1 or v2 handling based on the
//! `Ntrip-Version` header.
//!
//! NTRIP v1 is not HTTP-compliant in its response framing (`ICY 200 OK`),
//! so the caster can't sit behind a general-purpose HTTP server crate — it
//! has to own the raw socket and decide, after parsing the request itself,
//! whether to answer with real HTTP/1.1 framing or take the socket over.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{NtripError, Result};
use crate::source_service::SourceService;
use crate::supervisor::CancellationToken;

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REQUEST_BYTES: usize = 8 * 1024;

struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    /// Body bytes that arrived bundled with the headers in the same read.
    /// Loopback connections routinely deliver header+body in one packet, so
    /// these must be consumed before the handler issues its own socket reads.
    pending: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_ntrip_v2(&self) -> bool {
        self.header("Ntrip-Version")
            .map(|v| v.contains("2.0"))
            .unwrap_or(false)
    }

    fn basic_auth(&self) -> (String, String) {
        let Some(value) = self.header("Authorization") else {
            return (String::new(), String::new());
        };
        let Some(b64) = value.strip_prefix("Basic ") else {
            return (String::new(), String::new());
        };
        let Ok(decoded) = BASE64.decode(b64.trim()) else {
            return (String::new(), String::new());
        };
        let Ok(text) = String::from_utf8(decoded) else {
            return (String::new(), String::new());
        };
        match text.split_once(':') {
            Some((u, p)) => (u.to_string(), p.to_string()),
            None => (text, String::new()),
        }
    }
}

/// Run the accept loop until `cancel` fires. Each connection is handled on
/// its own spawned task, bound to a child of `cancel`.
pub async fn run(
    service: Arc<SourceService>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!("caster listening on {local_addr}");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("caster accept loop cancelled");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => { warn!("accept failed: {e}"); continue; }
                };
                let service = service.clone();
                let conn_cancel = cancel.child_token();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(service, stream, conn_cancel).await {
                        debug!("connection from {peer} ended: {e}");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    service: Arc<SourceService>,
    mut stream: TcpStream,
    cancel: CancellationToken,
) -> Result<()> {
    let request = tokio::time::timeout(IDLE_TIMEOUT, read_request(&mut stream))
        .await
        .map_err(|_| NtripError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "idle timeout")))??;

    if request.is_ntrip_v2() {
        handle_v2(service, stream, request, cancel).await
    } else {
        handle_v1(service, stream, request, cancel).await
    }
}

async fn read_request(stream: &mut TcpStream) -> Result<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    let header_end = loop {
        if let Some(pos) = find_double_crlf(&buf) {
            break pos;
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(NtripError::Protocol("request headers too large".into()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(NtripError::Protocol("connection closed before request".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let text = String::from_utf8_lossy(&buf[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| NtripError::Protocol("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| NtripError::Protocol("missing method".into()))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| NtripError::Protocol("missing path".into()))?
        .to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let pending = buf.split_off(header_end);
    Ok(Request { method, path, headers, pending })
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn mount_from_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

// ── NTRIP v2 ─────────────────────────────────────────────────────────────────

async fn handle_v2(
    service: Arc<SourceService>,
    mut stream: TcpStream,
    request: Request,
    cancel: CancellationToken,
) -> Result<()> {
    let mount = mount_from_path(&request.path);

    if mount.is_empty() && request.method == "GET" {
        let table = service.sourcetable().await;
        let body = table.render();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        return Ok(());
    }

    match request.method.as_str() {
        "POST" => handle_v2_publish(service, stream, mount, &request, cancel).await,
        "GET" => handle_v2_subscribe(service, stream, mount, &request, cancel).await,
        _ => {
            stream
                .write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n")
                .await?;
            Ok(())
        }
    }
}

async fn handle_v2_publish(
    service: Arc<SourceService>,
    mut stream: TcpStream,
    mount: &str,
    request: &Request,
    cancel: CancellationToken,
) -> Result<()> {
    let (user, password) = request.basic_auth();
    let publisher = match service.publisher(mount, &user, &password).await {
        Ok(p) => p,
        Err(NtripError::Auth) => {
            return send_401(&mut stream).await;
        }
        Err(NtripError::Conflict) => {
            stream
                .write_all(b"HTTP/1.1 409 Conflict\r\nContent-Length: 0\r\n\r\n")
                .await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    stream
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
        .await?;
    stream.flush().await?;
    info!("publisher attached to mount {mount}");

    if let Err(e) = read_chunked_body(&mut stream, request.pending.clone(), &publisher, &cancel).await {
        warn!("publisher body error on {mount}: {e}");
    }
    publisher.close().await;
    info!("publisher detached from mount {mount}");
    Ok(())
}

/// Decode a `Transfer-Encoding: chunked` request body off `stream`, writing
/// each decoded chunk to `publisher` as it arrives. `seed` is leftover body
/// bytes already read alongside the request headers. Mirrors the encoder in
/// `server_loop::publish_once` in reverse: `{hex-size}\r\n<data>\r\n`,
/// terminated by a zero-size chunk.
async fn read_chunked_body(
    stream: &mut TcpStream,
    seed: Vec<u8>,
    publisher: &crate::source_service::PublisherHandle,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut buf = seed;
    let mut read_buf = [0u8; 4096];

    loop {
        let size_end = loop {
            if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
                break pos;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                n = stream.read(&mut read_buf) => {
                    let n = n?;
                    if n == 0 {
                        return Ok(());
                    }
                    buf.extend_from_slice(&read_buf[..n]);
                }
            }
        };
        let size_line = String::from_utf8_lossy(&buf[..size_end]);
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| NtripError::Protocol(format!("bad chunk size '{size_str}'")))?;
        buf.drain(..size_end + 2);

        if size == 0 {
            return Ok(());
        }

        while buf.len() < size + 2 {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                n = stream.read(&mut read_buf) => {
                    let n = n?;
                    if n == 0 {
                        return Err(NtripError::Protocol("connection closed mid-chunk".into()));
                    }
                    buf.extend_from_slice(&read_buf[..n]);
                }
            }
        }
        publisher.write(&buf[..size]).await?;
        buf.drain(..size + 2);
    }
}

async fn handle_v2_subscribe(
    service: Arc<SourceService>,
    mut stream: TcpStream,
    mount: &str,
    request: &Request,
    cancel: CancellationToken,
) -> Result<()> {
    let (user, password) = request.basic_auth();
    let mut subscriber = match service.subscriber(mount, &user, &password).await {
        Ok(s) => s,
        Err(NtripError::Auth) => return send_401(&mut stream).await,
        Err(e) => return Err(e),
    };

    stream
        .write_all(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Type: application/octet-stream\r\n\r\n",
        )
        .await?;
    stream.flush().await?;
    info!("subscriber attached to mount {mount}");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = subscriber.recv() => {
                match chunk {
                    Some(bytes) => {
                        let header = format!("{:X}\r\n", bytes.len());
                        if stream.write_all(header.as_bytes()).await.is_err() { break; }
                        if stream.write_all(&bytes).await.is_err() { break; }
                        if stream.write_all(b"\r\n").await.is_err() { break; }
                        if stream.flush().await.is_err() { break; }
                    }
                    None => break,
                }
            }
        }
    }
    subscriber.unsubscribe().await;
    info!("subscriber detached from mount {mount}");
    Ok(())
}

async fn send_401(stream: &mut TcpStream) -> Result<()> {
    stream
        .write_all(
            b"HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Basic realm=\"NTRIP Caster\"\r\nContent-Length: 0\r\n\r\n",
        )
        .await?;
    Ok(())
}

// ── NTRIP v1 ─────────────────────────────────────────────────────────────────

async fn handle_v1(
    service: Arc<SourceService>,
    mut stream: TcpStream,
    request: Request,
    cancel: CancellationToken,
) -> Result<()> {
    if request.method != "GET" {
        let _ = stream.write_all(b"ERROR - Bad Request\r\n").await;
        return Ok(());
    }

    let mount = mount_from_path(&request.path);
    if mount.is_empty() {
        let table = service.sourcetable().await;
        let body = format!("SOURCETABLE 200 OK\r\n\r\n{}", table.render());
        stream.write_all(body.as_bytes()).await?;
        return Ok(());
    }

    let (user, password) = request.basic_auth();
    let mut subscriber = match service.subscriber(mount, &user, &password).await {
        Ok(s) => s,
        Err(NtripError::Auth) => {
            stream
                .write_all(b"HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Basic realm=\"NTRIP Caster\"\r\n\r\n")
                .await?;
            return Ok(());
        }
        Err(NtripError::NotFound) => {
            // Per the NTRIP v1 contract, "not found" still returns the
            // sourcetable with a success status rather than an HTTP 404.
            let table = service.sourcetable().await;
            let body = format!("SOURCETABLE 200 OK\r\n\r\n{}", table.render());
            stream.write_all(body.as_bytes()).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    stream.write_all(b"ICY 200 OK\r\n").await?;
    stream.flush().await?;
    info!("v1 subscriber attached to mount {mount}");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = subscriber.recv() => {
                match chunk {
                    Some(bytes) => {
                        if stream.write_all(&bytes).await.is_err() { break; }
                        if stream.flush().await.is_err() { break; }
                    }
                    None => break,
                }
            }
        }
    }
    subscriber.unsubscribe().await;
    info!("v1 subscriber detached from mount {mount}");
    Ok(())
}
