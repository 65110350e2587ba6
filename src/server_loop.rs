//! Server publisher loop: a long-lived, reconnecting chunked-POST producer
//! that pushes bytes from a [`DataSource`] up to a caster mount.
//!
//! Connect, run until error or cancellation, sleep, repeat. Cancellation
//! short-circuits the sleep so shutdown is prompt.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::bytestream::DataSource;
use crate::error::{NtripError, Result};
use crate::supervisor::{CancellationToken, RECONNECT_DELAY};

#[derive(Debug, Clone)]
pub struct ServerTarget {
    pub host: String,
    pub port: u16,
    pub mount: String,
    pub user: String,
    pub password: String,
}

/// Run the publisher loop until `cancel` fires. Never returns an error —
/// connection failures are logged and retried; only cancellation ends the
/// loop.
pub async fn run(target: ServerTarget, source: DataSource, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            info!("server publisher loop for {} stopping", target.mount);
            return;
        }
        match publish_once(&target, &source, &cancel).await {
            Ok(()) => info!("server publisher session for {} ended cleanly", target.mount),
            Err(e) => error!("server publisher session for {} failed: {e}", target.mount),
        }
        if cancel.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

pub(crate) async fn publish_once(target: &ServerTarget, source: &DataSource, cancel: &CancellationToken) -> Result<()> {
    let mut stream = TcpStream::connect((target.host.as_str(), target.port)).await?;

    let mut request = format!(
        "POST /{} HTTP/1.1\r\n\
         Host: {}:{}\r\n\
         Ntrip-Version: Ntrip/2.0\r\n\
         User-Agent: NTRIP ntrip-core\r\n\
         Content-Type: application/octet-stream\r\n\
         Transfer-Encoding: chunked\r\n",
        target.mount, target.host, target.port
    );
    if !target.user.is_empty() {
        let token = BASE64.encode(format!("{}:{}", target.user, target.password));
        request.push_str(&format!("Authorization: Basic {token}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let status = read_status_line(&mut stream).await?;
    if !status.contains("200") {
        return Err(NtripError::Protocol(format!("caster rejected publish: {status}")));
    }
    info!("connected to caster {}:{} for mount {}", target.host, target.port, target.mount);

    let mut source_handle = source.open().await?;
    let (mut reader_half, mut writer_half) = stream.into_split();

    let drain = tokio::spawn(async move {
        let mut sink = [0u8; 4096];
        loop {
            match reader_half.read(&mut sink).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("server loop response read error: {e}");
                    break;
                }
            }
        }
    });

    let mut buf = [0u8; 4096];
    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            n = source_handle.read(&mut buf) => {
                match n {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        let chunk_header = format!("{:X}\r\n", n);
                        if let Err(e) = writer_half.write_all(chunk_header.as_bytes()).await {
                            break Err(NtripError::Io(e));
                        }
                        if let Err(e) = writer_half.write_all(&buf[..n]).await {
                            break Err(NtripError::Io(e));
                        }
                        if let Err(e) = writer_half.write_all(b"\r\n").await {
                            break Err(NtripError::Io(e));
                        }
                        if let Err(e) = writer_half.flush().await {
                            break Err(NtripError::Io(e));
                        }
                    }
                    Err(e) => break Err(NtripError::Io(e)),
                }
            }
        }
    };
    let _ = writer_half.write_all(b"0\r\n\r\n").await;
    drain.abort();
    result
}

async fn read_status_line(stream: &mut TcpStream) -> Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            return Ok(String::from_utf8_lossy(&buf[..pos]).to_string());
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(NtripError::Protocol("caster closed before status line".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > 4096 {
            return Err(NtripError::Protocol("status line too long".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reconnects_on_refused_connection_until_cancelled() {
        let target = ServerTarget {
            host: "127.0.0.1".into(),
            port: 1, // nothing listens on port 1
            mount: "TEST".into(),
            user: String::new(),
            password: String::new(),
        };
        let cancel = CancellationToken::new();
        let source = DataSource::File(std::env::temp_dir().join("does-not-exist-ntrip-core"));
        let token = cancel.clone();
        let handle = tokio::spawn(run(target, source, token));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("loop should stop promptly after cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn publishes_file_contents_as_chunks() {
        let path = std::env::temp_dir().join("ntrip_core_server_loop_test.bin");
        tokio::fs::write(&path, b"\xD3\x00\x03\xAA\xBB\xCC").await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            let req = String::from_utf8_lossy(&buf[..n]);
            assert!(req.contains("POST /EX HTTP/1.1"));
            sock.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
            let mut body = Vec::new();
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&buf[..n]);
                if body.windows(5).any(|w| w == b"0\r\n\r\n") {
                    break;
                }
            }
            assert!(body.windows(3).any(|w| w == [0xD3, 0x00, 0x03]));
        });

        let target = ServerTarget {
            host: "127.0.0.1".into(),
            port: addr.port(),
            mount: "EX".into(),
            user: String::new(),
            password: String::new(),
        };
        let cancel = CancellationToken::new();
        let source = DataSource::File(path.clone());
        publish_once(&target, &source, &cancel).await.unwrap();
        server.await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;
    }
}
