//! Rover/RTK coordinator: ties the NTRIP client (C8), the RTCM3 framer (C2),
//! and a serial NMEA source (C1/C3) together into two concurrent tasks plus
//! a polled position getter.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::RwLock;

use crate::bytestream::ByteStream;
use crate::error::Result;
use crate::nmea::{self, GgaData};
use crate::ntrip_client::NtripSession;
use crate::rtcm::Framer;
use crate::supervisor::CancellationToken;

const SERIAL_READ_CHUNK: usize = 4096;
const ROLLING_BUFFER_CAP: usize = 16 * 1024;

/// Periodic status snapshot, readable from outside the coordinator's tasks
/// at any time.
#[derive(Debug, Clone, Default)]
pub struct RoverStats {
    pub solutions: u64,
    pub fix_ratio: f64,
    pub last_fix: Option<GgaData>,
    pub downlink_bytes: u64,
    pub uplink_count: u64,
}

impl RoverStats {
    fn record_frame(&mut self, payload_len: usize) {
        self.solutions += 1;
        self.downlink_bytes += payload_len as u64;
        self.fix_ratio = (self.solutions as f64 / 100.0).min(1.0);
    }
}

/// Shared rover state: the rolling NMEA buffer (owned by whichever task last
/// read the serial source) and the stats snapshot.
struct RoverState {
    stats: RwLock<RoverStats>,
    buffer: RwLock<Vec<u8>>,
}

/// Coordinates the rover's downlink (RTCM from caster) and uplink (GGA to
/// caster) tasks against a single GNSS serial source.
pub struct Rover {
    state: Arc<RoverState>,
}

impl Rover {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RoverState {
                stats: RwLock::new(RoverStats::default()),
                buffer: RwLock::new(Vec::new()),
            }),
        }
    }

    pub async fn stats(&self) -> RoverStats {
        self.state.stats.read().await.clone()
    }

    /// Spawn the RTCM downlink task: reads from `session`, frames bytes via
    /// the C2 framer, and updates stats on every successful frame.
    pub fn spawn_downlink(
        &self,
        mut session: NtripSession,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut framer = Framer::new();
            let mut buf = [0u8; 4096];
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                let n = tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = session.read(&mut buf) => result,
                };
                match n {
                    Ok(0) => {
                        warn!("rtcm downlink: caster closed the connection");
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                            _ = cancel.cancelled() => return,
                        }
                    }
                    Ok(n) => {
                        for frame in framer.feed(&buf[..n]) {
                            let mut stats = state.stats.write().await;
                            stats.record_frame(frame.payload.len());
                        }
                    }
                    Err(e) => {
                        warn!("rtcm downlink read error: {e}");
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                            _ = cancel.cancelled() => return,
                        }
                    }
                }
            }
        })
    }

    /// Spawn the GGA uplink task: every `interval`, scan the rolling serial
    /// buffer for a GGA line and push it back through `session`.
    pub fn spawn_uplink(
        &self,
        mut serial: Box<dyn ByteStream>,
        mut session: NtripSession,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let state = self.state.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }

                let mut chunk = vec![0u8; SERIAL_READ_CHUNK];
                let n = match tokio::io::AsyncReadExt::read(&mut serial, &mut chunk).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("gga uplink: serial read error: {e}");
                        continue;
                    }
                };
                if n == 0 {
                    continue;
                }
                chunk.truncate(n);
                push_rolling(&state.buffer, &chunk).await;

                let buffer = state.buffer.read().await;
                let text = String::from_utf8_lossy(&buffer);
                let gga_line = nmea::find_sentences(&text)
                    .filter(|s| s.to_ascii_uppercase().contains("GGA"))
                    .last()
                    .map(str::to_string);
                drop(buffer);

                let Some(line) = gga_line else {
                    // No serial data containing a GGA sentence has arrived
                    // yet; skip this uplink tick silently.
                    continue;
                };
                let mut framed = line;
                framed.push_str("\r\n");
                if let Err(e) = session.write(framed.as_bytes()).await {
                    warn!("gga uplink write failed: {e}");
                    continue;
                }
                let mut stats = state.stats.write().await;
                stats.uplink_count += 1;
            }
        })
    }

    /// Read up to 4 KiB from `serial`, fold it into the rolling buffer, and
    /// return the last complete GGA fix found. Preserves the previously
    /// returned fix if no complete sentence is available — position is
    /// never reset to (0, 0).
    pub async fn get_solution(&self, serial: &mut dyn ByteStream) -> Result<Option<GgaData>> {
        let mut chunk = vec![0u8; SERIAL_READ_CHUNK];
        let n = tokio::io::AsyncReadExt::read(serial, &mut chunk).await?;
        if n > 0 {
            chunk.truncate(n);
            push_rolling(&self.state.buffer, &chunk).await;
        }

        let buffer = self.state.buffer.read().await;
        let text = String::from_utf8_lossy(&buffer);
        let last_gga = nmea::find_sentences(&text)
            .filter(|s| s.to_ascii_uppercase().contains("GGA"))
            .last()
            .map(str::to_string);
        drop(buffer);

        let Some(line) = last_gga else {
            return Ok(self.state.stats.read().await.last_fix.clone());
        };

        match nmea::parse_gga(&line) {
            Ok(fix) => {
                let mut stats = self.state.stats.write().await;
                stats.last_fix = Some(fix.clone());
                Ok(Some(fix))
            }
            Err(e) => {
                debug!("get_solution: GGA parse failed, keeping last fix: {e}");
                Ok(self.state.stats.read().await.last_fix.clone())
            }
        }
    }
}

impl Default for Rover {
    fn default() -> Self {
        Self::new()
    }
}

/// Append `chunk` to the rolling buffer, dropping oldest bytes so it never
/// exceeds [`ROLLING_BUFFER_CAP`].
async fn push_rolling(buffer: &RwLock<Vec<u8>>, chunk: &[u8]) {
    let mut buf = buffer.write().await;
    buf.extend_from_slice(chunk);
    if buf.len() > ROLLING_BUFFER_CAP {
        let excess = buf.len() - ROLLING_BUFFER_CAP;
        buf.drain(..excess);
    }
}
