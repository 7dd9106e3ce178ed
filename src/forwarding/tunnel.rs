// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bidirectional relay between a local TCP socket and an SSH channel.
//!
//! One loop polls both directions and the cancellation token; the relay ends
//! as soon as either side closes, errors, or the token fires.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::transport::DuplexStream;

/// Relay buffer size per direction.
pub const BUFFER_SIZE: usize = 8192;

/// Byte counters of one relayed connection.
#[derive(Debug, Clone)]
pub struct TunnelStats {
    pub bytes_local_to_remote: Arc<AtomicU64>,
    pub bytes_remote_to_local: Arc<AtomicU64>,
    pub started_at: Instant,
    pub error_count: Arc<AtomicU64>,
}

impl Default for TunnelStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelStats {
    pub fn new() -> Self {
        Self {
            bytes_local_to_remote: Arc::new(AtomicU64::new(0)),
            bytes_remote_to_local: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
            error_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_local_to_remote.load(Ordering::Relaxed)
            + self.bytes_remote_to_local.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn errors(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

pub struct Tunnel;

impl Tunnel {
    /// Relays bytes until either side closes or `cancel_token` fires.
    pub async fn run(
        mut tcp_stream: TcpStream,
        channel: Box<dyn DuplexStream>,
        cancel_token: CancellationToken,
    ) -> Result<TunnelStats> {
        let stats = TunnelStats::new();
        let (mut channel_rx, mut channel_tx) = tokio::io::split(channel);
        let (mut tcp_rx, mut tcp_tx) = tcp_stream.split();
        let mut local_buffer = vec![0u8; BUFFER_SIZE];
        let mut remote_buffer = vec![0u8; BUFFER_SIZE];

        debug!("Starting bidirectional tunnel");

        let outcome: Result<()> = loop {
            tokio::select! {
                result = tcp_rx.read(&mut local_buffer) => match result {
                    Ok(0) => {
                        trace!("TCP socket closed, ending tunnel");
                        break Ok(());
                    }
                    Ok(n) => {
                        if let Err(e) = channel_tx.write_all(&local_buffer[..n]).await {
                            stats.error_count.fetch_add(1, Ordering::Relaxed);
                            break Err(e.into());
                        }
                        let total = stats.bytes_local_to_remote.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
                        trace!("Forwarded {} bytes TCP→SSH (total: {})", n, total);
                    }
                    Err(e) if is_disconnect(e.kind()) => {
                        trace!("TCP connection closed: {}", e);
                        break Ok(());
                    }
                    Err(e) => {
                        stats.error_count.fetch_add(1, Ordering::Relaxed);
                        break Err(e.into());
                    }
                },
                result = channel_rx.read(&mut remote_buffer) => match result {
                    Ok(0) => {
                        trace!("SSH channel EOF");
                        break Ok(());
                    }
                    Ok(n) => {
                        match tcp_tx.write_all(&remote_buffer[..n]).await {
                            Ok(()) => {
                                let total = stats.bytes_remote_to_local.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
                                trace!("Forwarded {} bytes SSH→TCP (total: {})", n, total);
                            }
                            Err(e) if is_disconnect(e.kind()) => {
                                trace!("TCP connection closed: {}", e);
                                break Ok(());
                            }
                            Err(e) => {
                                stats.error_count.fetch_add(1, Ordering::Relaxed);
                                break Err(e.into());
                            }
                        }
                    }
                    Err(e) => {
                        stats.error_count.fetch_add(1, Ordering::Relaxed);
                        break Err(e.into());
                    }
                },
                _ = cancel_token.cancelled() => {
                    trace!("Tunnel cancelled");
                    break Ok(());
                }
            }
        };

        if let Err(e) = channel_tx.shutdown().await {
            warn!("Failed to send EOF to SSH channel: {}", e);
        }
        if let Err(e) = tcp_tx.shutdown().await {
            trace!("Failed to shut down TCP socket: {}", e);
        }

        debug!(
            "Tunnel completed: {} bytes L→R, {} bytes R→L, {} errors, duration: {:?}",
            stats.bytes_local_to_remote.load(Ordering::Relaxed),
            stats.bytes_remote_to_local.load(Ordering::Relaxed),
            stats.errors(),
            stats.duration()
        );

        outcome.map(|()| stats)
    }
}
