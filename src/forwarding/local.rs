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

//! Local port forwarding.
//!
//! ```text
//! [Client] → [Local Listener] → [SSH Channel] → [Remote Host:Port]
//!              ↑ bind_address:local_port         ↑ remote_host:remote_port
//! ```
//!
//! Every accepted connection gets its own direct-tcpip channel and relay
//! task. The number of simultaneously relayed connections is bounded by a
//! semaphore.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::tunnel::{Tunnel, TunnelStats};
use super::{ForwardingHandle, ForwardingSpec, ForwardingStats};
use crate::error::Result;
use crate::transport::Transport;

pub struct LocalForwarder {
    id: Uuid,
    spec: ForwardingSpec,
    transport: Arc<dyn Transport>,
    cancel_token: CancellationToken,
    stats: Arc<ForwardingStats>,
}

impl LocalForwarder {
    /// Binds the listener and starts accepting connections in the background.
    pub async fn start(
        transport: Arc<dyn Transport>,
        spec: ForwardingSpec,
    ) -> Result<ForwardingHandle> {
        let bind_addr = SocketAddr::new(spec.bind_address, spec.local_port);
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "Local forwarding listening on {} → {}:{}",
            local_addr, spec.remote_host, spec.remote_port
        );

        let forwarder = Self {
            id: Uuid::new_v4(),
            spec,
            transport,
            cancel_token: CancellationToken::new(),
            stats: Arc::new(ForwardingStats::default()),
        };
        let id = forwarder.id;
        let cancel_token = forwarder.cancel_token.clone();
        let stats = Arc::clone(&forwarder.stats);
        let task = tokio::spawn(forwarder.run(listener));

        Ok(ForwardingHandle::new(id, local_addr, cancel_token, stats, task))
    }

    async fn run(self, listener: TcpListener) {
        let semaphore = Arc::new(Semaphore::new(self.spec.max_connections.max(1)));

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        trace!("Accepted connection from {}", peer_addr);
                        self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                        self.spawn_connection_handler(stream, peer_addr, Arc::clone(&semaphore));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        self.stats.connections_failed.fetch_add(1, Ordering::Relaxed);
                        sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = self.cancel_token.cancelled() => {
                    info!("Local forwarding {} cancelled, stopping listener", self.id);
                    break;
                }
            }
        }
    }

    fn spawn_connection_handler(
        &self,
        tcp_stream: TcpStream,
        peer_addr: SocketAddr,
        semaphore: Arc<Semaphore>,
    ) {
        let remote_host = self.spec.remote_host.clone();
        let remote_port = self.spec.remote_port;
        let transport = Arc::clone(&self.transport);
        let stats = Arc::clone(&self.stats);
        let cancel_token = self.cancel_token.child_token();

        tokio::spawn(async move {
            let _permit = tokio::select! {
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Failed to acquire connection permit for {}", peer_addr);
                        return;
                    }
                },
                _ = cancel_token.cancelled() => return,
            };

            stats.active_connections.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Handling connection from {} → {}:{}",
                peer_addr, remote_host, remote_port
            );

            let result = Self::handle_connection(
                tcp_stream,
                peer_addr,
                &remote_host,
                remote_port,
                transport.as_ref(),
                cancel_token,
            )
            .await;

            stats.active_connections.fetch_sub(1, Ordering::Relaxed);
            match result {
                Ok(tunnel_stats) => {
                    info!(
                        "Connection from {} completed: {} bytes transferred in {:?}",
                        peer_addr,
                        tunnel_stats.total_bytes(),
                        tunnel_stats.duration()
                    );
                    stats
                        .bytes_transferred
                        .fetch_add(tunnel_stats.total_bytes(), Ordering::Relaxed);
                }
                Err(e) => {
                    error!("Connection from {} failed: {}", peer_addr, e);
                    stats.connections_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    async fn handle_connection(
        tcp_stream: TcpStream,
        peer_addr: SocketAddr,
        remote_host: &str,
        remote_port: u16,
        transport: &dyn Transport,
        cancel_token: CancellationToken,
    ) -> Result<TunnelStats> {
        debug!("Creating SSH channel to {}:{}", remote_host, remote_port);
        let channel = transport
            .open_direct_tcpip(remote_host, remote_port, peer_addr)
            .await?;
        trace!("SSH channel created for connection from {}", peer_addr);

        Tunnel::run(tcp_stream, channel, cancel_token).await
    }
}
