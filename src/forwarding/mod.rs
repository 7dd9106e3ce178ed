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

//! Local TCP port forwarding over a session's transport.
//!
//! The listener and every relay run as background tasks sharing one
//! cancellation token, so shell, command and transfer operations on the same
//! session are never blocked by forwarded traffic.

pub mod local;
pub mod tunnel;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use local::LocalForwarder;
pub use tunnel::{Tunnel, TunnelStats};

/// Default limit of simultaneously relayed connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// What to forward: `bind_address:local_port` to `remote_host:remote_port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingSpec {
    pub bind_address: IpAddr,
    /// `0` binds an ephemeral port.
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub max_connections: usize,
}

impl ForwardingSpec {
    /// Listens on loopback only; use [`Self::with_bind_address`] for other interfaces.
    pub fn new(local_port: u16, remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            local_port,
            remote_host: remote_host.into(),
            remote_port,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = bind_address;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }
}

impl fmt::Display for ForwardingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} → {}:{}",
            self.bind_address, self.local_port, self.remote_host, self.remote_port
        )
    }
}

/// Counters shared by a listener and its relays.
#[derive(Debug, Default)]
pub struct ForwardingStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub connections_failed: AtomicU64,
    pub bytes_transferred: AtomicU64,
}

impl ForwardingStats {
    pub fn accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.connections_failed.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }
}

/// A running forwarder. Dropping the handle cancels it.
#[derive(Debug)]
pub struct ForwardingHandle {
    id: Uuid,
    local_addr: SocketAddr,
    cancel_token: CancellationToken,
    stats: Arc<ForwardingStats>,
    task: Option<JoinHandle<()>>,
}

impl ForwardingHandle {
    fn new(
        id: Uuid,
        local_addr: SocketAddr,
        cancel_token: CancellationToken,
        stats: Arc<ForwardingStats>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            local_addr,
            cancel_token,
            stats,
            task: Some(task),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The address actually bound, with the real port when `0` was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &ForwardingStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the listener and every in-flight relay.
    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Forwarding task {} ended abnormally: {}", self.id, e);
            }
        }
        tracing::info!(
            "Forwarding {} on {} stopped: {} connections, {} bytes",
            self.id,
            self.local_addr,
            self.stats.accepted(),
            self.stats.bytes()
        );
    }
}

impl Drop for ForwardingHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
