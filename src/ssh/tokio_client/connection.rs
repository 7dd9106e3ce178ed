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

//! SSH connection establishment.
//!
//! Resolves the target, performs the handshake against each resolved address
//! until one succeeds, then authenticates. A handle whose authentication
//! fails is disconnected before the error is returned.

use once_cell::sync::OnceCell;
use russh::client::{Config, Handle, Handler};
use std::net::SocketAddr;
use std::sync::Arc;
use std::{fmt::Debug, io};
use tokio::io::{AsyncRead, AsyncWrite};

use super::authentication::{AuthMethod, ServerCheckMethod};
use super::ToSocketAddrsWithHostname;

/// User name offered when only the pre-login banner is wanted.
const BANNER_USER: &str = "bad-username";

/// An authenticated ssh connection to a remote server.
#[derive(Clone)]
pub struct Client {
    pub(super) connection_handle: Arc<Handle<ClientHandler>>,
    pub(super) username: String,
    pub(super) address: SocketAddr,
    banner: Arc<OnceCell<String>>,
}

impl Client {
    /// Open a ssh connection to a remote host with the default russh config.
    pub async fn connect(
        addr: impl ToSocketAddrsWithHostname,
        username: &str,
        auth: AuthMethod,
        server_check: ServerCheckMethod,
    ) -> Result<Self, super::Error> {
        Self::connect_with_config(addr, username, auth, server_check, Config::default()).await
    }

    /// Same as `connect`, but with a caller supplied [`russh::client::Config`].
    pub async fn connect_with_config(
        addr: impl ToSocketAddrsWithHostname,
        username: &str,
        auth: AuthMethod,
        server_check: ServerCheckMethod,
        config: Config,
    ) -> Result<Self, super::Error> {
        let (address, handle, banner) = handshake(&addr, server_check, config).await?;
        Self::authenticated(handle, address, username, auth, banner).await
    }

    /// Runs the SSH protocol over an already open stream, typically a
    /// direct-tcpip channel of another connection.
    ///
    /// `address` is only used for the known_hosts lookup and for display.
    pub async fn connect_stream<S>(
        stream: S,
        hostname: &str,
        address: SocketAddr,
        username: &str,
        auth: AuthMethod,
        server_check: ServerCheckMethod,
        config: Config,
    ) -> Result<Self, super::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handler = ClientHandler::new(hostname.to_string(), address, server_check);
        let banner = Arc::clone(&handler.banner);
        tracing::debug!("Connecting to {} ({}) over tunnel", hostname, address);
        let handle = russh::client::connect_stream(Arc::new(config), stream, handler).await?;
        Self::authenticated(handle, address, username, auth, banner).await
    }

    /// Performs the handshake and a `none` authentication attempt, then
    /// returns whatever banner the server sent before authentication.
    pub async fn pre_login_banner(
        addr: impl ToSocketAddrsWithHostname,
        config: Config,
    ) -> Result<Option<String>, super::Error> {
        let (address, mut handle, banner) =
            handshake(&addr, ServerCheckMethod::NoCheck, config).await?;
        if let Err(e) = handle.authenticate_none(BANNER_USER).await {
            tracing::debug!("Banner request to {} ended with: {}", address, e);
        }
        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
        {
            tracing::debug!("Failed to close banner transport: {}", e);
        }
        Ok(banner.get().cloned())
    }

    async fn authenticated(
        mut handle: Handle<ClientHandler>,
        address: SocketAddr,
        username: &str,
        auth: AuthMethod,
        banner: Arc<OnceCell<String>>,
    ) -> Result<Self, super::Error> {
        let username = username.to_string();

        if let Err(e) = super::authentication::authenticate(&mut handle, &username, auth).await {
            tracing::debug!("Authentication to {} failed, closing transport", address);
            if let Err(close_err) = handle
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await
            {
                tracing::warn!("Failed to close unauthenticated transport: {}", close_err);
            }
            return Err(e);
        }

        Ok(Self {
            connection_handle: Arc::new(handle),
            username,
            address,
            banner,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn address(&self) -> &SocketAddr {
        &self.address
    }

    /// Banner the server sent before authentication, if any.
    pub fn banner(&self) -> Option<&str> {
        self.banner.get().map(String::as_str)
    }

    /// Disconnect from the remote host.
    pub async fn disconnect(&self) -> Result<(), super::Error> {
        self.connection_handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
            .map_err(super::Error::SshError)
    }

    pub fn is_closed(&self) -> bool {
        self.connection_handle.is_closed()
    }
}

/// Tries each resolved address until a handshake succeeds.
async fn handshake(
    addr: &impl ToSocketAddrsWithHostname,
    server_check: ServerCheckMethod,
    config: Config,
) -> Result<(SocketAddr, Handle<ClientHandler>, Arc<OnceCell<String>>), super::Error> {
    let config = Arc::new(config);

    let socket_addrs = addr
        .to_socket_addrs()
        .map_err(super::Error::AddressInvalid)?;
    let mut connect_res = Err(super::Error::AddressInvalid(io::Error::new(
        io::ErrorKind::InvalidInput,
        "could not resolve to any addresses",
    )));
    for socket_addr in socket_addrs {
        let handler = ClientHandler::new(addr.hostname(), socket_addr, server_check.clone());
        let banner = Arc::clone(&handler.banner);
        tracing::debug!("Connecting to {} ({})", addr.hostname(), socket_addr);
        match russh::client::connect(config.clone(), socket_addr, handler).await {
            Ok(h) => {
                connect_res = Ok((socket_addr, h, banner));
                break;
            }
            Err(e) => connect_res = Err(e),
        }
    }
    connect_res
}

impl Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("username", &self.username)
            .field("address", &self.address)
            .field("connection_handle", &"Handle<ClientHandler>")
            .finish()
    }
}

/// SSH client handler for managing server key verification.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    hostname: String,
    host: SocketAddr,
    server_check: ServerCheckMethod,
    banner: Arc<OnceCell<String>>,
}

impl ClientHandler {
    fn new(hostname: String, host: SocketAddr, server_check: ServerCheckMethod) -> Self {
        Self {
            hostname,
            host,
            server_check,
            banner: Arc::new(OnceCell::new()),
        }
    }
}

impl Handler for ClientHandler {
    type Error = super::Error;

    async fn auth_banner(
        &mut self,
        banner: &str,
        _session: &mut russh::client::Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Received banner from {}", self.hostname);
        let _ = self.banner.set(banner.to_string());
        Ok(())
    }

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.server_check {
            ServerCheckMethod::NoCheck => Ok(true),
            ServerCheckMethod::PublicKey(key) => {
                let pk = russh::keys::parse_public_key_base64(key)
                    .map_err(|_| super::Error::ServerCheckFailed)?;

                Ok(pk == *server_public_key)
            }
            ServerCheckMethod::KnownHostsFile(known_hosts_path) => {
                russh::keys::check_known_hosts_path(
                    &self.hostname,
                    self.host.port(),
                    server_public_key,
                    known_hosts_path,
                )
                .map_err(|_| super::Error::ServerCheckFailed)
            }
            ServerCheckMethod::DefaultKnownHostsFile => russh::keys::check_known_hosts(
                &self.hostname,
                self.host.port(),
                server_public_key,
            )
            .map_err(|_| super::Error::ServerCheckFailed),
        }
    }
}
