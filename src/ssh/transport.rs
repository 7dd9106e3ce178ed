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

//! [`Transport`] implementation over a russh [`Client`].

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use super::tokio_client::{self, AuthMethod, Client, Config, ServerCheckMethod};
use crate::error::{Result, SessionError};
use crate::transport::{
    CommandChannel, CommandEvent, CommandRequest, DuplexStream, FileKind, RemoteEntry, RemoteFs,
    RemoteReader, RemoteWriter, TerminalSpec, Transport,
};

/// Who to log in as and how long to wait for it.
#[derive(Debug, Clone)]
pub struct Login {
    pub username: String,
    pub auth: AuthMethod,
    pub server_check: ServerCheckMethod,
    pub timeout: Duration,
    /// Idle time before a keepalive request; `None` or zero disables them.
    pub keep_alive_interval: Option<Duration>,
}

impl Login {
    pub fn client_config(&self) -> Config {
        Config {
            keepalive_interval: self.keep_alive_interval.filter(|d| !d.is_zero()),
            ..Default::default()
        }
    }

    fn timed_out(&self, host: &str, port: u16) -> SessionError {
        SessionError::ConnectTimeout {
            host: host.to_string(),
            port,
            timeout: self.timeout,
        }
    }
}

/// Transport backed by one authenticated russh connection.
#[derive(Debug, Clone)]
pub struct RusshTransport {
    client: Client,
}

impl RusshTransport {
    /// Connects and authenticates, giving up after `login.timeout`.
    pub async fn connect(host: &str, port: u16, login: Login) -> Result<Self> {
        tracing::debug!("Connecting to {}:{} as {}", host, port, login.username);
        let connect = Client::connect_with_config(
            (host, port),
            &login.username,
            login.auth.clone(),
            login.server_check.clone(),
            login.client_config(),
        );
        let client = tokio::time::timeout(login.timeout, connect)
            .await
            .map_err(|_| login.timed_out(host, port))??;
        tracing::info!("Connected to {}:{} as {}", host, port, login.username);
        Ok(Self { client })
    }

    /// Connects to `host:port` through a direct-tcpip channel of `jump`.
    pub async fn connect_via(
        jump: &dyn Transport,
        host: &str,
        port: u16,
        login: Login,
    ) -> Result<Self> {
        tracing::debug!("Opening tunnel to {}:{} through jump host", host, port);
        let originator = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let stream = tokio::time::timeout(
            login.timeout,
            jump.open_direct_tcpip(host, port, originator),
        )
        .await
        .map_err(|_| login.timed_out(host, port))??;

        // The name may only resolve on the far side of the jump host.
        let address = match tokio::net::lookup_host((host, port)).await {
            Ok(mut addrs) => addrs.next(),
            Err(_) => None,
        }
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));

        let connect = Client::connect_stream(
            stream,
            host,
            address,
            &login.username,
            login.auth.clone(),
            login.server_check.clone(),
            login.client_config(),
        );
        let client = tokio::time::timeout(login.timeout, connect)
            .await
            .map_err(|_| login.timed_out(host, port))??;
        tracing::info!(
            "Connected to {}:{} as {} through jump host",
            host,
            port,
            login.username
        );
        Ok(Self { client })
    }

    /// Banner `host:port` sends before authentication, without logging in.
    pub async fn pre_login_banner(host: &str, port: u16, timeout: Duration) -> Result<Option<String>> {
        let request = Client::pre_login_banner((host, port), Config::default());
        let banner = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| SessionError::ConnectTimeout {
                host: host.to_string(),
                port,
                timeout,
            })??;
        Ok(banner)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn open_shell(&self, terminal: &TerminalSpec) -> Result<Box<dyn DuplexStream>> {
        let channel = self
            .client
            .open_pty_shell(&terminal.term_type, terminal.width, terminal.height)
            .await?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn open_command(&self, request: &CommandRequest) -> Result<Box<dyn CommandChannel>> {
        let pty = request
            .pty
            .as_ref()
            .map(|t| (t.term_type.as_str(), t.width, t.height));
        let channel = self
            .client
            .open_command_channel(
                &request.command,
                pty,
                request.forward_agent,
                request.subsystem,
            )
            .await?;
        Ok(Box::new(RusshCommandChannel { channel }))
    }

    async fn open_sftp(&self) -> Result<Arc<dyn RemoteFs>> {
        let session = self.client.open_sftp_session().await?;
        Ok(Arc::new(SftpFs { session }))
    }

    async fn open_exec_stream(&self, command: &str) -> Result<Box<dyn DuplexStream>> {
        let channel = self.client.get_channel().await?;
        channel
            .exec(true, command)
            .await
            .map_err(tokio_client::Error::from)?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
        originator: SocketAddr,
    ) -> Result<Box<dyn DuplexStream>> {
        let channel = self
            .client
            .open_direct_tcpip_channel(host, port, originator)
            .await?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn disconnect(&self) -> Result<()> {
        if self.client.is_closed() {
            return Ok(());
        }
        self.client.disconnect().await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    fn banner(&self) -> Option<String> {
        self.client.banner().map(str::to_string)
    }
}

struct RusshCommandChannel {
    channel: Channel<Msg>,
}

#[async_trait]
impl CommandChannel for RusshCommandChannel {
    async fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        self.channel
            .data(data)
            .await
            .map_err(tokio_client::Error::from)?;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<CommandEvent>> {
        // The exit status may arrive before the last data packet, so only
        // the end of the message stream terminates the command.
        while let Some(msg) = self.channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => return Ok(Some(CommandEvent::Stdout(data.to_vec()))),
                ChannelMsg::ExtendedData { data, ext } if ext == 1 => {
                    return Ok(Some(CommandEvent::Stderr(data.to_vec())))
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    return Ok(Some(CommandEvent::ExitStatus(exit_status)))
                }
                other => tracing::trace!("Ignoring channel message: {:?}", other),
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        self.channel
            .close()
            .await
            .map_err(tokio_client::Error::from)?;
        Ok(())
    }
}

struct SftpFs {
    session: SftpSession,
}

fn entry_from_attributes(name: String, attrs: &FileAttributes) -> RemoteEntry {
    let kind = if attrs.is_dir() {
        FileKind::Directory
    } else if attrs.is_regular() {
        FileKind::File
    } else {
        FileKind::Other
    };
    RemoteEntry {
        name,
        kind,
        size: attrs.size.unwrap_or(0),
        mode: attrs.permissions.map(|p| p & 0o7777),
        mtime: attrs.mtime,
        atime: attrs.atime,
    }
}

fn basename(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

fn is_missing(error: &SftpError) -> bool {
    matches!(error, SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile)
}

#[async_trait]
impl RemoteFs for SftpFs {
    async fn stat(&self, path: &str) -> Result<Option<RemoteEntry>> {
        match self.session.metadata(path).await {
            Ok(attrs) => Ok(Some(entry_from_attributes(basename(path), &attrs))),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        for entry in self.session.read_dir(path).await? {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let attrs = entry.metadata();
            if attrs.is_symlink() {
                let target = format!("{}/{}", path.trim_end_matches('/'), name);
                match self.stat(&target).await? {
                    Some(resolved) => entries.push(RemoteEntry { name, ..resolved }),
                    None => entries.push(RemoteEntry {
                        kind: FileKind::Other,
                        ..entry_from_attributes(name, &attrs)
                    }),
                }
            } else {
                entries.push(entry_from_attributes(name, &attrs));
            }
        }
        Ok(entries)
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader> {
        let file = self.session.open(path).await?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter> {
        let file = self.session.create(path).await?;
        Ok(Box::new(file))
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let mut attrs = FileAttributes::empty();
        attrs.permissions = Some(mode);
        self.session.set_metadata(path, attrs).await?;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.session.create_dir(path).await?;
        Ok(())
    }

    async fn canonicalize(&self, path: &str) -> Result<String> {
        Ok(self.session.canonicalize(path).await?)
    }
}
