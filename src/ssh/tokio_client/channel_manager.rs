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

//! Channel factories on an authenticated [`Client`].
//!
//! This module provides methods for:
//! - PTY-backed interactive shells
//! - Command channels (exec, subsystem, sudo with PTY)
//! - SFTP sessions
//! - `direct-tcpip` channels for port forwarding

use russh::client::Msg;
use russh::Channel;
use russh_sftp::client::SftpSession;
use std::net::SocketAddr;

use super::connection::Client;

impl Client {
    /// Get a new session channel.
    pub async fn get_channel(&self) -> Result<Channel<Msg>, super::Error> {
        self.connection_handle
            .channel_open_session()
            .await
            .map_err(super::Error::SshError)
    }

    /// Open a channel with a PTY of the given size and start a login shell on it.
    pub async fn open_pty_shell(
        &self,
        term_type: &str,
        width: u32,
        height: u32,
    ) -> Result<Channel<Msg>, super::Error> {
        let channel = self.get_channel().await?;
        channel
            .request_pty(false, term_type, width, height, 0, 0, &[])
            .await?;
        channel.request_shell(true).await?;
        tracing::debug!(
            "Opened shell on {} ({} {}x{})",
            self.address,
            term_type,
            width,
            height
        );
        Ok(channel)
    }

    /// Open a channel and start `command` on it.
    ///
    /// With `pty` set a pseudo-terminal is requested first, which sudo needs
    /// to prompt. With `subsystem` set, `command` names the subsystem to start.
    pub async fn open_command_channel(
        &self,
        command: &str,
        pty: Option<(&str, u32, u32)>,
        forward_agent: bool,
        subsystem: bool,
    ) -> Result<Channel<Msg>, super::Error> {
        let channel = self.get_channel().await?;
        if let Some((term_type, width, height)) = pty {
            channel
                .request_pty(false, term_type, width, height, 0, 0, &[])
                .await?;
        }
        if forward_agent {
            channel.agent_forward(false).await?;
        }
        if subsystem {
            channel.request_subsystem(true, command).await?;
        } else {
            channel.exec(true, command).await?;
        }
        Ok(channel)
    }

    /// Open a `direct-tcpip` channel to `host:port` as seen from the server.
    pub async fn open_direct_tcpip_channel(
        &self,
        host: &str,
        port: u16,
        originator: SocketAddr,
    ) -> Result<Channel<Msg>, super::Error> {
        self.connection_handle
            .channel_open_direct_tcpip(
                host,
                port.into(),
                originator.ip().to_string(),
                originator.port().into(),
            )
            .await
            .map_err(super::Error::SshError)
    }

    /// Start the `sftp` subsystem and wrap it in an SFTP session.
    ///
    /// Some sshd_config does not enable sftp by default; a line like
    /// `Subsystem sftp internal-sftp` is needed on the remote machine.
    pub async fn open_sftp_session(&self) -> Result<SftpSession, super::Error> {
        let channel = self.get_channel().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }
}
