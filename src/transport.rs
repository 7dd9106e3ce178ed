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

//! Boundary between session orchestration and the SSH protocol provider.
//!
//! Everything above this module (shells, commands, transfers, tunnels) talks
//! to a [`Transport`]; the russh-backed implementation lives in
//! [`crate::ssh::RusshTransport`].

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A bidirectional byte stream over an SSH channel.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

pub type RemoteReader = Box<dyn AsyncRead + Unpin + Send>;
pub type RemoteWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Pseudo-terminal parameters for the interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSpec {
    pub term_type: String,
    pub width: u32,
    pub height: u32,
}

impl Default for TerminalSpec {
    fn default() -> Self {
        Self {
            term_type: "vt100".to_string(),
            width: 80,
            height: 24,
        }
    }
}

/// What to run on a freshly opened command channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandRequest {
    /// Command line, or the subsystem name when `subsystem` is set.
    pub command: String,
    pub pty: Option<TerminalSpec>,
    pub forward_agent: bool,
    pub subsystem: bool,
}

/// Events produced by a running remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(u32),
}

/// A channel executing one command.
#[async_trait]
pub trait CommandChannel: Send {
    async fn write_stdin(&mut self, data: &[u8]) -> Result<()>;

    /// Next event from the channel, `None` once the channel is closed.
    async fn next_event(&mut self) -> Result<Option<CommandEvent>>;

    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Other,
}

/// Metadata about a remote path. Symlinks are resolved to their target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    pub mode: Option<u32>,
    pub mtime: Option<u32>,
    pub atime: Option<u32>,
}

impl RemoteEntry {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// Remote filesystem operations backed by SFTP.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Follows symlinks; `Ok(None)` when the path does not exist.
    async fn stat(&self, path: &str) -> Result<Option<RemoteEntry>>;

    /// Entries of a directory, without `.` and `..`.
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    async fn open_read(&self, path: &str) -> Result<RemoteReader>;

    /// Creates or truncates the file for writing.
    async fn create(&self, path: &str) -> Result<RemoteWriter>;

    async fn chmod(&self, path: &str, mode: u32) -> Result<()>;

    async fn mkdir(&self, path: &str) -> Result<()>;

    async fn canonicalize(&self, path: &str) -> Result<String>;
}

/// One authenticated connection and the channels it can open.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a PTY-backed login shell.
    async fn open_shell(&self, terminal: &TerminalSpec) -> Result<Box<dyn DuplexStream>>;

    async fn open_command(&self, request: &CommandRequest) -> Result<Box<dyn CommandChannel>>;

    async fn open_sftp(&self) -> Result<Arc<dyn RemoteFs>>;

    /// Executes `command` and exposes its stdin/stdout as one stream.
    async fn open_exec_stream(&self, command: &str) -> Result<Box<dyn DuplexStream>>;

    async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
        originator: SocketAddr,
    ) -> Result<Box<dyn DuplexStream>>;

    async fn disconnect(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Banner the server sent before authentication.
    fn banner(&self) -> Option<String>;
}
