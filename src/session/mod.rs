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

//! One remote connection and the sub-clients opened on it.
//!
//! The shell, SFTP and SCP sub-clients are created on first use and cached.
//! Commands and tunnels open their own channels on the shared transport.

mod registry;

pub use registry::SessionRegistry;

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::command::{CommandOutput, CommandRunner, ReadOptions, StartOptions};
use crate::config::{Newline, SessionConfig};
use crate::encoding::{EncodingErrors, TextEncoding};
use crate::error::Result;
use crate::forwarding::{ForwardingHandle, ForwardingSpec, LocalForwarder};
use crate::shell::{InteractiveShell, ShellSettings};
use crate::ssh::tokio_client::{AuthMethod, ServerCheckMethod};
use crate::ssh::{Login, RusshTransport};
use crate::transfer::{GetOptions, PutOptions, TransferClients, TransferEngine, TransferUnit};
use crate::transport::{TerminalSpec, Transport};

/// How a session authenticates.
pub type Credentials = AuthMethod;

/// Lower bound for the connect timeout.
pub const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to open a connection besides the session settings.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub user: String,
    pub credentials: Credentials,
    pub server_check: ServerCheckMethod,
    /// Defaults to the session timeout, but never less than 10 seconds.
    pub connect_timeout: Option<Duration>,
    /// Idle time before a keepalive request; zero disables them.
    pub keep_alive_interval: Duration,
}

impl ConnectOptions {
    pub fn new(user: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            user: user.into(),
            credentials,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
            connect_timeout: None,
            keep_alive_interval: Duration::ZERO,
        }
    }

    pub fn with_server_check(mut self, server_check: ServerCheckMethod) -> Self {
        self.server_check = server_check;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    fn effective_timeout(&self, config: &SessionConfig) -> Duration {
        self.connect_timeout
            .unwrap_or_else(|| config.timeout.max(MIN_CONNECT_TIMEOUT))
    }

    fn into_login(self, config: &SessionConfig) -> (String, Login) {
        let timeout = self.effective_timeout(config);
        let login = Login {
            username: self.user.clone(),
            auth: self.credentials,
            server_check: self.server_check,
            timeout,
            keep_alive_interval: Some(self.keep_alive_interval),
        };
        (self.user, login)
    }
}

pub struct Session {
    index: usize,
    config: SessionConfig,
    user: String,
    transport: Arc<dyn Transport>,
    shell: Option<InteractiveShell>,
    transfers: TransferClients,
    commands: CommandRunner,
    forwarding: Option<ForwardingHandle>,
}

impl Session {
    /// Connects and authenticates to `config.host:config.port`.
    pub async fn connect(config: SessionConfig, options: ConnectOptions) -> Result<Self> {
        let (user, login) = options.into_login(&config);
        let transport = RusshTransport::connect(&config.host, config.port, login).await?;
        Ok(Self::with_transport(config, user, Arc::new(transport)))
    }

    /// Connects to `config.host:config.port` through a tunnel opened on
    /// `jump`, the transport of an already authenticated session.
    ///
    /// The new session stops working once the jump session is closed.
    pub async fn connect_via(
        config: SessionConfig,
        options: ConnectOptions,
        jump: Arc<dyn Transport>,
    ) -> Result<Self> {
        let (user, login) = options.into_login(&config);
        let transport =
            RusshTransport::connect_via(jump.as_ref(), &config.host, config.port, login).await?;
        Ok(Self::with_transport(config, user, Arc::new(transport)))
    }

    /// Banner `host:port` sends before authentication, read without logging in.
    pub async fn pre_login_banner(host: &str, port: u16) -> Result<Option<String>> {
        RusshTransport::pre_login_banner(host, port, MIN_CONNECT_TIMEOUT).await
    }

    /// Wraps an already authenticated transport.
    pub fn with_transport(
        config: SessionConfig,
        user: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            index: 0,
            config,
            user: user.into(),
            transport,
            shell: None,
            transfers: TransferClients::new(),
            commands: CommandRunner::new(),
            forwarding: None,
        }
    }

    /// Registry index, `0` until registered.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn assign_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn alias(&self) -> Option<&str> {
        self.config.alias.as_deref()
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Changes apply to the shell on its next operation.
    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Banner the server sent before this session authenticated.
    pub fn banner(&self) -> Option<String> {
        self.transport.banner()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo::from_session(self)
    }

    /// The interactive shell, opened on first use.
    pub async fn shell(&mut self) -> Result<&mut InteractiveShell> {
        let settings = ShellSettings::from(&self.config);
        let shell = match self.shell.take() {
            Some(shell) => shell,
            None => {
                tracing::debug!(
                    "Opening shell on {} ({} {}x{})",
                    self.config.host,
                    self.config.terminal.term_type,
                    self.config.terminal.width,
                    self.config.terminal.height
                );
                let stream = self.transport.open_shell(&self.config.terminal).await?;
                InteractiveShell::new(stream, settings.clone())
            }
        };
        let shell = self.shell.insert(shell);
        shell.set_settings(settings);
        Ok(shell)
    }

    pub fn has_shell(&self) -> bool {
        self.shell.is_some()
    }

    pub async fn start_command(&mut self, command: &str, options: StartOptions) -> Result<()> {
        self.commands
            .start(
                self.transport.as_ref(),
                command,
                &self.config.terminal,
                options,
            )
            .await
    }

    /// Output of the most recently started command.
    pub async fn read_command_output(&mut self, options: &ReadOptions) -> Result<CommandOutput> {
        self.commands
            .read(options, self.config.encoding, self.config.encoding_errors)
            .await
    }

    /// Starts `command` and waits for its output.
    pub async fn execute_command(
        &mut self,
        command: &str,
        start: StartOptions,
        read: &ReadOptions,
    ) -> Result<CommandOutput> {
        self.start_command(command, start).await?;
        self.read_command_output(read).await
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.pending()
    }

    /// File transfer operations using this session's path separator.
    pub fn transfers(&mut self) -> TransferEngine<'_> {
        TransferEngine::new(
            &self.transport,
            &mut self.transfers,
            self.config.path_separator,
        )
    }

    pub async fn put_file(
        &mut self,
        source: &str,
        destination: &str,
        options: &PutOptions,
    ) -> Result<Vec<TransferUnit>> {
        self.transfers()
            .put_file(source, destination, options)
            .await
    }

    pub async fn put_directory(
        &mut self,
        source: &str,
        destination: &str,
        options: &PutOptions,
    ) -> Result<Vec<TransferUnit>> {
        self.transfers()
            .put_directory(source, destination, options)
            .await
    }

    pub async fn get_file(
        &mut self,
        source: &str,
        destination: &str,
        options: &GetOptions,
    ) -> Result<Vec<TransferUnit>> {
        self.transfers()
            .get_file(source, destination, options)
            .await
    }

    pub async fn get_directory(
        &mut self,
        source: &str,
        destination: &str,
        options: &GetOptions,
    ) -> Result<Vec<TransferUnit>> {
        self.transfers()
            .get_directory(source, destination, options)
            .await
    }

    /// Forwards `bind_address:local_port` to `remote_host:remote_port`
    /// through this session, replacing any forwarding already running.
    ///
    /// Returns the bound address; `local_port` 0 picks a free port.
    pub async fn start_port_forwarding(
        &mut self,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
        bind_address: Option<IpAddr>,
    ) -> Result<SocketAddr> {
        self.stop_port_forwarding().await;

        let mut spec = ForwardingSpec::new(local_port, remote_host, remote_port);
        if let Some(bind_address) = bind_address {
            spec = spec.with_bind_address(bind_address);
        }
        let handle = LocalForwarder::start(Arc::clone(&self.transport), spec).await?;
        let local_addr = handle.local_addr();
        self.forwarding = Some(handle);
        Ok(local_addr)
    }

    pub fn forwarding(&self) -> Option<&ForwardingHandle> {
        self.forwarding.as_ref()
    }

    pub async fn stop_port_forwarding(&mut self) {
        if let Some(mut handle) = self.forwarding.take() {
            handle.stop().await;
        }
    }

    /// Stops forwarding, drops every sub-client and disconnects.
    pub async fn close(&mut self) -> Result<()> {
        tracing::info!(
            "Closing session {} to {}:{}",
            self.index,
            self.config.host,
            self.config.port
        );
        self.stop_port_forwarding().await;
        self.commands.close_all().await;
        if let Some(shell) = self.shell.take() {
            shell.close().await;
        }
        self.transfers.reset();
        self.transport.disconnect().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("index", &self.index)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("alias", &self.config.alias)
            .field("user", &self.user)
            .field("shell", &self.shell.is_some())
            .field("transfers", &self.transfers)
            .field("pending_commands", &self.commands.pending())
            .field("forwarding", &self.forwarding.is_some())
            .finish()
    }
}

/// Snapshot of a session's settings.
///
/// The default value, with index 0 and an empty host, stands in when no
/// session is current.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionInfo {
    pub index: usize,
    pub alias: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub timeout: Duration,
    pub newline: Newline,
    /// As configured, `REGEXP:` prefix included.
    pub prompt: Option<String>,
    pub terminal: TerminalSpec,
    pub path_separator: char,
    pub encoding: TextEncoding,
    pub encoding_errors: EncodingErrors,
    pub escape_ansi: bool,
}

impl SessionInfo {
    fn from_session(session: &Session) -> Self {
        let config = &session.config;
        Self {
            index: session.index,
            alias: config.alias.clone(),
            host: config.host.clone(),
            port: config.port,
            user: session.user.clone(),
            timeout: config.timeout,
            newline: config.newline.clone(),
            prompt: config.prompt.as_ref().map(|p| p.display()),
            terminal: config.terminal.clone(),
            path_separator: config.path_separator,
            encoding: config.encoding,
            encoding_errors: config.encoding_errors,
            escape_ansi: config.escape_ansi,
        }
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "index={}", self.index)?;
        writeln!(f, "host={}", self.host)?;
        writeln!(f, "alias={}", self.alias.as_deref().unwrap_or("None"))?;
        writeln!(f, "port={}", self.port)?;
        writeln!(f, "user={}", self.user)?;
        writeln!(
            f,
            "timeout={}",
            crate::error::format_timeout(&self.timeout)
        )?;
        writeln!(f, "newline={}", self.newline)?;
        writeln!(f, "prompt={}", self.prompt.as_deref().unwrap_or("None"))?;
        writeln!(f, "term_type={}", self.terminal.term_type)?;
        writeln!(f, "width={}", self.terminal.width)?;
        writeln!(f, "height={}", self.terminal.height)?;
        writeln!(f, "path_separator={}", self.path_separator)?;
        writeln!(f, "encoding={}", self.encoding)?;
        write!(f, "escape_ansi={}", self.escape_ansi)
    }
}
