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

//! Background command execution with LIFO start/read pairing.
//!
//! Every `start` opens its own channel and pushes it on a stack; every
//! `read` pops the most recently started command and collects its output.

use std::time::Duration;
use tokio::time::Instant;

use crate::encoding::{EncodingErrors, TextEncoding};
use crate::error::{Result, SessionError};
use crate::security::{contains_sudo_failure, SudoPassword};
use crate::transport::{CommandChannel, CommandEvent, CommandRequest, TerminalSpec, Transport};

/// How a command is started.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub sudo: bool,
    /// Written to sudo's stdin; implies `sudo`.
    pub sudo_password: Option<SudoPassword>,
    /// Treat the command text as a subsystem name.
    pub invoke_subsystem: bool,
    pub forward_agent: bool,
}

/// How output is collected.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// No limit when unset.
    pub timeout: Option<Duration>,
    /// Log output chunks as they arrive.
    pub stream_during_execution: bool,
    /// Log the partial output when the timeout fires.
    pub stream_on_timeout: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: u32,
}

/// A started command whose output has not been read yet.
pub struct StartedCommand {
    command: String,
    channel: Box<dyn CommandChannel>,
    sudo: bool,
}

impl StartedCommand {
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl std::fmt::Debug for StartedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartedCommand")
            .field("command", &self.command)
            .field("sudo", &self.sudo)
            .finish()
    }
}

/// Builds the command line actually executed for `command`.
pub fn command_line(command: &str, options: &StartOptions) -> String {
    if options.sudo_password.is_some() {
        format!("sudo --stdin --prompt \"\" {command}")
    } else if options.sudo {
        format!("sudo {command}")
    } else {
        command.to_string()
    }
}

#[derive(Debug, Default)]
pub struct CommandRunner {
    started: Vec<StartedCommand>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of started commands not read yet.
    pub fn pending(&self) -> usize {
        self.started.len()
    }

    pub async fn start(
        &mut self,
        transport: &dyn Transport,
        command: &str,
        terminal: &TerminalSpec,
        options: StartOptions,
    ) -> Result<()> {
        let sudo = options.sudo || options.sudo_password.is_some();
        let request = CommandRequest {
            command: command_line(command, &options),
            // sudo needs a terminal to prompt on
            pty: sudo.then(|| terminal.clone()),
            forward_agent: options.forward_agent,
            subsystem: options.invoke_subsystem,
        };
        tracing::debug!(
            command = %command,
            sudo,
            subsystem = options.invoke_subsystem,
            "Starting command"
        );

        let mut channel = transport.open_command(&request).await?;
        if let Some(password) = &options.sudo_password {
            channel.write_stdin(&password.with_newline()).await?;
        }

        self.started.push(StartedCommand {
            command: command.to_string(),
            channel,
            sudo,
        });
        Ok(())
    }

    /// Collects the output of the most recently started command.
    pub async fn read(
        &mut self,
        options: &ReadOptions,
        encoding: TextEncoding,
        errors: EncodingErrors,
    ) -> Result<CommandOutput> {
        let mut started = self.started.pop().ok_or(SessionError::NoStartedCommand)?;
        let deadline = options.timeout.map(|t| Instant::now() + t);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        loop {
            let event = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, started.channel.next_event()).await {
                        Ok(event) => event?,
                        Err(_) => {
                            return Err(Self::timed_out(
                                started, options, &stdout, &stderr, encoding, errors,
                            )
                            .await)
                        }
                    }
                }
                None => started.channel.next_event().await?,
            };

            match event {
                Some(CommandEvent::Stdout(data)) => {
                    if options.stream_during_execution {
                        tracing::info!("{}", String::from_utf8_lossy(&data).trim_end());
                    }
                    stdout.extend_from_slice(&data);
                }
                Some(CommandEvent::Stderr(data)) => {
                    if options.stream_during_execution {
                        tracing::info!("{}", String::from_utf8_lossy(&data).trim_end());
                    }
                    stderr.extend_from_slice(&data);
                }
                Some(CommandEvent::ExitStatus(code)) => exit_code = Some(code),
                None => break,
            }
        }

        let exit_code = exit_code.unwrap_or_else(|| {
            tracing::debug!(
                "Command '{}' reported no exit status, assuming 0",
                started.command
            );
            0
        });

        let output = CommandOutput {
            stdout: strip_trailing_newline(encoding.decode(&stdout, errors)?),
            stderr: strip_trailing_newline(encoding.decode(&stderr, errors)?),
            exit_code,
        };
        if started.sudo && contains_sudo_failure(&output.stdout) {
            tracing::warn!("sudo rejected the password for '{}'", started.command);
        }
        tracing::debug!(
            command = %started.command,
            exit_code,
            "Command finished"
        );
        Ok(output)
    }

    async fn timed_out(
        mut started: StartedCommand,
        options: &ReadOptions,
        stdout: &[u8],
        stderr: &[u8],
        encoding: TextEncoding,
        errors: EncodingErrors,
    ) -> SessionError {
        if let Err(e) = started.channel.close().await {
            tracing::debug!("Failed to close timed out channel: {}", e);
        }
        let lossy = errors != EncodingErrors::Strict;
        let decode = |bytes: &[u8]| match encoding.decode(bytes, errors) {
            Ok(text) => text,
            Err(_) if !lossy => String::from_utf8_lossy(bytes).into_owned(),
            Err(_) => String::new(),
        };
        let stdout = decode(stdout);
        let stderr = decode(stderr);
        if options.stream_on_timeout {
            tracing::info!(
                "Command '{}' timed out, output so far:\n{}{}",
                started.command,
                stdout,
                stderr
            );
        }
        SessionError::CommandTimeout {
            command: started.command,
            timeout: options.timeout.unwrap_or_default(),
            stdout,
            stderr,
        }
    }

    /// Closes every unread command channel.
    pub async fn close_all(&mut self) {
        for mut started in self.started.drain(..) {
            if let Err(e) = started.channel.close().await {
                tracing::debug!("Failed to close channel of '{}': {}", started.command, e);
            }
        }
    }
}

fn strip_trailing_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}
