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

//! Error types shared by every session component.

use std::time::Duration;
use thiserror::Error;

use crate::ssh::tokio_client;

/// Convenience alias used across the library.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by sessions, shells, commands, transfers and tunnels.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// A required setting is missing or a value could not be parsed.
    #[error("{0}")]
    Configuration(String),

    /// A shell read did not observe the expected text before the deadline.
    #[error(
        "No match found for '{expected}' in {}\nOutput:\n{output}.",
        format_timeout(.timeout)
    )]
    Timeout {
        expected: String,
        timeout: Duration,
        output: String,
    },

    /// `write_until_expected` ran out of attempts. The output read while
    /// retrying is kept but not part of the message.
    #[error("No match found for '{expected}' in {}.", format_timeout(.timeout))]
    NoMatch {
        expected: String,
        timeout: Duration,
        output: String,
    },

    /// A started command did not finish before the read deadline.
    #[error(
        "Command '{command}' did not finish in {}\nOutput:\n{stdout}{stderr}",
        format_timeout(.timeout)
    )]
    CommandTimeout {
        command: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("Non-existing index or alias '{0}'.")]
    NotFound(String),

    #[error("No open connection.")]
    NoCurrentSession,

    #[error("No started commands to read output from.")]
    NoStartedCommand,

    #[error("It is not possible to transfer multiple files to the single file '{destination}'.")]
    AmbiguousDestination { destination: String },

    #[error("There are no source files matching '{pattern}'.")]
    NoSourceMatch { pattern: String },

    #[error("{what} '{path}' does not exist.")]
    PathNotFound { what: &'static str, path: String },

    #[error("{0}")]
    CapabilityUnsupported(String),

    /// Authentication was rejected by the remote side.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Connection to {host}:{port} timed out after {}", format_timeout(.timeout))]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("Could not decode remote output as {encoding}: {reason}")]
    Decode {
        encoding: &'static str,
        reason: String,
    },

    #[error("SCP transfer failed: {0}")]
    Scp(String),

    #[error("Invalid regular expression '{pattern}': {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("SSH connection error: {0}")]
    Connection(tokio_client::Error),

    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True for both shell and command timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::NoMatch { .. } | Self::CommandTimeout { .. }
        )
    }

    /// Output accumulated before a timeout, if this is one.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            Self::Timeout { output, .. } | Self::NoMatch { output, .. } => Some(output),
            Self::CommandTimeout { stdout, .. } => Some(stdout),
            _ => None,
        }
    }
}

impl From<tokio_client::Error> for SessionError {
    fn from(error: tokio_client::Error) -> Self {
        use tokio_client::Error as E;
        match error {
            E::PasswordWrong
            | E::KeyAuthFailed
            | E::KeyInvalid(_)
            | E::AgentConnectionFailed
            | E::AgentNoIdentities
            | E::AgentRequestIdentitiesFailed
            | E::AgentAuthenticationFailed => Self::AuthenticationFailed(error.to_string()),
            E::SftpError(e) => Self::Sftp(e),
            E::IoError(e) => Self::Io(e),
            other => Self::Connection(other),
        }
    }
}

/// Renders a duration the way timeouts appear in error messages, e.g. `3 seconds`.
pub fn format_timeout(timeout: &Duration) -> String {
    let millis = timeout.as_millis();
    if millis % 1000 != 0 {
        let secs = timeout.as_secs_f64();
        return format!("{secs} seconds");
    }
    let secs = timeout.as_secs();
    let (hours, rem) = (secs / 3600, secs % 3600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    let mut parts = Vec::new();
    for (value, unit) in [(hours, "hour"), (minutes, "minute"), (seconds, "second")] {
        if value > 0 {
            let plural = if value == 1 { "" } else { "s" };
            parts.push(format!("{value} {unit}{plural}"));
        }
    }
    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(" ")
    }
}
