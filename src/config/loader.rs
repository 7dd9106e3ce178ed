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

//! YAML configuration file: shared defaults plus named connections.
//!
//! ```yaml
//! defaults:
//!   timeout: 10
//!   prompt: "REGEXP:[$#] $"
//! connections:
//!   web:
//!     host: web01.example.com
//!     user: deploy
//!     identity: ~/.ssh/id_ed25519
//!     newline: CRLF
//! ```

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use super::types::SessionConfig;
use crate::error::SessionError;

/// Setting overrides; every field is optional.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct SettingsOverride {
    /// Seconds, fractions allowed.
    pub timeout: Option<f64>,
    pub newline: Option<String>,
    pub prompt: Option<String>,
    pub term_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub path_separator: Option<char>,
    pub encoding: Option<String>,
    pub encoding_errors: Option<String>,
    pub escape_ansi: Option<bool>,
}

impl SettingsOverride {
    /// Applies every set field onto `config`.
    pub fn apply(&self, config: &mut SessionConfig) -> Result<(), SessionError> {
        if let Some(timeout) = self.timeout {
            config.timeout = Duration::try_from_secs_f64(timeout).map_err(|_| {
                SessionError::configuration(format!("Invalid timeout '{timeout}'."))
            })?;
        }
        if let Some(newline) = &self.newline {
            config.newline = newline.parse()?;
        }
        if let Some(prompt) = &self.prompt {
            config.prompt = Some(prompt.parse()?);
        }
        if let Some(term_type) = &self.term_type {
            config.terminal.term_type = term_type.clone();
        }
        if let Some(width) = self.width {
            config.terminal.width = width;
        }
        if let Some(height) = self.height {
            config.terminal.height = height;
        }
        if let Some(separator) = self.path_separator {
            config.path_separator = separator;
        }
        if let Some(encoding) = &self.encoding {
            config.encoding = encoding.parse()?;
        }
        if let Some(errors) = &self.encoding_errors {
            config.encoding_errors = errors.parse()?;
        }
        if let Some(escape_ansi) = self.escape_ansi {
            config.escape_ansi = escape_ansi;
        }
        Ok(())
    }
}

/// A named connection in the configuration file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ConnectionEntry {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    /// Private key file.
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(flatten)]
    pub settings: SettingsOverride,
}

/// Connection parameters resolved from the file for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConnection {
    pub config: SessionConfig,
    pub user: Option<String>,
    pub identity: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub defaults: SettingsOverride,
    #[serde(default)]
    pub connections: HashMap<String, ConnectionEntry>,
}

impl FileConfig {
    /// `$XDG_CONFIG_HOME/sshdeck/config.yaml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "sshdeck").map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Load configuration from a file; a missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_tilde(path);

        if !expanded_path.exists() {
            tracing::debug!(
                "Config file not found at {:?}, using defaults",
                expanded_path
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&expanded_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to read configuration file at {}",
                    expanded_path.display()
                )
            })?;

        Self::parse(&content).with_context(|| {
            format!(
                "Failed to parse YAML configuration file at {}",
                expanded_path.display()
            )
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: FileConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Session defaults with the file's `defaults` block applied.
    pub fn default_session_config(&self) -> Result<SessionConfig, SessionError> {
        let mut config = SessionConfig::default();
        self.defaults.apply(&mut config)?;
        Ok(config)
    }

    /// Resolves `target` as a named connection, falling back to a bare host.
    ///
    /// Named connections get the alias of their name.
    pub fn resolve(&self, target: &str) -> Result<ResolvedConnection, SessionError> {
        let mut config = self.default_session_config()?;
        let Some(entry) = self.connections.get(target) else {
            config.host = target.to_string();
            return Ok(ResolvedConnection {
                config,
                user: None,
                identity: None,
            });
        };

        config.host = entry.host.clone();
        config.alias = Some(target.to_string());
        if let Some(port) = entry.port {
            config.port = port;
        }
        entry.settings.apply(&mut config)?;
        Ok(ResolvedConnection {
            config,
            user: entry.user.clone(),
            identity: entry
                .identity
                .as_deref()
                .map(|p| expand_tilde(Path::new(p))),
        })
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    path.to_path_buf()
}
