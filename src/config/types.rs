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

//! Per-session settings and the value types they are built from.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::encoding::{EncodingErrors, TextEncoding};
use crate::error::SessionError;
use crate::transport::TerminalSpec;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Default bound for blocking shell reads.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Prefix marking a prompt as a regular expression.
pub const REGEXP_PREFIX: &str = "REGEXP:";

/// Line terminator written after shell input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Newline(String);

impl Newline {
    pub fn lf() -> Self {
        Self("\n".to_string())
    }

    pub fn crlf() -> Self {
        Self("\r\n".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Default for Newline {
    fn default() -> Self {
        Self::lf()
    }
}

/// `LF`, `CR` and `CRLF` (any case) name the usual terminators; anything
/// else is taken literally.
impl FromStr for Newline {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SessionError::configuration("Newline cannot be empty."));
        }
        let upper = s.to_uppercase();
        let value = match upper.as_str() {
            "LF" => "\n".to_string(),
            "CR" => "\r".to_string(),
            "CRLF" => "\r\n".to_string(),
            _ => s.to_string(),
        };
        Ok(Self(value))
    }
}

impl fmt::Display for Newline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_str() {
            "\n" => f.write_str("LF"),
            "\r" => f.write_str("CR"),
            "\r\n" => f.write_str("CRLF"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Text marking the end of a unit of shell output.
#[derive(Debug, Clone)]
pub enum Prompt {
    Literal(String),
    Regex(Regex),
}

impl Prompt {
    /// The prompt as configured, including the `REGEXP:` prefix for regexes.
    pub fn display(&self) -> String {
        match self {
            Self::Literal(text) => text.clone(),
            Self::Regex(re) => format!("{REGEXP_PREFIX}{}", re.as_str()),
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Self::Regex(_))
    }
}

impl PartialEq for Prompt {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Regex(a), Self::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl FromStr for Prompt {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(REGEXP_PREFIX) {
            Some(pattern) => {
                let re = Regex::new(pattern).map_err(|source| SessionError::Regex {
                    pattern: pattern.to_string(),
                    source,
                })?;
                Ok(Self::Regex(re))
            }
            None => Ok(Self::Literal(s.to_string())),
        }
    }
}

/// Settings for one connection.
///
/// The registry keeps a default instance; each new session starts from a
/// copy and may override any field, before or after connecting.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub alias: Option<String>,
    pub timeout: Duration,
    pub newline: Newline,
    pub prompt: Option<Prompt>,
    pub terminal: TerminalSpec,
    /// Separator used by the remote machine's paths.
    pub path_separator: char,
    pub encoding: TextEncoding,
    pub encoding_errors: EncodingErrors,
    /// Strip ANSI escape sequences from shell output.
    pub escape_ansi: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            alias: None,
            timeout: DEFAULT_TIMEOUT,
            newline: Newline::default(),
            prompt: None,
            terminal: TerminalSpec::default(),
            path_separator: '/',
            encoding: TextEncoding::default(),
            encoding_errors: EncodingErrors::default(),
            escape_ansi: false,
        }
    }
}

impl SessionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_newline(mut self, newline: Newline) -> Self {
        self.newline = newline;
        self
    }

    pub fn with_path_separator(mut self, separator: char) -> Self {
        self.path_separator = separator;
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding, errors: EncodingErrors) -> Self {
        self.encoding = encoding;
        self.encoding_errors = errors;
        self
    }

    pub fn with_escape_ansi(mut self, escape_ansi: bool) -> Self {
        self.escape_ansi = escape_ansi;
        self
    }
}
