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

//! `[user@]host[:port]` jump host specifications.
//!
//! The tunnel itself is opened by [`crate::Session::connect_via`]; this module
//! only turns the command line form into its parts.

use std::fmt;
use std::str::FromStr;

use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JumpHost {
    /// `None` means the destination's user.
    pub user: Option<String>,
    pub host: String,
    /// `None` means port 22.
    pub port: Option<u16>,
}

impl JumpHost {
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(22)
    }
}

impl fmt::Display for JumpHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

impl FromStr for JumpHost {
    type Err = SessionError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        let invalid = |reason: &str| {
            SessionError::configuration(format!("Invalid jump host '{spec}': {reason}."))
        };
        if spec.is_empty() {
            return Err(invalid("empty specification"));
        }

        let (user, host_port) = match spec.split_once('@') {
            Some(("", _)) => return Err(invalid("empty user name")),
            Some((user, rest)) => (Some(user.to_string()), rest),
            None => (None, spec),
        };
        let (host, port) =
            parse_host_port(host_port).map_err(|reason| invalid(reason.as_str()))?;
        if host.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(invalid("bad characters in host name"));
        }
        Ok(Self { user, host, port })
    }
}

/// Splits `host[:port]`, accepting `[ipv6]` and `[ipv6]:port`.
fn parse_host_port(host_port: &str) -> Result<(String, Option<u16>), String> {
    if host_port.is_empty() {
        return Err("empty host".to_string());
    }

    if let Some(bracketed) = host_port.strip_prefix('[') {
        let (address, rest) = bracketed
            .split_once(']')
            .ok_or_else(|| "unclosed bracket in IPv6 address".to_string())?;
        if address.is_empty() {
            return Err("empty IPv6 address".to_string());
        }
        return match rest {
            "" => Ok((address.to_string(), None)),
            _ => match rest.strip_prefix(':') {
                Some(port) => Ok((address.to_string(), Some(parse_port(port)?))),
                None => Err(format!("unexpected '{rest}' after IPv6 address")),
            },
        };
    }

    match host_port.rsplit_once(':') {
        Some(("", _)) => Err("empty host".to_string()),
        // more than one colon without brackets: a bare IPv6 address
        Some((host, _)) if host.contains(':') => Ok((host_port.to_string(), None)),
        Some((host, port)) => Ok((host.to_string(), Some(parse_port(port)?))),
        None => Ok((host_port.to_string(), None)),
    }
}

fn parse_port(port: &str) -> Result<u16, String> {
    match port.parse::<u16>() {
        Ok(0) => Err("port cannot be zero".to_string()),
        Ok(port) => Ok(port),
        Err(_) => Err(format!("invalid port '{port}'")),
    }
}
