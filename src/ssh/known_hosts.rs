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

use super::tokio_client::ServerCheckMethod;
use crate::error::SessionError;
use directories::BaseDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Get the default known_hosts file path
pub fn get_default_known_hosts_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
}

/// Host-key policy applied when a session connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrictHostKeyChecking {
    /// Unknown or changed keys are rejected
    Yes,
    /// Any key is accepted
    No,
    /// Known keys are verified, hosts missing from known_hosts are accepted
    #[default]
    AcceptNew,
}

impl FromStr for StrictHostKeyChecking {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yes" | "true" => Ok(Self::Yes),
            "no" | "false" => Ok(Self::No),
            "accept-new" | "tofu" => Ok(Self::AcceptNew),
            other => Err(SessionError::configuration(format!(
                "Invalid host key checking mode '{other}'. Expected yes, no or accept-new."
            ))),
        }
    }
}

/// Create a ServerCheckMethod for the given policy.
///
/// `known_hosts` overrides the default `~/.ssh/known_hosts` location.
pub fn get_check_method(
    strict_mode: StrictHostKeyChecking,
    known_hosts: Option<&Path>,
) -> ServerCheckMethod {
    let path = known_hosts
        .map(Path::to_path_buf)
        .or_else(get_default_known_hosts_path);

    match (strict_mode, path) {
        (StrictHostKeyChecking::No, _) => {
            tracing::debug!("Host key checking disabled");
            ServerCheckMethod::NoCheck
        }
        (StrictHostKeyChecking::Yes, Some(path)) => {
            tracing::debug!("Using known_hosts file: {:?} (strict mode)", path);
            ServerCheckMethod::KnownHostsFile(path.to_string_lossy().into_owned())
        }
        (StrictHostKeyChecking::Yes, None) => {
            tracing::warn!("Could not determine known_hosts path, falling back to default lookup");
            ServerCheckMethod::DefaultKnownHostsFile
        }
        (StrictHostKeyChecking::AcceptNew, Some(path)) if path.exists() => {
            tracing::debug!("Using known_hosts file: {:?} (accept-new mode)", path);
            ServerCheckMethod::KnownHostsFile(path.to_string_lossy().into_owned())
        }
        (StrictHostKeyChecking::AcceptNew, _) => {
            tracing::info!("No known_hosts file, accepting new host key");
            ServerCheckMethod::NoCheck
        }
    }
}
