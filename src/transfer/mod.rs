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

//! File and directory transfers over SFTP and SCP.
//!
//! [`ScpMode`] picks the backend per call:
//! - `Off`: SFTP for listing and data
//! - `Transfer`: SFTP for listing, SCP for each file's bytes
//! - `All`: SCP only, with the source handed to the remote side as given
//!
//! Remote paths in returned [`TransferUnit`]s are absolute, except under
//! `All` where no listing is available and paths are reported as given.

pub mod newline;
pub mod path_resolver;
pub mod scp;
mod sftp;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Newline;
use crate::error::{Result, SessionError};
use crate::transport::{FileKind, RemoteEntry, RemoteFs, Transport};
use path_resolver as paths;
use scp::{shell_quote, ScpClient};

pub use sftp::CHUNK_SIZE;

/// Mode given to newly created remote files when none is requested.
pub const DEFAULT_FILE_MODE: u32 = 0o744;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScpMode {
    #[default]
    Off,
    Transfer,
    All,
}

impl FromStr for ScpMode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "OFF" => Ok(Self::Off),
            "TRANSFER" => Ok(Self::Transfer),
            "ALL" => Ok(Self::All),
            _ => Err(SessionError::configuration(format!(
                "Invalid scp mode '{s}'. Expected OFF, TRANSFER or ALL."
            ))),
        }
    }
}

impl fmt::Display for ScpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "OFF",
            Self::Transfer => "TRANSFER",
            Self::All => "ALL",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Applied to new files (default [`DEFAULT_FILE_MODE`]) and, when given,
    /// to existing ones.
    pub mode: Option<u32>,
    /// Line terminator to rewrite uploaded text to. SFTP data path only.
    pub newline: Option<Newline>,
    pub scp: ScpMode,
    /// SCP backends only.
    pub preserve_times: bool,
    pub recursive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub scp: ScpMode,
    pub preserve_times: bool,
    pub recursive: bool,
}

/// One transferred file (or created empty directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferUnit {
    pub source: String,
    pub destination: String,
    pub mode: Option<u32>,
    pub newline: Option<Newline>,
    pub preserve_times: bool,
}

/// Which entries a directory listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    All,
    Files,
    Directories,
}

impl ListFilter {
    fn accepts(&self, entry: &RemoteEntry) -> bool {
        match self {
            Self::All => true,
            Self::Files => entry.kind == FileKind::File,
            Self::Directories => entry.kind == FileKind::Directory,
        }
    }
}

/// Lazily created transfer sub-clients of one session.
#[derive(Default)]
pub struct TransferClients {
    sftp: Option<Arc<dyn RemoteFs>>,
    scp: Option<ScpClient>,
    home: Option<String>,
}

impl TransferClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every sub-client; they are recreated on next use.
    pub fn reset(&mut self) {
        self.sftp = None;
        self.scp = None;
        self.home = None;
    }
}

impl fmt::Debug for TransferClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferClients")
            .field("sftp", &self.sftp.is_some())
            .field("scp", &self.scp.is_some())
            .field("home", &self.home)
            .finish()
    }
}

type BoxedTask<'b> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'b>>;

/// Transfer operations against one session's transport.
pub struct TransferEngine<'a> {
    transport: &'a Arc<dyn Transport>,
    clients: &'a mut TransferClients,
    separator: char,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        transport: &'a Arc<dyn Transport>,
        clients: &'a mut TransferClients,
        separator: char,
    ) -> Self {
        Self {
            transport,
            clients,
            separator,
        }
    }

    async fn sftp(&mut self) -> Result<Arc<dyn RemoteFs>> {
        if let Some(fs) = &self.clients.sftp {
            return Ok(Arc::clone(fs));
        }
        tracing::debug!("Opening SFTP sub-client");
        let fs = self.transport.open_sftp().await?;
        self.clients.sftp = Some(Arc::clone(&fs));
        Ok(fs)
    }

    async fn home(&mut self) -> Result<String> {
        if let Some(home) = &self.clients.home {
            return Ok(home.clone());
        }
        let home = self.sftp().await?.canonicalize(".").await?;
        tracing::debug!("Remote home directory is {}", home);
        self.clients.home = Some(home.clone());
        Ok(home)
    }

    fn scp(&mut self) -> ScpClient {
        let transport = self.transport;
        self.clients
            .scp
            .get_or_insert_with(|| ScpClient::new(Arc::clone(transport)))
            .clone()
    }

    async fn absolute(&mut self, path: &str) -> Result<String> {
        let home = self.home().await?;
        Ok(paths::absolutize_remote(path, &home, self.separator))
    }

    /// Uploads the local file(s) matching `source`.
    pub async fn put_file(
        &mut self,
        source: &str,
        destination: &str,
        options: &PutOptions,
    ) -> Result<Vec<TransferUnit>> {
        let sources = paths::expand_local_sources(source)?;
        if options.scp == ScpMode::All {
            return self.put_all_over_scp(&sources, destination, options).await;
        }

        let fs = self.sftp().await?;
        let destination = match destination {
            "" | "." => {
                let home = self.home().await?;
                format!(
                    "{}{}",
                    paths::trim_trailing_separator(&home, self.separator),
                    self.separator
                )
            }
            other => self.absolute(other).await?,
        };
        let destination_is_dir = is_dir(fs.as_ref(), &destination).await?;
        let (targets, remote_dir) = paths::resolve_put_destinations(
            &sources,
            &destination,
            self.separator,
            destination_is_dir,
        )?;
        if !remote_dir.is_empty() {
            sftp::create_missing_dirs(fs.as_ref(), &remote_dir, self.separator).await?;
        }

        let mut units = Vec::with_capacity(targets.len());
        for (local, remote) in sources.iter().zip(targets) {
            units.push(self.put_one(&fs, local, &remote, options).await?);
        }
        Ok(units)
    }

    async fn put_one(
        &mut self,
        fs: &Arc<dyn RemoteFs>,
        local: &Path,
        remote: &str,
        options: &PutOptions,
    ) -> Result<TransferUnit> {
        tracing::info!("Uploading {:?} to {}", local, remote);
        let unit = TransferUnit {
            source: local.display().to_string(),
            destination: remote.to_string(),
            mode: options.mode,
            newline: None,
            preserve_times: false,
        };

        if options.scp == ScpMode::Transfer {
            let existed = is_file(fs.as_ref(), remote).await?;
            self.scp()
                .upload(
                    &[local.to_path_buf()],
                    remote,
                    options.mode,
                    options.preserve_times,
                )
                .await?;
            if !existed || options.mode.is_some() {
                fs.chmod(remote, options.mode.unwrap_or(DEFAULT_FILE_MODE))
                    .await?;
            }
            return Ok(TransferUnit {
                preserve_times: options.preserve_times,
                ..unit
            });
        }

        sftp::upload(
            fs.as_ref(),
            local,
            remote,
            options.mode,
            options.newline.as_ref(),
        )
        .await?;
        Ok(TransferUnit {
            newline: options.newline.clone(),
            ..unit
        })
    }

    async fn put_all_over_scp(
        &mut self,
        sources: &[PathBuf],
        destination: &str,
        options: &PutOptions,
    ) -> Result<Vec<TransferUnit>> {
        let destination = if destination.is_empty() {
            "."
        } else {
            destination
        };
        let into_dir =
            sources.len() > 1 || destination == "." || destination.ends_with(self.separator);
        self.scp()
            .upload(sources, destination, options.mode, options.preserve_times)
            .await?;

        let dir = paths::trim_trailing_separator(destination, self.separator);
        Ok(sources
            .iter()
            .map(|local| {
                let target = if into_dir {
                    let name = local
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    paths::join(dir, &name, self.separator)
                } else {
                    destination.to_string()
                };
                TransferUnit {
                    source: local.display().to_string(),
                    destination: target,
                    mode: options.mode,
                    newline: None,
                    preserve_times: options.preserve_times,
                }
            })
            .collect())
    }

    /// Uploads a local directory, descending into subdirectories only when
    /// `options.recursive` is set.
    pub async fn put_directory(
        &mut self,
        source: &str,
        destination: &str,
        options: &PutOptions,
    ) -> Result<Vec<TransferUnit>> {
        if options.scp == ScpMode::All {
            return Err(SessionError::CapabilityUnsupported(
                "Directory upload is not supported with scp=ALL.".to_string(),
            ));
        }
        let local = Path::new(source);
        if !local.is_dir() {
            return Err(SessionError::PathNotFound {
                what: "Local directory",
                path: source.to_string(),
            });
        }

        let fs = self.sftp().await?;
        let destination = self
            .absolute(paths::trim_trailing_separator(destination, self.separator))
            .await?;
        let destination_is_dir = is_dir(fs.as_ref(), &destination).await?;
        let destination = paths::resolve_put_directory_destination(
            local,
            &destination,
            self.separator,
            destination_is_dir,
        );

        let mut units = Vec::new();
        self.put_tree(&fs, local, &destination, options, &mut units)
            .await?;
        Ok(units)
    }

    fn put_tree<'b>(
        &'b mut self,
        fs: &'b Arc<dyn RemoteFs>,
        local: &'b Path,
        remote: &'b str,
        options: &'b PutOptions,
        units: &'b mut Vec<TransferUnit>,
    ) -> BoxedTask<'b> {
        Box::pin(async move {
            let mut entries = std::fs::read_dir(local)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<Vec<_>>>()?;
            entries.sort();

            if entries.is_empty() {
                sftp::create_missing_dirs(fs.as_ref(), remote, self.separator).await?;
                units.push(TransferUnit {
                    source: local.display().to_string(),
                    destination: remote.to_string(),
                    mode: options.mode,
                    newline: None,
                    preserve_times: false,
                });
                return Ok(());
            }

            let mut dir_ready = false;
            for path in entries {
                let name = match path.file_name() {
                    Some(name) => name.to_string_lossy().into_owned(),
                    None => continue,
                };
                let target = paths::join(remote, &name, self.separator);
                if path.is_file() {
                    if !dir_ready {
                        sftp::create_missing_dirs(fs.as_ref(), remote, self.separator).await?;
                        dir_ready = true;
                    }
                    let unit = self.put_one(fs, &path, &target, options).await?;
                    units.push(unit);
                } else if options.recursive && path.is_dir() {
                    self.put_tree(fs, &path, &target, options, units).await?;
                } else {
                    tracing::debug!("Skipping {:?}", path);
                }
            }
            Ok(())
        })
    }

    /// Downloads the remote file(s) matching `source`.
    pub async fn get_file(
        &mut self,
        source: &str,
        destination: &str,
        options: &GetOptions,
    ) -> Result<Vec<TransferUnit>> {
        if options.scp == ScpMode::All {
            return self.get_all_over_scp(source, destination, options).await;
        }

        let fs = self.sftp().await?;
        let sources = self.remote_file_sources(&fs, source).await?;
        let (targets, parent) = paths::resolve_get_destinations(
            &sources,
            destination,
            self.separator,
            Path::new(destination).is_dir(),
        )?;
        tokio::fs::create_dir_all(&parent).await?;

        let mut units = Vec::with_capacity(targets.len());
        for (remote, local) in sources.iter().zip(targets) {
            units.push(self.get_one(&fs, remote, &local, options).await?);
        }
        Ok(units)
    }

    async fn remote_file_sources(
        &mut self,
        fs: &Arc<dyn RemoteFs>,
        source: &str,
    ) -> Result<Vec<String>> {
        let absolute = self.absolute(source).await?;
        if is_file(fs.as_ref(), &absolute).await? {
            return Ok(vec![absolute]);
        }

        let (dir, pattern) = paths::split_remote_pattern(source, self.separator);
        let dir = self.absolute(dir).await?;
        let matches = if is_dir(fs.as_ref(), &dir).await? {
            self.list_directory(&dir, Some(pattern), true, ListFilter::Files)
                .await?
        } else {
            Vec::new()
        };
        if matches.is_empty() {
            return Err(SessionError::NoSourceMatch {
                pattern: source.to_string(),
            });
        }
        Ok(matches)
    }

    async fn get_one(
        &mut self,
        fs: &Arc<dyn RemoteFs>,
        remote: &str,
        local: &Path,
        options: &GetOptions,
    ) -> Result<TransferUnit> {
        tracing::info!("Downloading {} to {:?}", remote, local);
        let scp = options.scp == ScpMode::Transfer;
        if scp {
            self.scp()
                .download(&shell_quote(remote), local, false, options.preserve_times)
                .await?;
        } else {
            sftp::download(fs.as_ref(), remote, local).await?;
        }
        Ok(TransferUnit {
            source: remote.to_string(),
            destination: local.display().to_string(),
            mode: None,
            newline: None,
            preserve_times: scp && options.preserve_times,
        })
    }

    async fn get_all_over_scp(
        &mut self,
        source: &str,
        destination: &str,
        options: &GetOptions,
    ) -> Result<Vec<TransferUnit>> {
        let local = if destination.is_empty() {
            Path::new(".")
        } else {
            Path::new(destination)
        };
        let into_dir = paths::is_local_dir_target(destination) || local.is_dir();
        if into_dir {
            tokio::fs::create_dir_all(local).await?;
        } else if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let received = self
            .scp()
            .download(source, local, into_dir, options.preserve_times)
            .await?;
        if received.is_empty() {
            return Err(SessionError::NoSourceMatch {
                pattern: source.to_string(),
            });
        }

        let remote_dir = source
            .rsplit_once(self.separator)
            .map(|(dir, _)| if dir.is_empty() { "/" } else { dir });
        Ok(received
            .into_iter()
            .map(|(name, path)| TransferUnit {
                source: match remote_dir {
                    Some(dir) => paths::join(dir, &name, self.separator),
                    None => name,
                },
                destination: path.display().to_string(),
                mode: None,
                newline: None,
                preserve_times: options.preserve_times,
            })
            .collect())
    }

    /// Downloads a remote directory, descending into subdirectories only
    /// when `options.recursive` is set.
    pub async fn get_directory(
        &mut self,
        source: &str,
        destination: &str,
        options: &GetOptions,
    ) -> Result<Vec<TransferUnit>> {
        if options.scp == ScpMode::All {
            return Err(SessionError::CapabilityUnsupported(
                "Directory download is not supported with scp=ALL.".to_string(),
            ));
        }

        let fs = self.sftp().await?;
        let trimmed = paths::trim_trailing_separator(source, self.separator);
        let remote = self.absolute(trimmed).await?;
        if !is_dir(fs.as_ref(), &remote).await? {
            return Err(SessionError::PathNotFound {
                what: "Remote directory",
                path: source.to_string(),
            });
        }

        let local = paths::resolve_get_directory_destination(
            trimmed,
            destination,
            self.separator,
            Path::new(destination).exists(),
        );
        tokio::fs::create_dir_all(&local).await?;

        let mut units = Vec::new();
        self.get_tree(&fs, &remote, &local, options, &mut units)
            .await?;
        Ok(units)
    }

    fn get_tree<'b>(
        &'b mut self,
        fs: &'b Arc<dyn RemoteFs>,
        remote: &'b str,
        local: &'b Path,
        options: &'b GetOptions,
        units: &'b mut Vec<TransferUnit>,
    ) -> BoxedTask<'b> {
        Box::pin(async move {
            let mut entries = fs.list_dir(remote).await?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));

            if entries.is_empty() {
                tokio::fs::create_dir_all(local).await?;
                units.push(TransferUnit {
                    source: remote.to_string(),
                    destination: local.display().to_string(),
                    mode: None,
                    newline: None,
                    preserve_times: false,
                });
                return Ok(());
            }

            for entry in entries {
                let source = paths::join(remote, &entry.name, self.separator);
                let target = local.join(&entry.name);
                if entry.is_file() {
                    let unit = self.get_one(fs, &source, &target, options).await?;
                    units.push(unit);
                } else if options.recursive && entry.is_dir() {
                    tokio::fs::create_dir_all(&target).await?;
                    self.get_tree(fs, &source, &target, options, units).await?;
                } else {
                    tracing::debug!("Skipping {}", source);
                }
            }
            Ok(())
        })
    }

    /// True if `path` (or, for a glob, any match of its last segment) is a
    /// regular file. Symlinks are followed.
    pub async fn file_exists(&mut self, path: &str) -> Result<bool> {
        self.exists(path, ListFilter::Files).await
    }

    /// Like [`Self::file_exists`] for directories.
    pub async fn directory_exists(&mut self, path: &str) -> Result<bool> {
        self.exists(path, ListFilter::Directories).await
    }

    async fn exists(&mut self, path: &str, filter: ListFilter) -> Result<bool> {
        let fs = self.sftp().await?;
        if paths::has_glob(path) {
            let (dir, pattern) = paths::split_remote_pattern(path, self.separator);
            let dir = self.absolute(dir).await?;
            if is_dir(fs.as_ref(), &dir).await? {
                for entry in fs.list_dir(&dir).await? {
                    if filter.accepts(&entry) && paths::matches(&entry.name, pattern)? {
                        return Ok(true);
                    }
                }
            }
        }
        let path = self.absolute(path).await?;
        Ok(match fs.stat(&path).await? {
            Some(entry) => filter.accepts(&entry),
            None => false,
        })
    }

    /// Sorted names (or absolute paths) in a remote directory.
    ///
    /// `pattern` is matched against names only, never full paths.
    pub async fn list_directory(
        &mut self,
        path: &str,
        pattern: Option<&str>,
        absolute: bool,
        filter: ListFilter,
    ) -> Result<Vec<String>> {
        let fs = self.sftp().await?;
        let dir = self.absolute(path).await?;
        if !is_dir(fs.as_ref(), &dir).await? {
            return Err(SessionError::PathNotFound {
                what: "Directory",
                path: path.to_string(),
            });
        }

        let names: Vec<String> = fs
            .list_dir(&dir)
            .await?
            .into_iter()
            .filter(|entry| filter.accepts(entry))
            .map(|entry| entry.name)
            .collect();
        let mut names = match pattern {
            Some(pattern) => paths::filter_matches(names, pattern)?,
            None => names,
        };
        names.sort();

        if absolute {
            let base = fs.canonicalize(&dir).await?;
            let separator = if base.get(1..3) == Some(":\\") {
                '\\'
            } else {
                '/'
            };
            names = names
                .iter()
                .map(|name| paths::join(&base, name, separator))
                .collect();
        }
        Ok(names)
    }

    pub async fn list_files(
        &mut self,
        path: &str,
        pattern: Option<&str>,
        absolute: bool,
    ) -> Result<Vec<String>> {
        self.list_directory(path, pattern, absolute, ListFilter::Files)
            .await
    }

    pub async fn list_directories(
        &mut self,
        path: &str,
        pattern: Option<&str>,
        absolute: bool,
    ) -> Result<Vec<String>> {
        self.list_directory(path, pattern, absolute, ListFilter::Directories)
            .await
    }
}

async fn is_dir(fs: &dyn RemoteFs, path: &str) -> Result<bool> {
    Ok(fs.stat(path).await?.is_some_and(|entry| entry.is_dir()))
}

async fn is_file(fs: &dyn RemoteFs, path: &str) -> Result<bool> {
    Ok(fs.stat(path).await?.is_some_and(|entry| entry.is_file()))
}
