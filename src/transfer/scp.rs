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

//! Client side of the SCP protocol over an exec channel.
//!
//! Uploads run `scp -t` on the remote host and act as the source; downloads
//! run `scp -f` and act as the sink. Every control record is a single line
//! acknowledged by one status byte (`0` ok, `1` warning, `2` fatal error,
//! the latter two followed by a message line).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

use crate::error::{Result, SessionError};
use crate::transport::{DuplexStream, Transport};

type ScpStream = BufReader<Box<dyn DuplexStream>>;

/// One SCP control record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Times { mtime: u64, atime: u64 },
    File { mode: u32, size: u64, name: String },
    Directory { mode: u32, name: String },
    End,
    Error { fatal: bool, message: String },
}

/// Parses one control line (without or with its trailing newline).
pub fn parse_record(line: &[u8]) -> Result<Record> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let Some((&kind, rest)) = line.split_first() else {
        return Err(SessionError::Scp("empty control record".to_string()));
    };
    let text = String::from_utf8_lossy(rest);

    match kind {
        b'T' => {
            let fields: Vec<&str> = text.split(' ').collect();
            match fields.as_slice() {
                [mtime, _, atime, _] => Ok(Record::Times {
                    mtime: parse_number(mtime, "modification time")?,
                    atime: parse_number(atime, "access time")?,
                }),
                _ => Err(malformed(&text)),
            }
        }
        b'C' | b'D' => {
            let mut fields = text.splitn(3, ' ');
            let (Some(mode), Some(size), Some(name)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(malformed(&text));
            };
            let mode = u32::from_str_radix(mode, 8).map_err(|_| malformed(&text))?;
            let name = validate_name(name)?;
            if kind == b'C' {
                Ok(Record::File {
                    mode,
                    size: parse_number(size, "size")?,
                    name,
                })
            } else {
                Ok(Record::Directory { mode, name })
            }
        }
        b'E' => Ok(Record::End),
        1 | 2 => Ok(Record::Error {
            fatal: kind == 2,
            message: text.trim_end().to_string(),
        }),
        other => Err(SessionError::Scp(format!(
            "unexpected control record byte 0x{other:02x}"
        ))),
    }
}

fn parse_number(value: &str, what: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| SessionError::Scp(format!("invalid {what} '{value}'")))
}

fn malformed(text: &str) -> SessionError {
    SessionError::Scp(format!("malformed control record '{text}'"))
}

fn validate_name(name: &str) -> Result<String> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(SessionError::Scp(format!(
            "refusing unsafe file name '{name}'"
        )));
    }
    Ok(name.to_string())
}

/// Quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// SCP sub-client of one session.
#[derive(Clone)]
pub struct ScpClient {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ScpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScpClient").finish_non_exhaustive()
    }
}

impl ScpClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Sends `files` to `destination`, which must be a directory when more
    /// than one file is sent.
    pub async fn upload(
        &self,
        files: &[PathBuf],
        destination: &str,
        mode: Option<u32>,
        preserve_times: bool,
    ) -> Result<()> {
        let mut command = String::from("scp -t");
        if preserve_times {
            command.push_str(" -p");
        }
        if files.len() > 1 {
            command.push_str(" -d");
        }
        command.push(' ');
        command.push_str(&shell_quote(destination));

        tracing::debug!("Running '{}'", command);
        let mut stream = BufReader::new(self.transport.open_exec_stream(&command).await?);
        read_ack(&mut stream).await?;

        for file in files {
            let metadata = tokio::fs::metadata(file).await?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| SessionError::Scp(format!("{file:?} has no file name")))?;

            if preserve_times {
                let mtime = epoch_seconds(metadata.modified().ok());
                let atime = epoch_seconds(metadata.accessed().ok());
                send_line(&mut stream, &format!("T{mtime} 0 {atime} 0\n")).await?;
                read_ack(&mut stream).await?;
            }

            let file_mode = mode.unwrap_or_else(|| local_mode(&metadata));
            send_line(
                &mut stream,
                &format!("C{:04o} {} {}\n", file_mode & 0o7777, metadata.len(), name),
            )
            .await?;
            read_ack(&mut stream).await?;

            let mut source = tokio::fs::File::open(file).await?;
            let sent = tokio::io::copy(&mut source, stream.get_mut()).await?;
            stream.get_mut().write_all(&[0]).await?;
            stream.get_mut().flush().await?;
            read_ack(&mut stream).await?;
            tracing::debug!("Sent {:?} over SCP ({} bytes)", file, sent);
        }

        stream.get_mut().shutdown().await?;
        Ok(())
    }

    /// Receives whatever `source` expands to on the remote side.
    ///
    /// `source` is inserted into the remote command verbatim, so callers
    /// decide whether the remote shell may expand it. Returns the received
    /// file names with their local paths.
    pub async fn download(
        &self,
        source: &str,
        destination: &Path,
        destination_is_dir: bool,
        preserve_times: bool,
    ) -> Result<Vec<(String, PathBuf)>> {
        let mut command = String::from("scp -f");
        if preserve_times {
            command.push_str(" -p");
        }
        command.push(' ');
        command.push_str(source);

        tracing::debug!("Running '{}'", command);
        let mut stream = BufReader::new(self.transport.open_exec_stream(&command).await?);
        send_ack(&mut stream).await?;

        let mut received = Vec::new();
        let mut directories: Vec<PathBuf> = Vec::new();
        let mut times = None;

        loop {
            let mut line = Vec::new();
            if stream.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            match parse_record(&line)? {
                Record::Times { mtime, atime } => {
                    times = Some((mtime, atime));
                    send_ack(&mut stream).await?;
                }
                Record::File { mode, size, name } => {
                    let target = match directories.last() {
                        Some(dir) => dir.join(&name),
                        None if destination_is_dir => destination.join(&name),
                        None if received.is_empty() => destination.to_path_buf(),
                        None => {
                            return Err(SessionError::AmbiguousDestination {
                                destination: destination.display().to_string(),
                            })
                        }
                    };
                    send_ack(&mut stream).await?;

                    let mut file = tokio::fs::File::create(&target).await?;
                    let copied = tokio::io::copy(&mut (&mut stream).take(size), &mut file).await?;
                    if copied != size {
                        return Err(SessionError::Scp(format!(
                            "'{name}' ended after {copied} of {size} bytes"
                        )));
                    }
                    file.flush().await?;
                    read_ack(&mut stream).await?;
                    send_ack(&mut stream).await?;

                    finish_local_file(file, mode, times.take().filter(|_| preserve_times)).await?;
                    tracing::debug!("Received {} over SCP into {:?}", name, target);
                    received.push((name, target));
                }
                Record::Directory { name, .. } => {
                    let base = directories
                        .last()
                        .cloned()
                        .unwrap_or_else(|| destination.to_path_buf());
                    let dir = base.join(&name);
                    tokio::fs::create_dir_all(&dir).await?;
                    directories.push(dir);
                    times = None;
                    send_ack(&mut stream).await?;
                }
                Record::End => {
                    directories.pop();
                    send_ack(&mut stream).await?;
                }
                Record::Error { message, .. } => return Err(SessionError::Scp(message)),
            }
        }

        Ok(received)
    }
}

async fn send_line(stream: &mut ScpStream, line: &str) -> Result<()> {
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().flush().await?;
    Ok(())
}

async fn send_ack(stream: &mut ScpStream) -> Result<()> {
    stream.get_mut().write_all(&[0]).await?;
    stream.get_mut().flush().await?;
    Ok(())
}

async fn read_ack(stream: &mut ScpStream) -> Result<()> {
    let mut status = [0u8; 1];
    if stream.read(&mut status).await? == 0 {
        return Err(SessionError::Scp(
            "remote scp closed the channel unexpectedly".to_string(),
        ));
    }
    match status[0] {
        0 => Ok(()),
        1 | 2 => {
            let mut message = Vec::new();
            stream.read_until(b'\n', &mut message).await?;
            Err(SessionError::Scp(
                String::from_utf8_lossy(&message).trim_end().to_string(),
            ))
        }
        other => Err(SessionError::Scp(format!(
            "unexpected acknowledgement byte 0x{other:02x}"
        ))),
    }
}

fn epoch_seconds(time: Option<SystemTime>) -> u64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn local_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn local_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

async fn finish_local_file(
    file: tokio::fs::File,
    mode: u32,
    times: Option<(u64, u64)>,
) -> Result<()> {
    let file = file.into_std().await;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(mode & 0o7777))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    if let Some((mtime, atime)) = times {
        let times = std::fs::FileTimes::new()
            .set_modified(UNIX_EPOCH + Duration::from_secs(mtime))
            .set_accessed(UNIX_EPOCH + Duration::from_secs(atime));
        file.set_times(times)?;
    }
    Ok(())
}
