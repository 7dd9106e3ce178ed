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

//! Single-file data transfer over SFTP.

use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::newline::NewlineConverter;
use super::path_resolver::remote_ancestors;
use super::DEFAULT_FILE_MODE;
use crate::config::Newline;
use crate::error::Result;
use crate::transport::RemoteFs;

/// Upload chunk size.
pub const CHUNK_SIZE: usize = 4096;

/// Uploads `local` to `remote`.
///
/// A new file gets `mode` (or the default) before any data is written; an
/// existing file keeps its mode unless `mode` is given, in which case it is
/// applied after the write.
pub async fn upload(
    fs: &dyn RemoteFs,
    local: &Path,
    remote: &str,
    mode: Option<u32>,
    newline: Option<&Newline>,
) -> Result<()> {
    let existed = fs.stat(remote).await?.is_some_and(|entry| entry.is_file());
    let mut source = tokio::fs::File::open(local).await?;
    let mut target = fs.create(remote).await?;

    if !existed {
        fs.chmod(remote, mode.unwrap_or(DEFAULT_FILE_MODE)).await?;
    }

    let mut converter = newline.map(|n| NewlineConverter::new(n.as_bytes()));
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = source.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        match converter.as_mut() {
            Some(converter) => {
                let converted = converter.convert(&buffer[..n]);
                target.write_all(&converted).await?;
                written += converted.len() as u64;
            }
            None => {
                target.write_all(&buffer[..n]).await?;
                written += n as u64;
            }
        }
    }
    if let Some(converter) = converter.as_mut() {
        let tail = converter.finish();
        target.write_all(&tail).await?;
        written += tail.len() as u64;
    }
    target.flush().await?;
    target.shutdown().await?;

    if existed {
        if let Some(mode) = mode {
            fs.chmod(remote, mode).await?;
        }
    }

    tracing::debug!("Uploaded {:?} to {} ({} bytes)", local, remote, written);
    Ok(())
}

/// Downloads `remote` into `local`, replacing it.
pub async fn download(fs: &dyn RemoteFs, remote: &str, local: &Path) -> Result<()> {
    let mut source = fs.open_read(remote).await?;
    let mut target = tokio::fs::File::create(local).await?;
    let copied = tokio::io::copy(&mut source, &mut target).await?;
    target.flush().await?;
    tracing::debug!("Downloaded {} to {:?} ({} bytes)", remote, local, copied);
    Ok(())
}

/// Creates every missing directory on the way to `path`.
pub async fn create_missing_dirs(fs: &dyn RemoteFs, path: &str, separator: char) -> Result<()> {
    for dir in remote_ancestors(path, separator) {
        if fs.stat(&dir).await?.is_none() {
            tracing::debug!("Creating remote directory {}", dir);
            fs.mkdir(&dir).await?;
        }
    }
    Ok(())
}
