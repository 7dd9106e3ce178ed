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

//! Console logging plus an optional SSH protocol log file.
//!
//! The log file layer is installed together with the console layer and stays
//! silent until [`enable_ssh_logging`] points it at a file.

use once_cell::sync::Lazy;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::filter::{filter_fn, FilterExt, Targets};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static SSH_LOG: Lazy<Mutex<Option<File>>> = Lazy::new(|| Mutex::new(None));
static SSH_LOG_ACTIVE: AtomicBool = AtomicBool::new(false);
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Create an environment filter based on verbosity level
pub fn create_env_filter(verbosity: u8) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        // RUST_LOG wins, e.g. to debug russh on its own
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter_directives(verbosity))
    }
}

fn filter_directives(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "sshdeck=warn",
        1 => "sshdeck=info",
        // -vv: include russh debug logs for SSH troubleshooting
        2 => "sshdeck=debug,russh=debug",
        _ => "sshdeck=trace,russh=trace,russh_sftp=debug",
    }
}

fn ssh_log_targets() -> Targets {
    Targets::new()
        .with_target("sshdeck", Level::DEBUG)
        .with_target("russh", Level::DEBUG)
        .with_target("russh_sftp", Level::DEBUG)
}

/// Writes to the SSH log file when one is set, discards otherwise.
#[derive(Debug, Clone, Copy, Default)]
struct SshLogWriter;

impl Write for SshLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match SSH_LOG.lock() {
            Ok(mut file) => match file.as_mut() {
                Some(file) => file.write(buf),
                None => Ok(buf.len()),
            },
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match SSH_LOG.lock() {
            Ok(mut file) => file.as_mut().map_or(Ok(()), |file| file.flush()),
            Err(_) => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SshLogWriter {
    type Writer = SshLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Initialize console logging.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(verbosity: u8) {
    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(create_env_filter(verbosity));

    let ssh_log = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(SshLogWriter)
        .with_filter(
            ssh_log_targets().and(filter_fn(|_| SSH_LOG_ACTIVE.load(Ordering::Relaxed))),
        );

    if tracing_subscriber::registry()
        .with(console)
        .with(ssh_log)
        .try_init()
        .is_ok()
    {
        INSTALLED.store(true, Ordering::SeqCst);
    }
}

/// Writes SSH protocol and session events of every connection from now on
/// to `path`, replacing the file if it exists.
///
/// Installs the console subscriber if none is set yet. Returns `false` when
/// another subscriber was installed first, so the file receives nothing.
pub fn enable_ssh_logging(path: &Path) -> io::Result<bool> {
    let file = File::create(path)?;
    match SSH_LOG.lock() {
        Ok(mut slot) => *slot = Some(file),
        Err(poisoned) => *poisoned.into_inner() = Some(file),
    }
    SSH_LOG_ACTIVE.store(true, Ordering::Relaxed);
    init_logging(0);
    let installed = INSTALLED.load(Ordering::SeqCst);
    if installed {
        tracing::info!("SSH log is written to {}", path.display());
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_filter_directives() {
        assert_eq!(filter_directives(0), "sshdeck=warn");
        assert_eq!(filter_directives(1), "sshdeck=info");
        assert!(filter_directives(2).contains("russh=debug"));
        assert!(filter_directives(7).starts_with("sshdeck=trace"));
    }

    #[test]
    #[serial]
    fn test_init_logging_twice() {
        init_logging(0);
        init_logging(2);
    }

    #[test]
    #[serial]
    fn test_ssh_log_replaces_file_and_records_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssh.log");
        std::fs::write(&path, "stale contents\n").unwrap();

        assert!(enable_ssh_logging(&path).unwrap());
        tracing::debug!("opening channel 7");
        tracing::trace!("byte level detail");

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(!log.contains("stale contents"));
        assert!(log.contains("opening channel 7"));
        assert!(!log.contains("byte level detail"));
    }
}
