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

//! Interactive PTY shell with consuming reads.
//!
//! A background task drains the channel into a queue. Reads take bytes off
//! that queue and never hand the same byte out twice. Pattern reads decode
//! one character at a time and stop as soon as the pattern matches, so
//! nothing past the match is consumed.

mod ansi;

pub use ansi::strip_ansi_escapes;

use regex::Regex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{Newline, Prompt, SessionConfig};
use crate::encoding::{CharDecode, EncodingErrors, TextEncoding};
use crate::error::{Result, SessionError};
use crate::transport::DuplexStream;

/// Read buffer size for the channel pump.
const SHELL_READ_BUFFER_SIZE: usize = 4096;

/// The subset of session settings a shell consults on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellSettings {
    pub timeout: Duration,
    pub newline: Newline,
    pub prompt: Option<Prompt>,
    pub encoding: TextEncoding,
    pub encoding_errors: EncodingErrors,
    pub escape_ansi: bool,
}

impl From<&SessionConfig> for ShellSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            timeout: config.timeout,
            newline: config.newline.clone(),
            prompt: config.prompt.clone(),
            encoding: config.encoding,
            encoding_errors: config.encoding_errors,
            escape_ansi: config.escape_ansi,
        }
    }
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

pub struct InteractiveShell {
    writer: WriteHalf<Box<dyn DuplexStream>>,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Received but not yet returned.
    pending: VecDeque<u8>,
    closed: bool,
    pump: JoinHandle<()>,
    settings: ShellSettings,
}

impl InteractiveShell {
    /// Wraps an open shell stream and starts draining it.
    pub fn new(stream: Box<dyn DuplexStream>, settings: ShellSettings) -> Self {
        let (mut reader, writer) = tokio::io::split(stream);
        let (tx, incoming) = mpsc::unbounded_channel();

        let pump = tokio::spawn(async move {
            let mut buffer = vec![0u8; SHELL_READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buffer).await {
                    Ok(0) => {
                        tracing::trace!("Shell channel closed");
                        break;
                    }
                    Ok(n) => {
                        if tx.send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Shell channel read error: {}", e);
                        break;
                    }
                }
            }
        });

        Self {
            writer,
            incoming,
            pending: VecDeque::new(),
            closed: false,
            pump,
            settings,
        }
    }

    pub fn settings(&self) -> &ShellSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ShellSettings) {
        self.settings = settings;
    }

    /// Sends `text` verbatim, no newline appended.
    pub async fn write_bare(&mut self, text: &str) -> Result<()> {
        let bytes = self
            .settings
            .encoding
            .encode(text, self.settings.encoding_errors)?;
        self.write_bytes(&bytes).await
    }

    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Writes `text` plus the configured newline and consumes the echoed line.
    pub async fn write(&mut self, text: &str) -> Result<String> {
        let line = format!("{text}{}", self.settings.newline.as_str());
        self.write_bare(&line).await?;
        self.read_until_newline().await
    }

    /// Everything available right now; never waits.
    pub fn read(&mut self) -> Result<String> {
        let mut output = String::new();
        while let Some(ch) = self.read_char()? {
            output.push(ch);
        }
        Ok(self.present(output))
    }

    /// Reads, then keeps reading every `delay` for as long as output keeps
    /// arriving. Bounded by the session timeout.
    pub async fn read_delayed(&mut self, delay: Option<Duration>) -> Result<String> {
        let deadline = Instant::now() + self.settings.timeout;
        let mut output = self.read()?;
        let Some(delay) = delay else {
            return Ok(output);
        };
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            let more = self.read()?;
            if more.is_empty() {
                break;
            }
            output.push_str(&more);
        }
        Ok(output)
    }

    /// Decodes one character from the bytes received so far.
    ///
    /// Returns `None` when no complete character is available yet; the bytes
    /// of an incomplete sequence stay queued for the next call.
    pub fn read_char(&mut self) -> Result<Option<char>> {
        self.fill_available();
        let encoding = self.settings.encoding;
        let errors = self.settings.encoding_errors;
        loop {
            let mut len = 1;
            loop {
                if self.pending.len() < len {
                    return Ok(None);
                }
                let bytes: Vec<u8> = self.pending.iter().take(len).copied().collect();
                match encoding.decode_char(&bytes, errors) {
                    Ok(CharDecode::Complete { ch, consumed }) => {
                        self.pending.drain(..consumed);
                        match ch {
                            Some(ch) => return Ok(Some(ch)),
                            // An ignored invalid byte; start on the next one.
                            None => break,
                        }
                    }
                    Ok(CharDecode::Incomplete) => len += 1,
                    Err(e) => {
                        self.pending.drain(..len);
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Reads until `matcher` accepts the accumulated text.
    ///
    /// `expected` only describes the pattern in the timeout error.
    pub async fn read_until<F>(
        &mut self,
        expected: &str,
        timeout: Option<Duration>,
        matcher: F,
    ) -> Result<String>
    where
        F: FnMut(&str) -> bool,
    {
        let output = self.read_until_raw(expected, timeout, matcher).await?;
        Ok(self.present(output))
    }

    pub async fn read_until_literal(&mut self, expected: &str) -> Result<String> {
        self.read_until_literal_within(expected, None).await
    }

    pub async fn read_until_newline(&mut self) -> Result<String> {
        let newline = self.settings.newline.as_str().to_string();
        self.read_until_literal(&newline).await
    }

    pub async fn read_until_regexp(&mut self, pattern: &str) -> Result<String> {
        let re = Regex::new(pattern).map_err(|source| SessionError::Regex {
            pattern: pattern.to_string(),
            source,
        })?;
        self.read_until(pattern, None, |output| re.is_match(output))
            .await
    }

    /// Reads until `pattern` matches `prefix` followed by the output read so far.
    ///
    /// Lets a match span text consumed by an earlier read; the prefix is not
    /// part of the result.
    pub async fn read_until_regexp_with_prefix(
        &mut self,
        pattern: &str,
        prefix: &str,
    ) -> Result<String> {
        let re = Regex::new(pattern).map_err(|source| SessionError::Regex {
            pattern: pattern.to_string(),
            source,
        })?;
        let mut joined = prefix.to_string();
        self.read_until(pattern, None, |output| {
            joined.truncate(prefix.len());
            joined.push_str(output);
            re.is_match(&joined)
        })
        .await
    }

    /// Reads until the configured prompt, optionally removing it from the result.
    pub async fn read_until_prompt(&mut self, strip_prompt: bool) -> Result<String> {
        let prompt = self
            .settings
            .prompt
            .clone()
            .ok_or_else(|| SessionError::configuration("Prompt is not set."))?;

        let (output, prompt_len) = match &prompt {
            Prompt::Literal(text) => {
                let output = self
                    .read_until_raw(text, None, |output| output.contains(text.as_str()))
                    .await?;
                (output, text.chars().count())
            }
            Prompt::Regex(re) => {
                let output = self
                    .read_until_raw(re.as_str(), None, |output| re.is_match(output))
                    .await?;
                let matched = re.find(&output).map_or(0, |m| m.as_str().chars().count());
                (output, matched)
            }
        };

        let output = if strip_prompt {
            strip_trailing_chars(output, prompt_len)
        } else {
            output
        };
        Ok(self.present(output))
    }

    /// Writes `text` repeatedly until `expected` shows up.
    ///
    /// Each attempt waits at most `retry_interval` for `expected`; the whole
    /// loop gives up after `timeout`.
    pub async fn write_until_expected(
        &mut self,
        text: &str,
        expected: &str,
        timeout: Duration,
        retry_interval: Duration,
    ) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut seen = String::new();
        loop {
            self.write_bare(text).await?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = retry_interval.min(remaining);
            match self.read_until_literal_within(expected, Some(attempt)).await {
                Ok(output) => return Ok(output),
                Err(SessionError::Timeout { output, .. }) => seen.push_str(&output),
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(SessionError::NoMatch {
                    expected: expected.to_string(),
                    timeout,
                    output: seen,
                });
            }
        }
    }

    async fn read_until_literal_within(
        &mut self,
        expected: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        self.read_until(expected, timeout, |output| output.contains(expected))
            .await
    }

    async fn read_until_raw<F>(
        &mut self,
        expected: &str,
        timeout: Option<Duration>,
        mut matcher: F,
    ) -> Result<String>
    where
        F: FnMut(&str) -> bool,
    {
        let timeout = timeout.unwrap_or(self.settings.timeout);
        let deadline = Instant::now() + timeout;
        let mut output = String::new();
        loop {
            while let Some(ch) = self.read_char()? {
                output.push(ch);
                if matcher(&output) {
                    return Ok(output);
                }
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout {
                    expected: expected.to_string(),
                    timeout,
                    output: self.present(output),
                });
            }
            self.wait_for_bytes(deadline).await;
        }
    }

    /// Moves whatever the pump has delivered into `pending`.
    fn fill_available(&mut self) {
        loop {
            match self.incoming.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
    }

    /// Waits for the next chunk or the deadline, whichever comes first.
    async fn wait_for_bytes(&mut self, deadline: Instant) {
        if self.closed {
            tokio::time::sleep_until(deadline).await;
            return;
        }
        match tokio::time::timeout_at(deadline, self.incoming.recv()).await {
            Ok(Some(chunk)) => self.pending.extend(chunk),
            Ok(None) => self.closed = true,
            Err(_) => {}
        }
    }

    fn present(&self, output: String) -> String {
        if self.settings.escape_ansi {
            strip_ansi_escapes(&output).into_owned()
        } else {
            output
        }
    }

    pub async fn close(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("Failed to close shell channel: {}", e);
        }
        self.pump.abort();
    }
}

impl Drop for InteractiveShell {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl std::fmt::Debug for InteractiveShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveShell")
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .field("settings", &self.settings)
            .finish()
    }
}

fn strip_trailing_chars(mut text: String, count: usize) -> String {
    if count == 0 {
        return text;
    }
    let cut = text
        .char_indices()
        .rev()
        .nth(count - 1)
        .map_or(0, |(index, _)| index);
    text.truncate(cut);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    fn settings() -> ShellSettings {
        ShellSettings {
            timeout: Duration::from_millis(200),
            ..ShellSettings::default()
        }
    }

    #[test]
    fn test_strip_trailing_chars() {
        assert_eq!(strip_trailing_chars("hi\n$ ".to_string(), 2), "hi\n");
        assert_eq!(strip_trailing_chars("ab€".to_string(), 1), "ab");
        assert_eq!(strip_trailing_chars("ab".to_string(), 5), "");
        assert_eq!(strip_trailing_chars("ab".to_string(), 0), "ab");
    }

    #[tokio::test]
    async fn test_read_char_waits_for_complete_sequence() {
        let (local, mut remote) = duplex(64);
        let mut shell = InteractiveShell::new(Box::new(local), settings());
        let euro = "€".as_bytes();

        remote.write_all(&euro[..2]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shell.read_char().unwrap(), None);

        remote.write_all(&euro[2..]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shell.read_char().unwrap(), Some('€'));
        assert_eq!(shell.read_char().unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_byte_propagates_under_strict() {
        let (local, mut remote) = duplex(64);
        let mut shell = InteractiveShell::new(Box::new(local), settings());
        remote.write_all(&[0xff, b'a']).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            shell.read_char(),
            Err(SessionError::Decode { .. })
        ));
        assert_eq!(shell.read_char().unwrap(), Some('a'));
    }

    #[tokio::test]
    async fn test_read_until_stops_at_match() {
        let (local, mut remote) = duplex(64);
        let mut shell = InteractiveShell::new(Box::new(local), settings());
        remote.write_all(b"one two three").await.unwrap();

        let output = shell.read_until_literal("two").await.unwrap();
        assert_eq!(output, "one two");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shell.read().unwrap(), " three");
        assert_eq!(shell.read().unwrap(), "");
    }

    #[tokio::test]
    async fn test_read_until_timeout_carries_output() {
        let (local, mut remote) = duplex(64);
        let mut shell = InteractiveShell::new(Box::new(local), settings());
        remote.write_all(b"no prompt here").await.unwrap();

        let err = shell.read_until_literal("$ ").await.unwrap_err();
        match err {
            SessionError::Timeout {
                expected, output, ..
            } => {
                assert_eq!(expected, "$ ");
                assert_eq!(output, "no prompt here");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_read_until_prompt_requires_prompt() {
        let (local, _remote) = duplex(64);
        let mut shell = InteractiveShell::new(Box::new(local), settings());
        assert!(matches!(
            shell.read_until_prompt(false).await,
            Err(SessionError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_regex_prompt_strips_matched_span() {
        let (local, mut remote) = duplex(64);
        let mut shell = InteractiveShell::new(
            Box::new(local),
            ShellSettings {
                prompt: Some("REGEXP:[#$] ".parse().unwrap()),
                ..settings()
            },
        );
        remote.write_all(b"done\nroot# ").await.unwrap();
        assert_eq!(shell.read_until_prompt(true).await.unwrap(), "done\nroot");
    }

    #[tokio::test]
    async fn test_escape_ansi_applies_to_reads() {
        let (local, mut remote) = duplex(64);
        let mut shell = InteractiveShell::new(
            Box::new(local),
            ShellSettings {
                escape_ansi: true,
                ..settings()
            },
        );
        remote.write_all(b"\x1b[32mgreen\x1b[0m").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(shell.read().unwrap(), "green");
    }
}
