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

//! Text encodings for remote output.
//!
//! Shell reads decode one character at a time, so the decoder has to tell an
//! incomplete multibyte sequence (wait for more bytes) apart from an invalid
//! one (apply the error policy).

use std::fmt;
use std::str::FromStr;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

/// What to do with bytes that are not valid in the selected encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingErrors {
    #[default]
    Strict,
    Replace,
    Ignore,
}

/// Outcome of decoding the bytes accumulated for one character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharDecode {
    /// `consumed` bytes were used; `ch` is `None` when an invalid byte was ignored.
    Complete { ch: Option<char>, consumed: usize },
    /// The bytes are a valid prefix of a longer sequence.
    Incomplete,
}

impl TextEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Latin1 => "ISO-8859-1",
            Self::Ascii => "ASCII",
        }
    }

    /// Decodes the first character of `bytes`.
    pub fn decode_char(
        &self,
        bytes: &[u8],
        errors: EncodingErrors,
    ) -> Result<CharDecode, SessionError> {
        let Some(&first) = bytes.first() else {
            return Ok(CharDecode::Incomplete);
        };
        match self {
            Self::Latin1 => Ok(CharDecode::Complete {
                ch: Some(char::from(first)),
                consumed: 1,
            }),
            Self::Ascii if first.is_ascii() => Ok(CharDecode::Complete {
                ch: Some(char::from(first)),
                consumed: 1,
            }),
            Self::Ascii => self.invalid(bytes, 1, errors),
            Self::Utf8 => {
                // a scalar value is at most four bytes long
                let window = &bytes[..bytes.len().min(4)];
                let err = match std::str::from_utf8(window) {
                    Ok(text) => return Ok(first_char(text)),
                    Err(err) => err,
                };
                if err.valid_up_to() > 0 {
                    let text = std::str::from_utf8(&window[..err.valid_up_to()])
                        .map_err(|e| self.decode_error(e.to_string()))?;
                    return Ok(first_char(text));
                }
                match err.error_len() {
                    None => Ok(CharDecode::Incomplete),
                    Some(len) => self.invalid(bytes, len, errors),
                }
            }
        }
    }

    /// Decodes a whole buffer, applying the error policy to invalid bytes.
    ///
    /// A trailing incomplete sequence is treated as invalid.
    pub fn decode(&self, bytes: &[u8], errors: EncodingErrors) -> Result<String, SessionError> {
        if *self == Self::Utf8 {
            return self.decode_utf8(bytes, errors);
        }
        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes;
        while !rest.is_empty() {
            match self.decode_char(rest, errors)? {
                CharDecode::Complete { ch, consumed } => {
                    text.extend(ch);
                    rest = &rest[consumed..];
                }
                CharDecode::Incomplete => {
                    match self.invalid(rest, rest.len(), errors)? {
                        CharDecode::Complete { ch, .. } => text.extend(ch),
                        CharDecode::Incomplete => {}
                    }
                    break;
                }
            }
        }
        Ok(text)
    }

    /// Copies each valid run whole; the error policy only sees invalid spans.
    fn decode_utf8(&self, bytes: &[u8], errors: EncodingErrors) -> Result<String, SessionError> {
        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes;
        loop {
            let err = match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    return Ok(text);
                }
                Err(err) => err,
            };
            let (valid, after) = rest.split_at(err.valid_up_to());
            text.push_str(
                std::str::from_utf8(valid).map_err(|e| self.decode_error(e.to_string()))?,
            );
            let len = err.error_len().unwrap_or(after.len());
            if let CharDecode::Complete { ch: Some(ch), .. } = self.invalid(after, len, errors)? {
                text.push(ch);
            }
            rest = &after[len..];
        }
    }

    pub fn encode(&self, text: &str, errors: EncodingErrors) -> Result<Vec<u8>, SessionError> {
        if *self == Self::Utf8 {
            return Ok(text.as_bytes().to_vec());
        }
        let limit = if *self == Self::Ascii { 0x7f } else { 0xff };
        let mut bytes = Vec::with_capacity(text.len());
        for ch in text.chars() {
            match u32::from(ch) {
                code if code <= limit => bytes.push(code as u8),
                _ => match errors {
                    EncodingErrors::Strict => {
                        return Err(self.decode_error(format!("cannot encode character {ch:?}")))
                    }
                    EncodingErrors::Replace => bytes.push(b'?'),
                    EncodingErrors::Ignore => {}
                },
            }
        }
        Ok(bytes)
    }

    fn invalid(
        &self,
        bytes: &[u8],
        len: usize,
        errors: EncodingErrors,
    ) -> Result<CharDecode, SessionError> {
        match errors {
            EncodingErrors::Strict => Err(self.decode_error(format!(
                "invalid byte sequence {:02x?}",
                &bytes[..len]
            ))),
            EncodingErrors::Replace => Ok(CharDecode::Complete {
                ch: Some(char::REPLACEMENT_CHARACTER),
                consumed: len,
            }),
            EncodingErrors::Ignore => Ok(CharDecode::Complete {
                ch: None,
                consumed: len,
            }),
        }
    }

    fn decode_error(&self, reason: String) -> SessionError {
        SessionError::Decode {
            encoding: self.name(),
            reason,
        }
    }
}

fn first_char(text: &str) -> CharDecode {
    match text.chars().next() {
        Some(ch) => CharDecode::Complete {
            ch: Some(ch),
            consumed: ch.len_utf8(),
        },
        None => CharDecode::Incomplete,
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TextEncoding {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "iso-8859-1" | "latin-1" | "latin1" => Ok(Self::Latin1),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            other => Err(SessionError::configuration(format!(
                "Unsupported encoding '{other}'."
            ))),
        }
    }
}

impl FromStr for EncodingErrors {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "replace" => Ok(Self::Replace),
            "ignore" => Ok(Self::Ignore),
            other => Err(SessionError::configuration(format!(
                "Unsupported encoding error policy '{other}'. Expected strict, replace or ignore."
            ))),
        }
    }
}

impl fmt::Display for EncodingErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::Replace => "replace",
            Self::Ignore => "ignore",
        })
    }
}
