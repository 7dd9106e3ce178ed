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

//! Removal of terminal escape sequences from shell output.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

// CSI sequences, OSC strings (BEL or ST terminated), charset selection and
// the two-byte keypad mode switches.
static ANSI_ESCAPE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()][0-9A-Za-z]|\x1b[=>78]",
    )
    .ok()
});

pub fn strip_ansi_escapes(text: &str) -> Cow<'_, str> {
    match ANSI_ESCAPE.as_ref() {
        Some(re) if text.contains('\x1b') => re.replace_all(text, ""),
        _ => Cow::Borrowed(text),
    }
}
