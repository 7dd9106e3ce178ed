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

/// Rewrites `\r\n`, `\r` and `\n` to a fixed terminator, chunk by chunk.
///
/// A `\r` ending one chunk is held back until the next chunk shows whether
/// it starts a `\r\n` pair.
#[derive(Debug, Clone)]
pub struct NewlineConverter {
    target: Vec<u8>,
    pending_cr: bool,
}

impl NewlineConverter {
    pub fn new(target: &[u8]) -> Self {
        Self {
            target: target.to_vec(),
            pending_cr: false,
        }
    }

    pub fn convert(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len() + chunk.len() / 8);
        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                out.extend_from_slice(&self.target);
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\r' => self.pending_cr = true,
                b'\n' => out.extend_from_slice(&self.target),
                other => out.push(other),
            }
        }
        out
    }

    /// Flushes a held-back `\r` at end of input.
    pub fn finish(&mut self) -> Vec<u8> {
        if std::mem::take(&mut self.pending_cr) {
            self.target.clone()
        } else {
            Vec::new()
        }
    }
}
