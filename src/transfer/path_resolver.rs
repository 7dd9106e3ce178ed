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

//! Source and destination path computation for uploads and downloads.
//!
//! Remote paths are plain strings joined with the session's configured
//! separator; local paths use [`Path`]. Nothing here touches the network:
//! callers pass in whatever remote facts (home directory, "is a directory")
//! the resolution needs.

use glob::{glob_with, MatchOptions, Pattern};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use crate::error::{Result, SessionError};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// True if `path` contains glob wildcards.
pub fn has_glob(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// Last segment of a remote path, ignoring a trailing separator.
pub fn basename(path: &str, separator: char) -> &str {
    let trimmed = trim_trailing_separator(path, separator);
    trimmed
        .rsplit(|c| c == separator || c == '/')
        .next()
        .unwrap_or(trimmed)
}

/// Joins a remote directory and a name.
pub fn join(dir: &str, name: &str, separator: char) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with(separator) {
        format!("{dir}{name}")
    } else {
        format!("{dir}{separator}{name}")
    }
}

/// Removes one trailing separator, keeping a bare root intact.
pub fn trim_trailing_separator(path: &str, separator: char) -> &str {
    if path.len() > 1 {
        path.strip_suffix(separator).unwrap_or(path)
    } else {
        path
    }
}

/// Absolute remote paths start with the separator or a drive letter.
pub fn is_absolute_remote(path: &str, separator: char) -> bool {
    if path.starts_with(separator) || path.starts_with('/') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolves a relative remote path against the remote home directory.
pub fn absolutize_remote(path: &str, home: &str, separator: char) -> String {
    if is_absolute_remote(path, separator) {
        return path.to_string();
    }
    let relative = path
        .strip_prefix('.')
        .and_then(|rest| rest.strip_prefix(separator))
        .unwrap_or(path);
    match relative {
        "" | "." => home.to_string(),
        rest => join(home, rest, separator),
    }
}

/// Splits a remote source into the directory to list and the segment to match.
///
/// A source without a separator lists the current directory.
pub fn split_remote_pattern(source: &str, separator: char) -> (&str, &str) {
    match source.rsplit_once(separator) {
        Some(("", pattern)) => (&source[..separator.len_utf8()], pattern),
        Some((dir, pattern)) => (dir, pattern),
        None => (".", source),
    }
}

/// Keeps the names matching `pattern`, case-sensitively.
pub fn filter_matches(names: Vec<String>, pattern: &str) -> Result<Vec<String>> {
    let pattern = compile_pattern(pattern)?;
    Ok(names
        .into_iter()
        .filter(|name| pattern.matches_with(name, MATCH_OPTIONS))
        .collect())
}

pub fn matches(name: &str, pattern: &str) -> Result<bool> {
    Ok(compile_pattern(pattern)?.matches_with(name, MATCH_OPTIONS))
}

fn compile_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| {
        SessionError::configuration(format!("Invalid glob pattern '{pattern}': {e}"))
    })
}

/// Expands a local upload source into the regular files it names.
pub fn expand_local_sources(source: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(source);
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let entries = glob_with(source, MATCH_OPTIONS).map_err(|e| {
        SessionError::configuration(format!("Invalid glob pattern '{source}': {e}"))
    })?;
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to read glob entry: {}", e),
        }
    }

    if files.is_empty() {
        return Err(SessionError::NoSourceMatch {
            pattern: source.to_string(),
        });
    }
    Ok(files)
}

/// Local download targets that always name a directory.
pub fn is_local_dir_target(destination: &str) -> bool {
    destination.is_empty()
        || destination == "."
        || destination.ends_with(MAIN_SEPARATOR)
        || destination.ends_with('/')
}

/// Local targets for downloading `sources`.
///
/// Returns the target paths and the directory that must exist before the
/// downloads start.
pub fn resolve_get_destinations(
    sources: &[String],
    destination: &str,
    remote_separator: char,
    destination_is_dir: bool,
) -> Result<(Vec<PathBuf>, PathBuf)> {
    let target_is_dir = is_local_dir_target(destination) || destination_is_dir;
    if !target_is_dir && sources.len() > 1 {
        return Err(SessionError::AmbiguousDestination {
            destination: destination.to_string(),
        });
    }

    let base = if destination.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::from(destination)
    };

    if target_is_dir {
        let targets = sources
            .iter()
            .map(|source| base.join(basename(source, remote_separator)))
            .collect();
        Ok((targets, base))
    } else {
        let parent = match base.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((vec![base], parent))
    }
}

/// Local directory receiving a remote directory download.
///
/// An existing destination (or `.`) receives the source directory by name;
/// anything else is used verbatim.
pub fn resolve_get_directory_destination(
    source: &str,
    destination: &str,
    remote_separator: char,
    destination_exists: bool,
) -> PathBuf {
    if destination_exists || destination == "." || destination.is_empty() {
        let base = if destination.is_empty() { "." } else { destination };
        Path::new(base).join(basename(source, remote_separator))
    } else {
        PathBuf::from(destination)
    }
}

/// Remote targets for uploading `sources`.
///
/// `destination` must already be absolute. Returns the target paths and the
/// remote directory that must exist before the uploads start.
pub fn resolve_put_destinations(
    sources: &[PathBuf],
    destination: &str,
    separator: char,
    destination_is_dir: bool,
) -> Result<(Vec<String>, String)> {
    let target_is_dir = destination_is_dir || destination.ends_with(separator);
    if sources.len() > 1 && !target_is_dir {
        return Err(SessionError::AmbiguousDestination {
            destination: destination.to_string(),
        });
    }

    if target_is_dir {
        let dir = trim_trailing_separator(destination, separator).to_string();
        let targets = sources
            .iter()
            .map(|source| join(&dir, &local_name(source), separator))
            .collect();
        return Ok((targets, dir));
    }

    let dir = match destination.rsplit_once(separator) {
        Some(("", _)) => separator.to_string(),
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    };
    Ok((vec![destination.to_string()], dir))
}

/// Remote directory receiving a local directory upload.
///
/// `destination` must already be absolute.
pub fn resolve_put_directory_destination(
    source: &Path,
    destination: &str,
    separator: char,
    destination_is_dir: bool,
) -> String {
    let destination = trim_trailing_separator(destination, separator);
    if destination_is_dir {
        join(destination, &local_name(source), separator)
    } else {
        destination.to_string()
    }
}

fn local_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// The chain of directories leading to `path`, outermost first.
pub fn remote_ancestors(path: &str, separator: char) -> Vec<String> {
    let mut current = if path.starts_with(separator) {
        separator.to_string()
    } else {
        String::new()
    };
    let mut chain = Vec::new();
    for segment in path.split(separator).filter(|s| !s.is_empty()) {
        current = join(&current, segment, separator);
        chain.push(current.clone());
    }
    chain
}
