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

//! Indexed, aliased collection of open sessions with one current session.
//!
//! Indices start at 1 and are never reused until [`SessionRegistry::close_all`].
//! Closing a session empties its slot; other sessions keep their index.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ConnectOptions, Session, SessionInfo};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Vec<Option<Session>>,
    aliases: HashMap<String, usize>,
    current: Option<usize>,
    defaults: SessionConfig,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: SessionConfig) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    /// Settings new sessions start from.
    pub fn defaults(&self) -> &SessionConfig {
        &self.defaults
    }

    pub fn defaults_mut(&mut self) -> &mut SessionConfig {
        &mut self.defaults
    }

    /// A copy of the defaults targeting `host`.
    pub fn config_for(&self, host: impl Into<String>) -> SessionConfig {
        SessionConfig {
            host: host.into(),
            ..self.defaults.clone()
        }
    }

    /// Adds `session`, makes it current and returns its index.
    ///
    /// The session's alias now resolves to it, even if an older session
    /// registered the same alias.
    pub fn register(&mut self, mut session: Session) -> usize {
        let index = self.slots.len() + 1;
        session.assign_index(index);
        if let Some(alias) = session.alias() {
            self.aliases.insert(alias.to_string(), index);
        }
        tracing::debug!(
            "Registered session {} ({}) as index {}",
            session.config().host,
            session.alias().unwrap_or("-"),
            index
        );
        self.slots.push(Some(session));
        self.current = Some(index);
        index
    }

    /// Opens a session and registers it.
    ///
    /// With `jump_host`, the connection is tunneled through that registered
    /// session, which must stay open for as long as the new one is used.
    pub async fn connect(
        &mut self,
        config: SessionConfig,
        options: ConnectOptions,
        jump_host: Option<&str>,
    ) -> Result<usize> {
        let session = match jump_host {
            Some(id) => {
                let jump = Arc::clone(self.get(id)?.transport());
                tracing::info!(
                    "Connecting to {}:{} through session '{}'",
                    config.host,
                    config.port,
                    id
                );
                Session::connect_via(config, options, jump).await?
            }
            None => Session::connect(config, options).await?,
        };
        Ok(self.register(session))
    }

    /// Makes the session named by `index_or_alias` current.
    ///
    /// Returns the index that was current before, if any.
    pub fn switch(&mut self, index_or_alias: &str) -> Result<Option<usize>> {
        let index = self.resolve(index_or_alias)?;
        let previous = self.current.replace(index);
        tracing::debug!("Switched session {:?} -> {}", previous, index);
        Ok(previous)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Result<&Session> {
        let index = self.current.ok_or(SessionError::NoCurrentSession)?;
        self.slot(index).ok_or(SessionError::NoCurrentSession)
    }

    pub fn current_mut(&mut self) -> Result<&mut Session> {
        let index = self.current.ok_or(SessionError::NoCurrentSession)?;
        self.slot_mut(index).ok_or(SessionError::NoCurrentSession)
    }

    /// Looks up a session without changing the current one.
    pub fn get(&self, index_or_alias: &str) -> Result<&Session> {
        let index = self.resolve(index_or_alias)?;
        self.slot(index)
            .ok_or_else(|| SessionError::NotFound(index_or_alias.to_string()))
    }

    pub fn get_mut(&mut self, index_or_alias: &str) -> Result<&mut Session> {
        let index = self.resolve(index_or_alias)?;
        self.slot_mut(index)
            .ok_or_else(|| SessionError::NotFound(index_or_alias.to_string()))
    }

    /// Settings of the named session, or of the current one.
    ///
    /// Without an argument and without a current session, returns the
    /// placeholder info (index 0, empty host).
    pub fn get_info(&self, index_or_alias: Option<&str>) -> Result<SessionInfo> {
        match index_or_alias {
            Some(id) => Ok(self.get(id)?.info()),
            None => Ok(self
                .current()
                .map(Session::info)
                .unwrap_or_default()),
        }
    }

    /// Open sessions in index order.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.sessions().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the current session and leaves its slot empty.
    pub async fn close_current(&mut self) -> Result<()> {
        let Some(index) = self.current.take() else {
            return Ok(());
        };
        let Some(mut session) = self.slots.get_mut(index - 1).and_then(Option::take) else {
            return Ok(());
        };
        if let Some(alias) = session.alias() {
            if self.aliases.get(alias) == Some(&index) {
                self.aliases.remove(alias);
            }
        }
        session.close().await
    }

    /// Closes every session and restarts numbering at 1.
    ///
    /// Every session is closed even when some fail; the first error is
    /// returned.
    pub async fn close_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for mut session in self.slots.drain(..).flatten() {
            if let Err(e) = session.close().await {
                tracing::warn!("Failed to close session {}: {}", session.index(), e);
                first_error.get_or_insert(e);
            }
        }
        self.aliases.clear();
        self.current = None;
        first_error.map_or(Ok(()), Err)
    }

    /// Alias first, then a 1-based index.
    fn resolve(&self, index_or_alias: &str) -> Result<usize> {
        let not_found = || SessionError::NotFound(index_or_alias.to_string());
        let index = match self.aliases.get(index_or_alias) {
            Some(&index) => index,
            None => index_or_alias.trim().parse::<usize>().map_err(|_| not_found())?,
        };
        if self.slot(index).is_none() {
            return Err(not_found());
        }
        Ok(index)
    }

    fn slot(&self, index: usize) -> Option<&Session> {
        index
            .checked_sub(1)
            .and_then(|i| self.slots.get(i))
            .and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, index: usize) -> Option<&mut Session> {
        index
            .checked_sub(1)
            .and_then(|i| self.slots.get_mut(i))
            .and_then(Option::as_mut)
    }
}
