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

use std::net::{SocketAddr, ToSocketAddrs};

/// A re-implementation of [`ToSocketAddrs`] that also remembers the hostname.
///
/// The hostname is what `known_hosts` lookups are keyed on, which the resolved
/// [`SocketAddr`] alone cannot provide.
pub trait ToSocketAddrsWithHostname {
    type Iter: Iterator<Item = SocketAddr>;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter>;

    fn hostname(&self) -> String;
}

impl ToSocketAddrsWithHostname for SocketAddr {
    type Iter = std::option::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        ToSocketAddrs::to_socket_addrs(self)
    }

    fn hostname(&self) -> String {
        self.ip().to_string()
    }
}

impl ToSocketAddrsWithHostname for (&str, u16) {
    type Iter = std::vec::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        ToSocketAddrs::to_socket_addrs(self)
    }

    fn hostname(&self) -> String {
        self.0.to_string()
    }
}

impl ToSocketAddrsWithHostname for (String, u16) {
    type Iter = std::vec::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        ToSocketAddrs::to_socket_addrs(&(self.0.as_str(), self.1))
    }

    fn hostname(&self) -> String {
        self.0.clone()
    }
}

impl<T: ToSocketAddrsWithHostname + ?Sized> ToSocketAddrsWithHostname for &T {
    type Iter = T::Iter;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        (**self).to_socket_addrs()
    }

    fn hostname(&self) -> String {
        (**self).hostname()
    }
}
