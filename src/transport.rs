/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! Secure channel establishment and operational device connections.

use core::fmt;
use core::net::SocketAddr;

use crate::im::NodeId;

pub mod channel;
pub mod device;

/// A resolved transport address of a peer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Address {
    Udp(SocketAddr),
    Tcp(SocketAddr),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp(addr) => write!(f, "UDP {}", addr),
            Self::Tcp(addr) => write!(f, "TCP {}", addr),
        }
    }
}

/// The operational identity of a peer node within a fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerId {
    pub compressed_fabric_id: u64,
    pub node_id: NodeId,
}

impl PeerId {
    pub const fn new(compressed_fabric_id: u64, node_id: NodeId) -> Self {
        Self {
            compressed_fabric_id,
            node_id,
        }
    }
}

/// How a secure session is (to be) authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionMode {
    /// Certificate-based (operational)
    Case,
    /// Passcode-based (commissioning)
    Pase,
}

/// The caller-specified profile of a channel to be established.
///
/// Two channel requests with equal builders can share one channel; the
/// equality is what [`channel::ChannelContext::matches_builder`]
/// consults for coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelBuilder {
    pub peer: PeerId,
    pub mode: SessionMode,
    /// Attempt CASE session resumption with cached resumption state
    pub session_resumption: bool,
}

impl ChannelBuilder {
    pub const fn new(peer: PeerId, mode: SessionMode) -> Self {
        Self {
            peer,
            mode,
            session_resumption: false,
        }
    }
}

/// A handle to an established, authenticated session, the substrate for
/// exchange creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecureSessionHandle {
    pub id: u16,
    pub peer: PeerId,
    pub mode: SessionMode,
}

impl SecureSessionHandle {
    pub const fn new(id: u16, peer: PeerId, mode: SessionMode) -> Self {
        Self { id, peer, mode }
    }
}
