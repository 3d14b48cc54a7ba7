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

//! Interaction Model base types: id aliases, wildcardable paths and the
//! IM status codes reported per-path in responses.

use strum::FromRepr;

use crate::error::{Error, ErrorCode};

pub mod invoke;

pub type EndptId = u16;
pub type ClusterId = u32;
pub type AttrId = u32;
pub type CmdId = u32;
pub type NodeId = u64;

/// A generic path to an endpoint, a cluster within the endpoint, or a leaf
/// (attribute, command or event) within the cluster.
///
/// `None` at any position designates a wildcard.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GenericPath {
    pub endpoint: Option<EndptId>,
    pub cluster: Option<ClusterId>,
    pub leaf: Option<u32>,
}

impl GenericPath {
    pub const fn new(
        endpoint: Option<EndptId>,
        cluster: Option<ClusterId>,
        leaf: Option<u32>,
    ) -> Self {
        Self {
            endpoint,
            cluster,
            leaf,
        }
    }

    pub const fn is_wildcard(&self) -> bool {
        !matches!(
            *self,
            Self {
                endpoint: Some(_),
                cluster: Some(_),
                leaf: Some(_),
            }
        )
    }
}

/// Interaction Model status codes, as put on the wire in `StatusIB`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum IMStatusCode {
    Success = 0,
    Failure = 1,
    InvalidSubscription = 0x7D,
    UnsupportedAccess = 0x7E,
    UnsupportedEndpoint = 0x7F,
    InvalidAction = 0x80,
    UnsupportedCommand = 0x81,
    InvalidCommand = 0x85,
    UnsupportedAttribute = 0x86,
    ConstraintError = 0x87,
    UnsupportedWrite = 0x88,
    ResourceExhausted = 0x89,
    NotFound = 0x8b,
    UnreportableAttribute = 0x8c,
    InvalidDataType = 0x8d,
    UnsupportedRead = 0x8f,
    DataVersionMismatch = 0x92,
    Timeout = 0x94,
    Busy = 0x9c,
    UnsupportedCluster = 0xc3,
    NoUpstreamSubscription = 0xc5,
    NeedsTimedInteraction = 0xc6,
    UnsupportedEvent = 0xc7,
    PathsExhausted = 0xc8,
}

impl From<&Error> for IMStatusCode {
    fn from(e: &Error) -> Self {
        match e.code() {
            ErrorCode::EndpointNotFound => Self::UnsupportedEndpoint,
            ErrorCode::ClusterNotFound => Self::UnsupportedCluster,
            ErrorCode::AttributeNotFound | ErrorCode::NotFound => Self::UnsupportedAttribute,
            ErrorCode::CommandNotFound => Self::UnsupportedCommand,
            ErrorCode::InvalidAction => Self::InvalidAction,
            ErrorCode::InvalidCommand => Self::InvalidCommand,
            ErrorCode::NoSpace | ErrorCode::BufferTooSmall | ErrorCode::ResourceExhausted => {
                Self::ResourceExhausted
            }
            ErrorCode::Busy => Self::Busy,
            _ => Self::Failure,
        }
    }
}

impl From<Error> for IMStatusCode {
    fn from(e: Error) -> Self {
        Self::from(&e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_detection() {
        assert!(GenericPath::new(None, Some(0x31), Some(1)).is_wildcard());
        assert!(GenericPath::new(Some(0), None, Some(1)).is_wildcard());
        assert!(GenericPath::new(Some(0), Some(0x31), None).is_wildcard());
        assert!(!GenericPath::new(Some(0), Some(0x31), Some(1)).is_wildcard());
    }

    #[test]
    fn test_status_from_error() {
        assert_eq!(
            IMStatusCode::from(Error::new(ErrorCode::AttributeNotFound)),
            IMStatusCode::UnsupportedAttribute
        );
        assert_eq!(
            IMStatusCode::from(Error::new(ErrorCode::Duplicate)),
            IMStatusCode::Failure
        );
    }
}
