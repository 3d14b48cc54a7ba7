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

use crate::im::{AttrId, ClusterId, CmdId, EndptId, GenericPath};

/// A wildcard-capable attribute path specification, as supplied by the
/// peer in a read/subscribe/write request.
///
/// The path list handed to the expander is a slice of these; the caller
/// retains ownership and must keep it unchanged for the lifetime of the
/// expansion, except via the expander's explicit reset operations.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttrPath {
    pub endpoint: Option<EndptId>,
    pub cluster: Option<ClusterId>,
    pub attr: Option<AttrId>,
    pub list_index: Option<u16>,
}

impl AttrPath {
    pub const fn new(
        endpoint: Option<EndptId>,
        cluster: Option<ClusterId>,
        attr: Option<AttrId>,
    ) -> Self {
        Self {
            endpoint,
            cluster,
            attr,
            list_index: None,
        }
    }

    pub const fn is_wildcard(&self) -> bool {
        self.to_generic().is_wildcard()
    }

    pub const fn to_generic(&self) -> GenericPath {
        GenericPath::new(self.endpoint, self.cluster, self.attr)
    }
}

/// A fully resolved attribute path; the key type produced by expansion
/// and consumed by the read/write dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConcreteAttrPath {
    pub endpoint: EndptId,
    pub cluster: ClusterId,
    pub attr: AttrId,
}

impl ConcreteAttrPath {
    pub const fn new(endpoint: EndptId, cluster: ClusterId, attr: AttrId) -> Self {
        Self {
            endpoint,
            cluster,
            attr,
        }
    }

    pub const fn cluster_path(&self) -> ConcreteClusterPath {
        ConcreteClusterPath::new(self.endpoint, self.cluster)
    }
}

/// A fully resolved cluster path; the key type of the server-cluster
/// registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConcreteClusterPath {
    pub endpoint: EndptId,
    pub cluster: ClusterId,
}

impl ConcreteClusterPath {
    pub const fn new(endpoint: EndptId, cluster: ClusterId) -> Self {
        Self { endpoint, cluster }
    }
}

/// A fully resolved command path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConcreteCmdPath {
    pub endpoint: EndptId,
    pub cluster: ClusterId,
    pub cmd: CmdId,
}

impl ConcreteCmdPath {
    pub const fn new(endpoint: EndptId, cluster: ClusterId, cmd: CmdId) -> Self {
        Self {
            endpoint,
            cluster,
            cmd,
        }
    }
}
