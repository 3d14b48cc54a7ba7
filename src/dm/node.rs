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

//! Static data model metadata: a tree of endpoints, clusters and
//! attributes known at compile time. `Node` is the default
//! `DataModelProvider` and the fixture type used across the tests.

use core::fmt;

use crate::dm::attribute::Attribute;
use crate::dm::provider::DataModelProvider;
use crate::im::{AttrId, ClusterId, CmdId, EndptId};

/// The meta-data of a cluster: its ID, revision, feature map and the
/// attributes and commands it declares.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cluster<'a> {
    pub id: ClusterId,
    pub revision: u16,
    pub feature_map: u32,
    pub attributes: &'a [Attribute],
    pub commands: &'a [CmdId],
}

impl<'a> Cluster<'a> {
    pub const fn new(
        id: ClusterId,
        revision: u16,
        feature_map: u32,
        attributes: &'a [Attribute],
        commands: &'a [CmdId],
    ) -> Self {
        Self {
            id,
            revision,
            feature_map,
            attributes,
            commands,
        }
    }

    pub fn attribute(&self, id: AttrId) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.id == id)
    }
}

impl fmt::Display for Cluster<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.id)
    }
}

/// The meta-data of an endpoint: its ID and the clusters it hosts.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Endpoint<'a> {
    pub id: EndptId,
    pub clusters: &'a [Cluster<'a>],
}

impl<'a> Endpoint<'a> {
    pub const fn new(id: EndptId, clusters: &'a [Cluster<'a>]) -> Self {
        Self { id, clusters }
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster<'a>> {
        self.clusters.iter().find(|cluster| cluster.id == id)
    }
}

/// The root of the data model meta-data tree.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Node<'a> {
    pub id: u16,
    pub endpoints: &'a [Endpoint<'a>],
}

impl<'a> Node<'a> {
    pub const fn new(id: u16, endpoints: &'a [Endpoint<'a>]) -> Self {
        Self { id, endpoints }
    }

    pub fn endpoint(&self, id: EndptId) -> Option<&Endpoint<'a>> {
        self.endpoints.iter().find(|endpoint| endpoint.id == id)
    }
}

impl DataModelProvider for Node<'_> {
    fn endpoints(&self) -> impl Iterator<Item = EndptId> + '_ {
        self.endpoints.iter().map(|endpoint| endpoint.id)
    }

    fn clusters(&self, endpoint: EndptId) -> impl Iterator<Item = ClusterId> + '_ {
        self.endpoint(endpoint)
            .into_iter()
            .flat_map(|endpoint| endpoint.clusters.iter().map(|cluster| cluster.id))
    }

    fn attributes(
        &self,
        endpoint: EndptId,
        cluster: ClusterId,
    ) -> impl Iterator<Item = AttrId> + '_ {
        self.endpoint(endpoint)
            .and_then(|endpoint| endpoint.cluster(cluster))
            .into_iter()
            .flat_map(|cluster| cluster.attributes.iter().map(|attr| attr.id))
    }
}
