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

use core::cell::Cell;

use crate::dm::attribute::Attribute;
use crate::dm::paths::{ConcreteAttrPath, ConcreteClusterPath};
use crate::im::{AttrId, ClusterId, EndptId};

/// The enumeration surface of a live data model.
///
/// Implementations expose which endpoints, clusters and attributes
/// currently exist; the path expander and the dispatch layers treat this
/// as authoritative and read-only for the duration of one expansion pass.
///
/// Enumeration order is the canonical reporting order: implementations
/// must yield IDs in a stable, ascending order for a fixed model.
pub trait DataModelProvider {
    fn endpoints(&self) -> impl Iterator<Item = EndptId> + '_;

    fn clusters(&self, endpoint: EndptId) -> impl Iterator<Item = ClusterId> + '_;

    fn attributes(&self, endpoint: EndptId, cluster: ClusterId)
        -> impl Iterator<Item = AttrId> + '_;

    fn endpoint_exists(&self, endpoint: EndptId) -> bool {
        self.endpoints().any(|ep| ep == endpoint)
    }

    fn cluster_exists(&self, path: &ConcreteClusterPath) -> bool {
        self.clusters(path.endpoint).any(|cl| cl == path.cluster)
    }

    fn attr_exists(&self, path: &ConcreteAttrPath) -> bool {
        self.attributes(path.endpoint, path.cluster)
            .any(|attr| attr == path.attr)
    }
}

/// A short-lived cursor over a data model provider.
///
/// Wraps the provider reference together with a one-slot cache of the
/// last cluster path confirmed to exist, so that repeated traversal
/// steps within one cluster skip the re-scan.
///
/// The borrow makes the session non-storable: it must not outlive the
/// enclosing "produce a chunk of results" loop, since the cache is only
/// coherent while the model is not re-entered.
pub struct SearchSession<'a, P> {
    provider: &'a P,
    cluster_hit: Cell<Option<ConcreteClusterPath>>,
}

impl<'a, P: DataModelProvider> SearchSession<'a, P> {
    pub const fn new(provider: &'a P) -> Self {
        Self {
            provider,
            cluster_hit: Cell::new(None),
        }
    }

    pub fn provider(&self) -> &'a P {
        self.provider
    }

    /// Whether the cluster path exists in the model, served from the
    /// one-slot cache when possible.
    pub fn cluster_exists(&self, path: &ConcreteClusterPath) -> bool {
        if self.cluster_hit.get() == Some(*path) {
            return true;
        }

        let exists = self.provider.cluster_exists(path);
        if exists {
            self.cluster_hit.set(Some(*path));
        }

        exists
    }

    /// Whether the attribute ID is addressable on its cluster: either
    /// enumerated by the provider, or one of the global attributes that
    /// every cluster carries.
    pub fn is_valid_attr_id(&self, path: &ConcreteAttrPath) -> bool {
        Attribute::is_always_present(path.attr) || self.provider.attr_exists(path)
    }
}
