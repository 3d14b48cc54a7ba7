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

//! Expansion of wildcard attribute paths into concrete
//! endpoint/cluster/attribute triples against a live data model.

use crate::dm::attribute::Attribute;
use crate::dm::paths::{AttrPath, ConcreteAttrPath, ConcreteClusterPath};
use crate::dm::provider::{DataModelProvider, SearchSession};
use crate::im::{AttrId, ClusterId, EndptId};

/// The attribute position within the current cluster.
///
/// Enumeration is two-phase: the cluster-specific attributes first, in
/// provider order, then the global (system) attributes, so that globals
/// always sort last within their cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum AttrCursor {
    NonGlobal(usize),
    Global(usize),
}

impl AttrCursor {
    const fn start() -> Self {
        Self::NonGlobal(0)
    }
}

/// Indices of the next triple candidate within the current path spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct Cursor {
    path: usize,
    endpoint: usize,
    cluster: usize,
    attr: AttrCursor,
}

impl Cursor {
    const fn start_of(path: usize) -> Self {
        Self {
            path,
            endpoint: 0,
            cluster: 0,
            attr: AttrCursor::start(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    /// No advance has happened yet. The implicit first advance is
    /// deferred to the first `get`/`next_path` call, because advancing
    /// needs a `SearchSession` the constructor does not have.
    Unstarted,
    Expanding(Cursor),
    Exhausted,
}

/// A stateful, resumable expansion of a list of (possibly wildcarded)
/// attribute path specifications.
///
/// The expander borrows the path list; the caller owns it and must keep
/// it unchanged for the expander's lifetime, except via [`reset_to`]
/// and [`reset_current_cluster`].
///
/// For a fixed data model, successive `next_path` calls produce each
/// implied concrete triple exactly once, in canonical nested order
/// (endpoint, then cluster, then attribute, globals last per cluster).
///
/// [`reset_to`]: AttrPathExpander::reset_to
/// [`reset_current_cluster`]: AttrPathExpander::reset_current_cluster
pub struct AttrPathExpander<'a> {
    paths: &'a [AttrPath],
    state: State,
    current: ConcreteAttrPath,
}

impl<'a> AttrPathExpander<'a> {
    pub const fn new(paths: &'a [AttrPath]) -> Self {
        Self {
            paths,
            state: State::Unstarted,
            current: ConcreteAttrPath::new(0, 0, 0),
        }
    }

    /// Re-seed the expander with a new path list, as when the set of
    /// paths being serviced changes between chunks of a report.
    pub fn reset_to(&mut self, paths: &'a [AttrPath]) {
        self.paths = paths;
        self.state = State::Unstarted;
    }

    /// Rewind the attribute cursor to the start of the current cluster,
    /// keeping the endpoint/cluster position.
    ///
    /// Used when attribute membership may have changed mid-enumeration
    /// (e.g. a list attribute being mutated), so a client does not
    /// observe a torn view. The next `next_path` re-produces the
    /// cluster's first attribute.
    pub fn reset_current_cluster(&mut self) {
        if let State::Expanding(cursor) = &mut self.state {
            cursor.attr = AttrCursor::start();
        }
    }

    /// The path spec currently being expanded, if any.
    pub fn current_spec(&self) -> Option<&'a AttrPath> {
        if let State::Expanding(cursor) = &self.state {
            self.paths.get(cursor.path)
        } else {
            None
        }
    }

    /// The most recently produced concrete path.
    ///
    /// Behaves as if `next_path` had been called once during
    /// construction: the first `get` on a fresh expander performs the
    /// deferred initial advance, so `get` alone yields the first valid
    /// path. `get` never advances otherwise. Returns `None` once the
    /// expansion is exhausted.
    pub fn get<P: DataModelProvider>(
        &mut self,
        session: &SearchSession<'_, P>,
    ) -> Option<ConcreteAttrPath> {
        if matches!(self.state, State::Unstarted) {
            self.next_path(session);
        }

        matches!(self.state, State::Expanding(_)).then_some(self.current)
    }

    /// Advance to the next concrete path implied by the path list.
    ///
    /// Returns `false` exactly when every path spec has been fully
    /// expanded; the expander is then terminal until `reset_to`.
    pub fn next_path<P: DataModelProvider>(&mut self, session: &SearchSession<'_, P>) -> bool {
        let mut cursor = match self.state {
            State::Unstarted => Cursor::start_of(0),
            State::Expanding(cursor) => cursor,
            State::Exhausted => return false,
        };

        loop {
            let Some(spec) = self.paths.get(cursor.path) else {
                self.state = State::Exhausted;
                return false;
            };

            let Some(endpoint) = Self::endpoint_at(spec, session, cursor.endpoint) else {
                // This spec is exhausted (or names a non-existent
                // endpoint); move on to the next one
                cursor = Cursor::start_of(cursor.path + 1);
                continue;
            };

            let Some(cluster) = Self::cluster_at(spec, session, endpoint, cursor.cluster) else {
                cursor.endpoint += 1;
                cursor.cluster = 0;
                cursor.attr = AttrCursor::start();
                continue;
            };

            let Some((attr, attr_cursor)) =
                Self::attr_at(spec, session, endpoint, cluster, cursor.attr)
            else {
                cursor.cluster += 1;
                cursor.attr = AttrCursor::start();
                continue;
            };

            cursor.attr = attr_cursor;
            self.current = ConcreteAttrPath::new(endpoint, cluster, attr);
            self.state = State::Expanding(cursor);

            return true;
        }
    }

    fn endpoint_at<P: DataModelProvider>(
        spec: &AttrPath,
        session: &SearchSession<'_, P>,
        index: usize,
    ) -> Option<EndptId> {
        match spec.endpoint {
            Some(endpoint) => {
                (index == 0 && session.provider().endpoint_exists(endpoint)).then_some(endpoint)
            }
            None => session.provider().endpoints().nth(index),
        }
    }

    fn cluster_at<P: DataModelProvider>(
        spec: &AttrPath,
        session: &SearchSession<'_, P>,
        endpoint: EndptId,
        index: usize,
    ) -> Option<ClusterId> {
        match spec.cluster {
            Some(cluster) => (index == 0
                && session.cluster_exists(&ConcreteClusterPath::new(endpoint, cluster)))
            .then_some(cluster),
            None => session.provider().clusters(endpoint).nth(index),
        }
    }

    fn attr_at<P: DataModelProvider>(
        spec: &AttrPath,
        session: &SearchSession<'_, P>,
        endpoint: EndptId,
        cluster: ClusterId,
        cursor: AttrCursor,
    ) -> Option<(AttrId, AttrCursor)> {
        match spec.attr {
            Some(attr) => {
                // A concrete ID unknown to the model is a skip, not an
                // error: the spec simply yields nothing
                (cursor == AttrCursor::start()
                    && session.is_valid_attr_id(&ConcreteAttrPath::new(endpoint, cluster, attr)))
                .then_some((attr, AttrCursor::NonGlobal(1)))
            }
            None => {
                if let AttrCursor::NonGlobal(index) = cursor {
                    if let Some(attr) = session
                        .provider()
                        .attributes(endpoint, cluster)
                        .filter(|attr| !Attribute::is_system_attr(*attr))
                        .nth(index)
                    {
                        return Some((attr, AttrCursor::NonGlobal(index + 1)));
                    }
                }

                let index = match cursor {
                    // Non-global phase just ran dry; switch phases
                    AttrCursor::NonGlobal(_) => 0,
                    AttrCursor::Global(index) => index,
                };

                session
                    .provider()
                    .attributes(endpoint, cluster)
                    .filter(|attr| Attribute::is_system_attr(*attr))
                    .nth(index)
                    .map(|attr| (attr, AttrCursor::Global(index + 1)))
            }
        }
    }
}
