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

//! Registration and lifecycle of server cluster implementations, keyed
//! by concrete cluster path.

use core::cell::Cell;

use crate::dm::access::AttrPersistence;
use crate::dm::paths::ConcreteClusterPath;
use crate::error::{Error, ErrorCode};

/// The shared dependencies handed to every registered cluster at
/// startup.
#[derive(Clone, Copy)]
pub struct ServerClusterContext<'a> {
    storage: &'a dyn AttrPersistence,
}

impl<'a> ServerClusterContext<'a> {
    pub const fn new(storage: &'a dyn AttrPersistence) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &'a dyn AttrPersistence {
        self.storage
    }
}

impl PartialEq for ServerClusterContext<'_> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(
            self.storage as *const _ as *const (),
            other.storage as *const _ as *const (),
        )
    }
}

impl Eq for ServerClusterContext<'_> {}

/// The runtime object implementing one or more clusters' behavior.
///
/// `startup` and `shutdown` are balanced by the registry: an
/// implementation observes `shutdown` if and only if it ever observed a
/// context, even if that `startup` returned an error.
pub trait ServerCluster {
    /// The concrete cluster paths this implementation answers for.
    /// Must be non-empty and must not change while registered.
    fn paths(&self) -> &[ConcreteClusterPath];

    fn startup(&self, context: &ServerClusterContext) -> Result<(), Error>;

    fn shutdown(&self);
}

fn same_instance(first: &dyn ServerCluster, second: &dyn ServerCluster) -> bool {
    core::ptr::eq(
        first as *const _ as *const (),
        second as *const _ as *const (),
    )
}

/// Maps a concrete cluster path to the single responsible
/// [`ServerCluster`], owning the registration set and the context
/// lifecycle.
pub struct ServerClusterRegistry<'a, const N: usize> {
    registrations: heapless::Vec<&'a dyn ServerCluster, N>,
    // One-slot lookup accelerator; (path, registration index)
    cache: Cell<Option<(ConcreteClusterPath, usize)>>,
    context: Option<ServerClusterContext<'a>>,
}

impl<'a, const N: usize> Default for ServerClusterRegistry<'a, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> ServerClusterRegistry<'a, N> {
    pub const fn new() -> Self {
        Self {
            registrations: heapless::Vec::new(),
            cache: Cell::new(None),
            context: None,
        }
    }

    /// Register a cluster implementation.
    ///
    /// Fails with `InvalidArgument` for an empty path set or an
    /// instance that is already registered, and with `Duplicate` if any
    /// claimed path is already claimed by another registration (the
    /// scan is O(n²) over the path sets).
    ///
    /// If a context is already active, the new registration is started
    /// immediately; a startup error is logged but does not undo the
    /// registration, which will still observe `shutdown` later.
    pub fn register(&mut self, cluster: &'a dyn ServerCluster) -> Result<(), Error> {
        if cluster.paths().is_empty() {
            Err(ErrorCode::InvalidArgument)?;
        }

        if self
            .registrations
            .iter()
            .any(|existing| same_instance(*existing, cluster))
        {
            Err(ErrorCode::InvalidArgument)?;
        }

        for existing in &self.registrations {
            for path in existing.paths() {
                if cluster.paths().contains(path) {
                    error!(
                        "Cluster path {:?} already registered",
                        path
                    );
                    Err(ErrorCode::Duplicate)?;
                }
            }
        }

        self.registrations
            .push(cluster)
            .map_err(|_| ErrorCode::NoSpace)?;

        if let Some(context) = &self.context {
            if let Err(err) = cluster.startup(context) {
                warn!("Cluster startup failed during registration: {:?}", err);
            }
        }

        Ok(())
    }

    /// Unregister by identity; unknown instances are ignored.
    ///
    /// If a context is active, the instance is shut down on the way
    /// out.
    pub fn unregister(&mut self, cluster: &dyn ServerCluster) {
        let Some(index) = self
            .registrations
            .iter()
            .position(|existing| same_instance(*existing, cluster))
        else {
            return;
        };

        // Indices shift on removal, so drop the cache wholesale
        self.cache.set(None);
        self.registrations.remove(index);

        if self.context.is_some() {
            cluster.shutdown();
        }
    }

    /// The implementation responsible for `path`; O(1) on a repeat
    /// lookup, O(n) otherwise.
    pub fn get(&self, path: &ConcreteClusterPath) -> Option<&'a dyn ServerCluster> {
        if let Some((cached_path, index)) = self.cache.get() {
            if cached_path == *path {
                return self.registrations.get(index).copied();
            }
        }

        let (index, cluster) = self
            .registrations
            .iter()
            .enumerate()
            .find(|(_, cluster)| cluster.paths().contains(path))?;

        self.cache.set(Some((*path, index)));

        Some(*cluster)
    }

    /// Activate `context`, starting every registration under it.
    ///
    /// Idempotent under value equality of the context. Otherwise any
    /// previous context is cleared first (shutting everyone down), and
    /// then `startup` is attempted on every registration; individual
    /// failures are logged and aggregated into `HadFailures` rather
    /// than short-circuiting, so one misbehaving cluster does not keep
    /// the rest from initializing.
    pub fn set_context(&mut self, context: ServerClusterContext<'a>) -> Result<(), Error> {
        if self.context.as_ref() == Some(&context) {
            return Ok(());
        }

        self.clear_context();
        self.context = Some(context);

        let mut had_failures = false;
        for cluster in &self.registrations {
            if let Err(err) = cluster.startup(&context) {
                warn!("Cluster startup failed: {:?}", err);
                had_failures = true;
            }
        }

        if had_failures {
            Err(ErrorCode::HadFailures)?;
        }

        Ok(())
    }

    /// Deactivate the context, if any, shutting every registration
    /// down.
    pub fn clear_context(&mut self) {
        if self.context.take().is_some() {
            for cluster in &self.registrations {
                cluster.shutdown();
            }
        }
    }

    pub fn context(&self) -> Option<&ServerClusterContext<'a>> {
        self.context.as_ref()
    }
}

impl<const N: usize> Drop for ServerClusterRegistry<'_, N> {
    fn drop(&mut self) {
        self.clear_context();
    }
}
