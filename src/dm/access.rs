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

//! Cluster-specific attribute access overrides and their dispatch.
//!
//! Overrides are consulted before the generic storage-backed attribute
//! path. An override can fully handle an access, fail it, or fall
//! through; falling through is signaled by returning `Ok` while leaving
//! the encoder/decoder untouched.

use crate::error::{Error, ErrorCode};
use crate::im::{ClusterId, EndptId};
use crate::utils::writebuf::WriteBuf;

use super::paths::ConcreteAttrPath;

/// The value sink handed to attribute `read` implementations.
///
/// Tracks whether the implementation actually produced data: dispatch
/// distinguishes "handled" from "fall through" by this, not by the
/// return code.
pub struct AttrValueEncoder<'a, 'b> {
    writer: &'a mut WriteBuf<'b>,
    anchor: usize,
    touched: bool,
}

impl<'a, 'b> AttrValueEncoder<'a, 'b> {
    pub fn new(writer: &'a mut WriteBuf<'b>) -> Self {
        let anchor = writer.get_tail();

        Self {
            writer,
            anchor,
            touched: false,
        }
    }

    /// Grab the output writer, marking the encoder as touched.
    pub fn writer(&mut self) -> &mut WriteBuf<'b> {
        self.touched = true;
        self.writer
    }

    pub fn touched(&self) -> bool {
        self.touched
    }

    /// The bytes produced via this encoder so far.
    pub fn encoded(&self) -> &[u8] {
        self.writer.since(self.anchor)
    }

    /// Discard any partially produced data.
    pub fn rollback(&mut self) {
        self.writer.rewind_tail_to(self.anchor);
        self.touched = false;
    }
}

/// The value source handed to attribute `write` implementations, with
/// the same touched-tracking contract as the encoder.
pub struct AttrValueDecoder<'a> {
    data: &'a [u8],
    touched: bool,
}

impl<'a> AttrValueDecoder<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            touched: false,
        }
    }

    /// Take the incoming value, marking the decoder as touched.
    pub fn take(&mut self) -> &'a [u8] {
        self.touched = true;
        self.data
    }

    pub fn touched(&self) -> bool {
        self.touched
    }
}

/// A cluster-specific attribute access override.
///
/// Scoped to one cluster ID on either one endpoint or (when
/// `endpoint()` is `None`) all endpoints. Constructed by cluster code
/// at init time and registered with an [`AttrAccessRegistry`].
pub trait AttrAccess {
    /// The endpoint scope; `None` matches all endpoints.
    fn endpoint(&self) -> Option<EndptId>;

    fn cluster(&self) -> ClusterId;

    fn read(&self, path: &ConcreteAttrPath, encoder: &mut AttrValueEncoder) -> Result<(), Error>;

    fn write(&self, path: &ConcreteAttrPath, decoder: &mut AttrValueDecoder) -> Result<(), Error> {
        let _ = (path, decoder);

        // Untouched, so the write falls through to generic storage
        Ok(())
    }

    /// Called once before the run of writes composing one logical
    /// list-replacement operation.
    fn on_list_write_begin(&self, path: &ConcreteAttrPath) {
        let _ = path;
    }

    /// Called once after the run of writes composing one logical
    /// list-replacement operation. When `successful` is `false`, the
    /// override must discard any partial in-progress list state and
    /// leave the previously committed value unchanged.
    fn on_list_write_end(&self, path: &ConcreteAttrPath, successful: bool) {
        let _ = (path, successful);
    }

    fn matches(&self, endpoint: EndptId, cluster: ClusterId) -> bool {
        self.cluster() == cluster && self.endpoint().map_or(true, |ep| ep == endpoint)
    }
}

/// Whether two overrides could claim the same attribute: same cluster,
/// and overlapping endpoint scope. Used to reject double registration.
fn conflicts(first: &dyn AttrAccess, second: &dyn AttrAccess) -> bool {
    first.cluster() == second.cluster()
        && match (first.endpoint(), second.endpoint()) {
            (Some(first_ep), Some(second_ep)) => first_ep == second_ep,
            _ => true,
        }
}

/// The generic, storage-backed attribute access every override can fall
/// through to.
pub trait AttrPersistence {
    fn read(&self, path: &ConcreteAttrPath, encoder: &mut AttrValueEncoder) -> Result<(), Error>;

    fn write(&self, path: &ConcreteAttrPath, decoder: &mut AttrValueDecoder) -> Result<(), Error>;
}

/// An ordered collection of attribute access overrides, with
/// first-match dispatch and fall-through to generic storage.
pub struct AttrAccessRegistry<'a, const N: usize> {
    handlers: heapless::Vec<&'a dyn AttrAccess, N>,
}

impl<'a, const N: usize> Default for AttrAccessRegistry<'a, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> AttrAccessRegistry<'a, N> {
    pub const fn new() -> Self {
        Self {
            handlers: heapless::Vec::new(),
        }
    }

    /// Register an override. Fails with `Duplicate` if an already
    /// registered override could claim the same attribute.
    pub fn register(&mut self, handler: &'a dyn AttrAccess) -> Result<(), Error> {
        if self
            .handlers
            .iter()
            .any(|existing| conflicts(*existing, handler))
        {
            error!(
                "Duplicate attribute access registration for cluster {:#04x}",
                handler.cluster()
            );
            Err(ErrorCode::Duplicate)?;
        }

        self.handlers
            .push(handler)
            .map_err(|_| ErrorCode::NoSpace)?;

        Ok(())
    }

    /// Unregister by identity. Unknown handlers are ignored.
    pub fn unregister(&mut self, handler: &dyn AttrAccess) {
        if let Some(index) = self
            .handlers
            .iter()
            .position(|existing| core::ptr::eq(*existing as *const _ as *const (), handler as *const _ as *const ()))
        {
            self.handlers.remove(index);
        }
    }

    /// The first registered override matching the given position, in
    /// registration order.
    pub fn get(&self, endpoint: EndptId, cluster: ClusterId) -> Option<&'a dyn AttrAccess> {
        self.handlers
            .iter()
            .find(|handler| handler.matches(endpoint, cluster))
            .copied()
    }

    /// Read `path`, consulting the matching override first and falling
    /// back to `storage` if the override left the encoder untouched.
    ///
    /// An override error discards any partial encode and surfaces as
    /// the attribute's status; it never aborts the enclosing
    /// transaction.
    pub fn read(
        &self,
        path: &ConcreteAttrPath,
        encoder: &mut AttrValueEncoder,
        storage: &dyn AttrPersistence,
    ) -> Result<(), Error> {
        if let Some(handler) = self.get(path.endpoint, path.cluster) {
            if let Err(err) = handler.read(path, encoder) {
                encoder.rollback();
                return Err(err);
            }

            if encoder.touched() {
                return Ok(());
            }
        }

        storage.read(path, encoder)
    }

    /// Write `path`, with the same override-then-fallback contract as
    /// `read`.
    pub fn write(
        &self,
        path: &ConcreteAttrPath,
        decoder: &mut AttrValueDecoder,
        storage: &dyn AttrPersistence,
    ) -> Result<(), Error> {
        if let Some(handler) = self.get(path.endpoint, path.cluster) {
            handler.write(path, decoder)?;

            if decoder.touched() {
                return Ok(());
            }
        }

        storage.write(path, decoder)
    }

    /// Apply a run of writes composing one logical list replacement,
    /// bracketing them with the override's list-write notifications.
    ///
    /// The brackets fire at most once regardless of how many chunks
    /// compose the operation; the end notification reports whether
    /// every chunk applied cleanly.
    pub fn write_list<'c>(
        &self,
        path: &ConcreteAttrPath,
        chunks: impl IntoIterator<Item = &'c [u8]>,
        storage: &dyn AttrPersistence,
    ) -> Result<(), Error> {
        let handler = self.get(path.endpoint, path.cluster);

        if let Some(handler) = handler {
            handler.on_list_write_begin(path);
        }

        let mut result = Ok(());
        for chunk in chunks {
            let mut decoder = AttrValueDecoder::new(chunk);

            if let Err(err) = self.write(path, &mut decoder, storage) {
                result = Err(err);
                break;
            }
        }

        if let Some(handler) = handler {
            handler.on_list_write_end(path, result.is_ok());
        }

        result
    }
}
