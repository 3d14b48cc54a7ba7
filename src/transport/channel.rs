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

//! The per-peer secure channel state machine.
//!
//! A channel resolves the peer's address, runs a PASE or CASE pairing
//! and then exposes a ready session. Transitions are strictly forward;
//! a failed channel is permanently unusable and the owner must create a
//! new one.

use core::cell::{Cell, RefCell};
use core::ops::Deref;

use crate::error::{Error, ErrorCode};
use crate::transport::{Address, ChannelBuilder, SecureSessionHandle, SessionMode};

/// The externally visible channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelState {
    New,
    Preparing,
    Ready,
    Closed,
    Failed,
}

/// The sub-state of a preparing channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrepareState {
    AddressResolving,
    PasePairing,
    PasePairingDone,
    CasePairing,
    CasePairingDone,
}

/// A live passcode-based pairing exchange. Owned by the channel only
/// while its `PasePairing` sub-state is active.
#[derive(Debug)]
pub struct PaseSession {
    builder: ChannelBuilder,
}

impl PaseSession {
    fn new(builder: ChannelBuilder) -> Self {
        Self { builder }
    }

    pub const fn builder(&self) -> &ChannelBuilder {
        &self.builder
    }
}

/// A live certificate-based pairing exchange. Owned by the channel only
/// while its `CasePairing` sub-state is active.
#[derive(Debug)]
pub struct CaseSession {
    builder: ChannelBuilder,
}

impl CaseSession {
    fn new(builder: ChannelBuilder) -> Self {
        Self { builder }
    }

    pub const fn builder(&self) -> &ChannelBuilder {
        &self.builder
    }
}

#[derive(Debug)]
enum PairingSession {
    Pase(PaseSession),
    Case(CaseSession),
}

impl PairingSession {
    fn builder(&self) -> &ChannelBuilder {
        match self {
            Self::Pase(session) => session.builder(),
            Self::Case(session) => session.builder(),
        }
    }
}

#[derive(Debug)]
struct PrepareVars {
    state: PrepareState,
    builder: ChannelBuilder,
    address: Option<Address>,
    pairing: Option<PairingSession>,
}

#[derive(Debug)]
struct ReadyVars {
    session: SecureSessionHandle,
}

/// Each state owns only the data valid in that state; the enum makes
/// reading another state's data unrepresentable, so a stimulus arriving
/// in the wrong state has nothing to corrupt.
#[derive(Debug)]
enum State {
    New,
    Preparing(PrepareVars),
    Ready(ReadyVars),
    Closed,
    Failed(ErrorCode),
}

/// The per-peer channel state machine.
///
/// Reference-counted: [`ChannelHandle`]s retain the context for their
/// lifetime, and an external pool uses [`ChannelContext::is_referenced`]
/// to decide when the context can be swept.
pub struct ChannelContext {
    state: RefCell<State>,
    ref_count: Cell<usize>,
}

impl Default for ChannelContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelContext {
    pub const fn new() -> Self {
        Self {
            state: RefCell::new(State::New),
            ref_count: Cell::new(0),
        }
    }

    pub fn state(&self) -> ChannelState {
        match &*self.state.borrow() {
            State::New => ChannelState::New,
            State::Preparing(_) => ChannelState::Preparing,
            State::Ready(_) => ChannelState::Ready,
            State::Closed => ChannelState::Closed,
            State::Failed(_) => ChannelState::Failed,
        }
    }

    /// The preparing sub-state, if the channel is preparing.
    pub fn prepare_state(&self) -> Option<PrepareState> {
        match &*self.state.borrow() {
            State::Preparing(vars) => Some(vars.state),
            _ => None,
        }
    }

    /// The error a failed channel failed with.
    pub fn error(&self) -> Option<ErrorCode> {
        match &*self.state.borrow() {
            State::Failed(code) => Some(*code),
            _ => None,
        }
    }

    /// The established session of a ready channel.
    pub fn session(&self) -> Option<SecureSessionHandle> {
        match &*self.state.borrow() {
            State::Ready(vars) => Some(vars.session),
            _ => None,
        }
    }

    /// The peer address this channel resolved to, once known.
    pub fn resolved_address(&self) -> Option<Address> {
        match &*self.state.borrow() {
            State::Preparing(vars) => vars.address,
            _ => None,
        }
    }

    /// Whether a pairing exchange object is currently allocated. Live
    /// only during the `PasePairing`/`CasePairing` sub-states; released
    /// as soon as the handshake concludes.
    pub fn has_live_pairing(&self) -> bool {
        matches!(&*self.state.borrow(), State::Preparing(vars) if vars.pairing.is_some())
    }

    /// Begin establishing the channel: the only entry into `Preparing`,
    /// valid on a fresh channel only.
    pub fn start(&self, builder: ChannelBuilder) -> Result<(), Error> {
        let mut state = self.state.borrow_mut();

        if !matches!(*state, State::New) {
            Err(ErrorCode::InvalidState)?;
        }

        debug!(
            "Channel to node {:#x}: resolving address",
            builder.peer.node_id
        );

        *state = State::Preparing(PrepareVars {
            state: PrepareState::AddressResolving,
            builder,
            address: None,
            pairing: None,
        });

        Ok(())
    }

    /// Deliver the outcome of the address resolution started by
    /// `start`. Ignored outside `AddressResolving`.
    pub fn handle_node_id_resolve(&self, result: Result<Address, Error>) {
        let mut state = self.state.borrow_mut();

        let State::Preparing(vars) = &mut *state else {
            return;
        };

        if vars.state != PrepareState::AddressResolving {
            return;
        }

        match result {
            Ok(address) => {
                debug!("Channel to node {:#x}: resolved to {}", vars.builder.peer.node_id, address);

                vars.address = Some(address);

                match vars.builder.mode {
                    SessionMode::Pase => {
                        vars.pairing = Some(PairingSession::Pase(PaseSession::new(vars.builder)));
                        vars.state = PrepareState::PasePairing;
                    }
                    SessionMode::Case => {
                        vars.pairing = Some(PairingSession::Case(CaseSession::new(vars.builder)));
                        vars.state = PrepareState::CasePairing;
                    }
                }
            }
            Err(err) => {
                warn!("Channel to node {:#x}: address resolution failed: {:?}", vars.builder.peer.node_id, err);

                *state = State::Failed(err.code());
            }
        }
    }

    /// The pairing handshake finished. Releases the pairing session and
    /// parks the channel in the matching `*Done` sub-state, where it
    /// awaits its secure session via `on_new_connection`. Ignored
    /// outside the pairing sub-states.
    pub fn on_session_established(&self) {
        let mut state = self.state.borrow_mut();

        let State::Preparing(vars) = &mut *state else {
            return;
        };

        // A pairing session is allocated exactly while a pairing
        // sub-state is active; taking it both guards and releases
        let Some(pairing) = vars.pairing.take() else {
            return;
        };

        debug!(
            "Channel to node {:#x}: pairing complete",
            pairing.builder().peer.node_id
        );

        vars.state = match pairing {
            PairingSession::Pase(_) => PrepareState::PasePairingDone,
            PairingSession::Case(_) => PrepareState::CasePairingDone,
        };
    }

    /// The pairing handshake failed; the channel is permanently dead.
    /// Ignored outside the pairing sub-states.
    pub fn on_session_establishment_error(&self, err: Error) {
        let mut state = self.state.borrow_mut();

        let State::Preparing(vars) = &mut *state else {
            return;
        };

        if !matches!(
            vars.state,
            PrepareState::PasePairing | PrepareState::CasePairing
        ) {
            return;
        }

        warn!("Channel to node {:#x}: pairing failed: {:?}", vars.builder.peer.node_id, err);

        *state = State::Failed(err.code());
    }

    /// A secure session backed by the finished pairing is up; the
    /// channel becomes ready. Ignored unless the channel sits in a
    /// `*Done` sub-state and the session matches its profile.
    pub fn on_new_connection(&self, session: SecureSessionHandle) {
        let mut state = self.state.borrow_mut();

        let State::Preparing(vars) = &mut *state else {
            return;
        };

        if !matches!(
            vars.state,
            PrepareState::PasePairingDone | PrepareState::CasePairingDone
        ) || session.peer != vars.builder.peer
            || session.mode != vars.builder.mode
        {
            return;
        }

        debug!(
            "Channel to node {:#x}: ready on session {}",
            vars.builder.peer.node_id, session.id
        );

        *state = State::Ready(ReadyVars { session });
    }

    /// The ready session expired; the channel is closed. Ignored unless
    /// ready on exactly that session.
    pub fn on_connection_expired(&self, session: &SecureSessionHandle) {
        let mut state = self.state.borrow_mut();

        let State::Ready(vars) = &*state else {
            return;
        };

        if vars.session != *session {
            return;
        }

        debug!("Channel on session {}: closed", session.id);

        *state = State::Closed;
    }

    /// Locally close a ready channel. No-op in any other state.
    pub fn close(&self) {
        let mut state = self.state.borrow_mut();

        if let State::Ready(vars) = &*state {
            debug!("Channel on session {}: closed locally", vars.session.id);

            *state = State::Closed;
        }
    }

    /// Whether a new channel request with `builder` can reuse this
    /// channel instead of starting its own negotiation. Consulted by
    /// the owning pool.
    ///
    /// A preparing channel matches on the full builder; a ready one on
    /// the established session's peer and mode, since a new caller has
    /// nothing but a builder to ask with.
    pub fn matches_builder(&self, builder: &ChannelBuilder) -> bool {
        match &*self.state.borrow() {
            State::Preparing(vars) => vars.builder == *builder,
            State::Ready(vars) => {
                vars.session.peer == builder.peer && vars.session.mode == builder.mode
            }
            _ => false,
        }
    }

    /// Whether this channel is the ready channel over `session`.
    pub fn matches_session(&self, session: &SecureSessionHandle) -> bool {
        match &*self.state.borrow() {
            State::Ready(vars) => vars.session == *session,
            _ => false,
        }
    }

    pub fn is_referenced(&self) -> bool {
        self.ref_count.get() > 0
    }

    fn retain(&self) {
        self.ref_count.set(self.ref_count.get() + 1);
    }

    fn release(&self) {
        debug_assert!(self.ref_count.get() > 0);
        self.ref_count.set(self.ref_count.get() - 1);
    }
}

/// A retaining reference to a [`ChannelContext`].
///
/// Delegates (e.g. an exchange manager) hold handles; the channel stays
/// alive in its pool for as long as any handle does.
pub struct ChannelHandle<'a> {
    context: &'a ChannelContext,
}

impl<'a> ChannelHandle<'a> {
    pub fn new(context: &'a ChannelContext) -> Self {
        context.retain();

        Self { context }
    }
}

impl Deref for ChannelHandle<'_> {
    type Target = ChannelContext;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl Drop for ChannelHandle<'_> {
    fn drop(&mut self) {
        self.context.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PeerId;

    const PEER: PeerId = PeerId::new(0x1122, 0x42);

    fn addr() -> Address {
        Address::Udp("[::1]:5540".parse().unwrap())
    }

    fn session(mode: SessionMode) -> SecureSessionHandle {
        SecureSessionHandle::new(7, PEER, mode)
    }

    #[test]
    fn test_case_happy_path() {
        let channel = ChannelContext::new();
        assert_eq!(channel.state(), ChannelState::New);

        channel
            .start(ChannelBuilder::new(PEER, SessionMode::Case))
            .unwrap();
        assert_eq!(channel.state(), ChannelState::Preparing);
        assert_eq!(
            channel.prepare_state(),
            Some(PrepareState::AddressResolving)
        );

        channel.handle_node_id_resolve(Ok(addr()));
        assert_eq!(channel.prepare_state(), Some(PrepareState::CasePairing));
        assert_eq!(channel.resolved_address(), Some(addr()));
        assert!(channel.has_live_pairing());

        channel.on_session_established();
        assert_eq!(channel.prepare_state(), Some(PrepareState::CasePairingDone));

        // The pairing allocation does not outlive the handshake
        assert!(!channel.has_live_pairing());

        channel.on_new_connection(session(SessionMode::Case));
        assert_eq!(channel.state(), ChannelState::Ready);
        assert_eq!(channel.session(), Some(session(SessionMode::Case)));

        channel.on_connection_expired(&session(SessionMode::Case));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_pase_path() {
        let channel = ChannelContext::new();

        channel
            .start(ChannelBuilder::new(PEER, SessionMode::Pase))
            .unwrap();
        channel.handle_node_id_resolve(Ok(addr()));
        assert_eq!(channel.prepare_state(), Some(PrepareState::PasePairing));

        channel.on_session_established();
        assert_eq!(channel.prepare_state(), Some(PrepareState::PasePairingDone));

        // A session of the wrong mode does not complete the channel
        channel.on_new_connection(session(SessionMode::Case));
        assert_eq!(channel.state(), ChannelState::Preparing);

        channel.on_new_connection(session(SessionMode::Pase));
        assert_eq!(channel.state(), ChannelState::Ready);
    }

    #[test]
    fn test_monotonic_no_going_back() {
        let channel = ChannelContext::new();
        channel
            .start(ChannelBuilder::new(PEER, SessionMode::Case))
            .unwrap();

        // Start is valid on a fresh channel only
        assert_eq!(
            channel
                .start(ChannelBuilder::new(PEER, SessionMode::Case))
                .map_err(|err| err.code()),
            Err(ErrorCode::InvalidState)
        );

        // Out-of-order stimuli are ignored
        channel.on_session_established();
        channel.on_new_connection(session(SessionMode::Case));
        assert_eq!(
            channel.prepare_state(),
            Some(PrepareState::AddressResolving)
        );

        channel.handle_node_id_resolve(Ok(addr()));
        channel.on_session_established();
        channel.on_new_connection(session(SessionMode::Case));
        assert_eq!(channel.state(), ChannelState::Ready);

        // A ready channel ignores pairing-phase stimuli
        channel.handle_node_id_resolve(Ok(addr()));
        channel.on_session_establishment_error(ErrorCode::Busy.into());
        assert_eq!(channel.state(), ChannelState::Ready);
    }

    #[test]
    fn test_failed_is_absorbing() {
        let channel = ChannelContext::new();
        channel
            .start(ChannelBuilder::new(PEER, SessionMode::Case))
            .unwrap();
        channel.handle_node_id_resolve(Ok(addr()));

        channel.on_session_establishment_error(ErrorCode::NoSession.into());
        assert_eq!(channel.state(), ChannelState::Failed);
        assert_eq!(channel.error(), Some(ErrorCode::NoSession));

        // Nothing moves a failed channel
        channel.handle_node_id_resolve(Ok(addr()));
        channel.on_session_established();
        channel.on_new_connection(session(SessionMode::Case));
        assert_eq!(
            channel
                .start(ChannelBuilder::new(PEER, SessionMode::Case))
                .map_err(|err| err.code()),
            Err(ErrorCode::InvalidState)
        );
        assert_eq!(channel.state(), ChannelState::Failed);
    }

    #[test]
    fn test_resolve_failure_fails_channel() {
        let channel = ChannelContext::new();
        channel
            .start(ChannelBuilder::new(PEER, SessionMode::Case))
            .unwrap();

        channel.handle_node_id_resolve(Err(ErrorCode::NotFound.into()));
        assert_eq!(channel.state(), ChannelState::Failed);
        assert_eq!(channel.error(), Some(ErrorCode::NotFound));
    }

    #[test]
    fn test_coalescing_predicates() {
        let builder = ChannelBuilder::new(PEER, SessionMode::Case);
        let other = ChannelBuilder::new(PeerId::new(0x1122, 0x43), SessionMode::Case);

        let channel = ChannelContext::new();
        assert!(!channel.matches_builder(&builder));

        channel.start(builder).unwrap();
        assert!(channel.matches_builder(&builder));
        assert!(!channel.matches_builder(&other));
        assert!(!channel.matches_session(&session(SessionMode::Case)));

        channel.handle_node_id_resolve(Ok(addr()));
        channel.on_session_established();
        channel.on_new_connection(session(SessionMode::Case));

        // A ready channel stays reusable for new requests to the same
        // peer and mode instead of forcing a fresh negotiation
        assert!(channel.matches_builder(&builder));
        assert!(!channel.matches_builder(&other));
        assert!(!channel.matches_builder(&ChannelBuilder::new(PEER, SessionMode::Pase)));
        assert!(channel.matches_session(&session(SessionMode::Case)));

        channel.close();
        assert!(!channel.matches_builder(&builder));
    }

    #[test]
    fn test_local_close() {
        let channel = ChannelContext::new();

        // Close is only meaningful on a ready channel
        channel.close();
        assert_eq!(channel.state(), ChannelState::New);

        channel
            .start(ChannelBuilder::new(PEER, SessionMode::Case))
            .unwrap();
        channel.handle_node_id_resolve(Ok(addr()));
        channel.on_session_established();
        channel.on_new_connection(session(SessionMode::Case));

        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.session(), None);

        // Closed is absorbing
        channel.on_new_connection(session(SessionMode::Case));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_handle_refcount() {
        let channel = ChannelContext::new();
        assert!(!channel.is_referenced());

        let first = ChannelHandle::new(&channel);
        let second = ChannelHandle::new(&channel);
        assert!(channel.is_referenced());
        assert_eq!(second.state(), ChannelState::New);

        drop(first);
        assert!(channel.is_referenced());

        drop(second);
        assert!(!channel.is_referenced());
    }
}
