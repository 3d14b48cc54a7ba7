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

//! Operational device connections.
//!
//! [`OperationalDeviceMgr`] hands out CASE sessions to peers on the
//! operational network, reusing an already-established or currently
//! establishing connection whenever one exists, so that any number of
//! concurrent callers asking for the same peer cost at most one session
//! establishment.

use core::cell::Cell;
use core::marker::PhantomData;

use crate::error::{Error, ErrorCode};
use crate::transport::{Address, PeerId, SecureSessionHandle};

/// Gets told how a connection request for a peer ended.
pub trait ConnectionListener {
    /// The peer is connected; `session` is valid for use immediately.
    fn on_connected(&self, peer: PeerId, session: &SecureSessionHandle);

    /// The connection attempt failed.
    fn on_failure(&self, peer: PeerId, err: Error);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    /// Not in use. Pool slots in this state are free for allocation.
    Idle,
    /// Session establishment to the peer is in flight on behalf of
    /// this proxy's listener.
    Connecting,
    /// Riding on another proxy's in-flight establishment; only the
    /// listener will be notified, no work of its own.
    Waiting,
    Connected,
}

/// One tracked connection request: a peer, the session once there is
/// one, and the listener to inform. Interior-mutable so that the pool
/// can hand out shared references.
pub struct OperationalDeviceProxy<'a> {
    peer: Cell<PeerId>,
    state: Cell<DeviceState>,
    address: Cell<Option<Address>>,
    session: Cell<Option<SecureSessionHandle>>,
    listener: Cell<Option<&'a dyn ConnectionListener>>,
}

impl<'a> OperationalDeviceProxy<'a> {
    const fn new() -> Self {
        Self {
            peer: Cell::new(PeerId::new(0, 0)),
            state: Cell::new(DeviceState::Idle),
            address: Cell::new(None),
            session: Cell::new(None),
            listener: Cell::new(None),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer.get()
    }

    pub fn state(&self) -> DeviceState {
        self.state.get()
    }

    pub fn address(&self) -> Option<Address> {
        self.address.get()
    }

    pub fn session(&self) -> Option<SecureSessionHandle> {
        self.session.get()
    }

    fn init(&self, peer: PeerId, listener: &'a dyn ConnectionListener) {
        self.peer.set(peer);
        self.state.set(DeviceState::Connecting);
        self.address.set(None);
        self.session.set(None);
        self.listener.set(Some(listener));
    }

    fn reset(&self) {
        self.state.set(DeviceState::Idle);
        self.address.set(None);
        self.session.set(None);
        self.listener.set(None);
    }

    fn notify_connected(&self, session: &SecureSessionHandle) {
        if let Some(listener) = self.listener.get() {
            listener.on_connected(self.peer.get(), session);
        }
    }

    fn notify_failure(&self, err: Error) {
        if let Some(listener) = self.listener.get() {
            listener.on_failure(self.peer.get(), err);
        }
    }
}

/// Storage for device proxies.
///
/// Implementations must tolerate `release` being called from inside a
/// `for_each` walk, on the proxy currently visited.
pub trait DevicePool<'a> {
    /// Grab a free proxy and initialize it for `peer`. `None` when the
    /// pool is full.
    fn allocate(
        &self,
        peer: PeerId,
        listener: &'a dyn ConnectionListener,
    ) -> Option<&OperationalDeviceProxy<'a>>;

    /// Return a proxy to the pool.
    fn release(&self, proxy: &OperationalDeviceProxy<'a>);

    /// Visit every non-idle proxy.
    fn for_each(&self, f: &mut dyn FnMut(&OperationalDeviceProxy<'a>));
}

/// A fixed-capacity pool of `N` proxies. Idle slots are free slots.
pub struct SlabDevicePool<'a, const N: usize> {
    slots: [OperationalDeviceProxy<'a>; N],
}

impl<'a, const N: usize> SlabDevicePool<'a, N> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| OperationalDeviceProxy::new()),
        }
    }

    /// The number of slots currently in use.
    pub fn occupied(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state.get() != DeviceState::Idle)
            .count()
    }
}

impl<'a, const N: usize> Default for SlabDevicePool<'a, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> DevicePool<'a> for SlabDevicePool<'a, N> {
    fn allocate(
        &self,
        peer: PeerId,
        listener: &'a dyn ConnectionListener,
    ) -> Option<&OperationalDeviceProxy<'a>> {
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.state.get() == DeviceState::Idle)?;

        slot.init(peer, listener);

        Some(slot)
    }

    fn release(&self, proxy: &OperationalDeviceProxy<'a>) {
        debug_assert!(self.slots.iter().any(|slot| core::ptr::eq(slot, proxy)));

        proxy.reset();
    }

    fn for_each(&self, f: &mut dyn FnMut(&OperationalDeviceProxy<'a>)) {
        for slot in &self.slots {
            if slot.state.get() != DeviceState::Idle {
                f(slot);
            }
        }
    }
}

/// The transport-facing side of the device manager: address cache
/// lookups and kicking off the actual session establishment.
pub trait ConnectDelegate {
    /// A known operational address for `peer`, if any.
    fn cached_address(&self, peer: PeerId) -> Option<Address>;

    /// Start establishing a session to the proxy's peer. Completion is
    /// reported back through `handle_device_connected` /
    /// `handle_device_connection_failure`.
    fn connect(&self, proxy: &OperationalDeviceProxy) -> Result<(), Error>;
}

/// Hands out connections to operational devices, at most one session
/// establishment in flight per peer.
pub struct OperationalDeviceMgr<'a, P, D> {
    pool: P,
    delegate: D,
    notifying: Cell<bool>,
    _listeners: PhantomData<&'a ()>,
}

impl<'a, P, D> OperationalDeviceMgr<'a, P, D>
where
    P: DevicePool<'a>,
    D: ConnectDelegate,
{
    pub const fn new(pool: P, delegate: D) -> Self {
        Self {
            pool,
            delegate,
            notifying: Cell::new(false),
            _listeners: PhantomData,
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Request a connection to `peer`, reporting the outcome to
    /// `listener`.
    ///
    /// If a session to the peer already exists, `listener.on_connected`
    /// fires synchronously, before this method returns. If an
    /// establishment to the peer is already in flight, the listener is
    /// queued onto it. Only otherwise is a new establishment started.
    pub fn acquire_device(&self, peer: PeerId, listener: &'a dyn ConnectionListener) {
        let mut active = None;
        let mut session = None;
        self.pool.for_each(&mut |proxy| {
            if proxy.peer.get() == peer && active.is_none() {
                match proxy.state.get() {
                    DeviceState::Connected => {
                        active = Some(DeviceState::Connected);
                        session = proxy.session.get();
                    }
                    DeviceState::Connecting => active = Some(DeviceState::Connecting),
                    _ => (),
                }
            }
        });

        let Some(proxy) = self.pool.allocate(peer, listener) else {
            warn!(
                "Device pool exhausted, rejecting request for node {:#x}",
                peer.node_id
            );

            listener.on_failure(peer, ErrorCode::NoMemory.into());
            return;
        };

        match active {
            Some(DeviceState::Connected) => {
                // Reuse the live session: notify synchronously and give
                // the short-lived proxy straight back
                if let Some(session) = session {
                    debug!(
                        "Reusing session {} for node {:#x}",
                        session.id, peer.node_id
                    );

                    proxy.session.set(Some(session));
                    proxy.notify_connected(&session);
                }

                self.pool.release(proxy);
            }
            Some(DeviceState::Connecting) => {
                debug!("Joining in-flight connection to node {:#x}", peer.node_id);

                proxy.state.set(DeviceState::Waiting);
            }
            _ => {
                proxy.address.set(self.delegate.cached_address(peer));

                debug!("Connecting to node {:#x}", peer.node_id);

                if let Err(err) = self.delegate.connect(proxy) {
                    self.pool.release(proxy);
                    listener.on_failure(peer, err);
                }
            }
        }
    }

    /// Session establishment for `peer` finished. Notifies the owning
    /// proxy and fans the session out to every waiter.
    pub fn handle_device_connected(&self, peer: PeerId, session: SecureSessionHandle) {
        if self.notifying.replace(true) {
            return;
        }

        let _reset = scopeguard::guard(&self.notifying, |notifying| {
            notifying.set(false);
        });

        self.pool.for_each(&mut |proxy| {
            if proxy.peer.get() != peer {
                return;
            }

            match proxy.state.get() {
                DeviceState::Connecting => {
                    proxy.state.set(DeviceState::Connected);
                    proxy.session.set(Some(session));
                    proxy.notify_connected(&session);
                }
                DeviceState::Waiting => {
                    // Waiters only wanted the notification; their slot
                    // is free again
                    proxy.session.set(Some(session));
                    proxy.notify_connected(&session);
                    self.pool.release(proxy);
                }
                _ => (),
            }
        });
    }

    /// Session establishment for `peer` failed. Fans the failure out
    /// to the owning proxy and every waiter and frees them all.
    pub fn handle_device_connection_failure(&self, peer: PeerId, code: ErrorCode) {
        if self.notifying.replace(true) {
            return;
        }

        let _reset = scopeguard::guard(&self.notifying, |notifying| {
            notifying.set(false);
        });

        self.pool.for_each(&mut |proxy| {
            if proxy.peer.get() == peer
                && matches!(
                    proxy.state.get(),
                    DeviceState::Connecting | DeviceState::Waiting
                )
            {
                proxy.notify_failure(code.into());
                self.pool.release(proxy);
            }
        });
    }

    /// The session backing a connected proxy went away; free the slot.
    pub fn handle_connection_expired(&self, session: &SecureSessionHandle) {
        self.pool.for_each(&mut |proxy| {
            if proxy.state.get() == DeviceState::Connected
                && proxy.session.get().as_ref() == Some(session)
            {
                debug!("Session {} expired, releasing device proxy", session.id);

                self.pool.release(proxy);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;

    use super::*;
    use crate::transport::SessionMode;

    const PEER_A: PeerId = PeerId::new(0x1122, 0x42);
    const PEER_B: PeerId = PeerId::new(0x1122, 0x43);

    #[derive(Debug, PartialEq)]
    enum Outcome {
        Connected(PeerId, u16),
        Failed(PeerId, ErrorCode),
    }

    #[derive(Default)]
    struct RecordingListener {
        outcomes: RefCell<Vec<Outcome>>,
    }

    impl ConnectionListener for RecordingListener {
        fn on_connected(&self, peer: PeerId, session: &SecureSessionHandle) {
            self.outcomes
                .borrow_mut()
                .push(Outcome::Connected(peer, session.id));
        }

        fn on_failure(&self, peer: PeerId, err: Error) {
            self.outcomes
                .borrow_mut()
                .push(Outcome::Failed(peer, err.code()));
        }
    }

    #[derive(Default)]
    struct FakeDelegate {
        connects: Cell<usize>,
        fail_connect: Cell<bool>,
    }

    impl ConnectDelegate for FakeDelegate {
        fn cached_address(&self, _peer: PeerId) -> Option<Address> {
            Some(Address::Udp("[::1]:5540".parse().unwrap()))
        }

        fn connect(&self, _proxy: &OperationalDeviceProxy) -> Result<(), Error> {
            self.connects.set(self.connects.get() + 1);

            if self.fail_connect.get() {
                Err(ErrorCode::TxFail.into())
            } else {
                Ok(())
            }
        }
    }

    fn session(id: u16, peer: PeerId) -> SecureSessionHandle {
        SecureSessionHandle::new(id, peer, SessionMode::Case)
    }

    #[test]
    fn test_connect_and_reuse() {
        let first = RecordingListener::default();
        let second = RecordingListener::default();

        let mgr = OperationalDeviceMgr::new(SlabDevicePool::<4>::new(), FakeDelegate::default());

        mgr.acquire_device(PEER_A, &first);
        assert!(first.outcomes.borrow().is_empty());
        assert_eq!(mgr.pool().occupied(), 1);

        mgr.handle_device_connected(PEER_A, session(9, PEER_A));
        assert_eq!(
            *first.outcomes.borrow(),
            vec![Outcome::Connected(PEER_A, 9)]
        );

        // A second request rides the live session synchronously, with
        // no second establishment and no extra slot left behind
        mgr.acquire_device(PEER_A, &second);
        assert_eq!(
            *second.outcomes.borrow(),
            vec![Outcome::Connected(PEER_A, 9)]
        );
        assert_eq!(mgr.delegate.connects.get(), 1);
        assert_eq!(mgr.pool().occupied(), 1);
    }

    #[test]
    fn test_waiters_fan_out() {
        let first = RecordingListener::default();
        let second = RecordingListener::default();

        let mgr = OperationalDeviceMgr::new(SlabDevicePool::<4>::new(), FakeDelegate::default());

        mgr.acquire_device(PEER_A, &first);
        mgr.acquire_device(PEER_A, &second);

        // One establishment in flight, one waiter on it
        assert_eq!(mgr.delegate.connects.get(), 1);
        assert_eq!(mgr.pool().occupied(), 2);
        assert!(second.outcomes.borrow().is_empty());

        mgr.handle_device_connected(PEER_A, session(9, PEER_A));
        assert_eq!(
            *first.outcomes.borrow(),
            vec![Outcome::Connected(PEER_A, 9)]
        );
        assert_eq!(
            *second.outcomes.borrow(),
            vec![Outcome::Connected(PEER_A, 9)]
        );

        // Waiter slots are freed, the connected proxy remains
        assert_eq!(mgr.pool().occupied(), 1);
    }

    #[test]
    fn test_failure_fan_out() {
        let first = RecordingListener::default();
        let second = RecordingListener::default();
        let other = RecordingListener::default();

        let mgr = OperationalDeviceMgr::new(SlabDevicePool::<4>::new(), FakeDelegate::default());

        mgr.acquire_device(PEER_A, &first);
        mgr.acquire_device(PEER_A, &second);
        mgr.acquire_device(PEER_B, &other);

        mgr.handle_device_connection_failure(PEER_A, ErrorCode::NoSession);
        assert_eq!(
            *first.outcomes.borrow(),
            vec![Outcome::Failed(PEER_A, ErrorCode::NoSession)]
        );
        assert_eq!(
            *second.outcomes.borrow(),
            vec![Outcome::Failed(PEER_A, ErrorCode::NoSession)]
        );

        // The unrelated peer is untouched
        assert!(other.outcomes.borrow().is_empty());
        assert_eq!(mgr.pool().occupied(), 1);
    }

    #[test]
    fn test_immediate_connect_error() {
        let listener = RecordingListener::default();

        let delegate = FakeDelegate::default();
        delegate.fail_connect.set(true);

        let mgr = OperationalDeviceMgr::new(SlabDevicePool::<4>::new(), delegate);

        mgr.acquire_device(PEER_A, &listener);

        assert_eq!(
            *listener.outcomes.borrow(),
            vec![Outcome::Failed(PEER_A, ErrorCode::TxFail)]
        );
        assert_eq!(mgr.pool().occupied(), 0);
    }

    #[test]
    fn test_pool_exhaustion() {
        let first = RecordingListener::default();
        let second = RecordingListener::default();

        let mgr = OperationalDeviceMgr::new(SlabDevicePool::<1>::new(), FakeDelegate::default());

        mgr.acquire_device(PEER_A, &first);

        mgr.acquire_device(PEER_B, &second);
        assert_eq!(
            *second.outcomes.borrow(),
            vec![Outcome::Failed(PEER_B, ErrorCode::NoMemory)]
        );

        // The original request is still in flight and completes
        mgr.handle_device_connected(PEER_A, session(9, PEER_A));
        assert_eq!(
            *first.outcomes.borrow(),
            vec![Outcome::Connected(PEER_A, 9)]
        );
    }

    #[test]
    fn test_notification_guard() {
        let listener = RecordingListener::default();

        let mgr = OperationalDeviceMgr::new(SlabDevicePool::<4>::new(), FakeDelegate::default());

        mgr.acquire_device(PEER_A, &listener);

        // While a notification pass is in progress, completion events
        // are dropped rather than re-entered
        mgr.notifying.set(true);
        mgr.handle_device_connected(PEER_A, session(9, PEER_A));
        assert!(listener.outcomes.borrow().is_empty());

        mgr.notifying.set(false);
        mgr.handle_device_connected(PEER_A, session(9, PEER_A));
        assert_eq!(
            *listener.outcomes.borrow(),
            vec![Outcome::Connected(PEER_A, 9)]
        );
    }

    #[test]
    fn test_connection_expired_frees_slot() {
        let listener = RecordingListener::default();

        let mgr = OperationalDeviceMgr::new(SlabDevicePool::<4>::new(), FakeDelegate::default());

        mgr.acquire_device(PEER_A, &listener);
        mgr.handle_device_connected(PEER_A, session(9, PEER_A));
        assert_eq!(mgr.pool().occupied(), 1);

        mgr.handle_connection_expired(&session(9, PEER_A));
        assert_eq!(mgr.pool().occupied(), 0);
    }
}
