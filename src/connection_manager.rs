use core::cell::RefCell;
use core::future::poll_fn;
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::waitqueue::WakerRegistration;

use crate::att::ATT_MTU_DEFAULT;
use crate::config;
use crate::connection::{Connection, ConnectionEvent};
use crate::hci::{AddrKind, BdAddr, ConnHandle, DisconnectReason, LeConnRole};
use crate::pdu::Pdu;
use crate::Error;

struct State {
    connections: [ConnectionStorage; config::MAX_CONNECTIONS],
    accept_waker: WakerRegistration,
    disconnect_waker: WakerRegistration,
    default_link_credits: usize,
}

pub(crate) struct ConnectionManager<M: RawMutex> {
    state: Mutex<M, RefCell<State>>,
    /// Client-directed ATT traffic (responses, notifications, indications),
    /// one queue per slot.
    att_client: [Channel<M, Pdu, { config::ATT_RX_QUEUE_SIZE }>; config::MAX_CONNECTIONS],
    /// Connection events, one queue per slot.
    events: [Channel<M, ConnectionEvent, { config::CONNECTION_EVENT_QUEUE_SIZE }>; config::MAX_CONNECTIONS],
}

impl<M: RawMutex> ConnectionManager<M> {
    const ATT_CHANNEL: Channel<M, Pdu, { config::ATT_RX_QUEUE_SIZE }> = Channel::new();
    const EVENT_CHANNEL: Channel<M, ConnectionEvent, { config::CONNECTION_EVENT_QUEUE_SIZE }> = Channel::new();

    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                connections: [ConnectionStorage::DISCONNECTED; config::MAX_CONNECTIONS],
                accept_waker: WakerRegistration::new(),
                disconnect_waker: WakerRegistration::new(),
                default_link_credits: 0,
            })),
            att_client: [Self::ATT_CHANNEL; config::MAX_CONNECTIONS],
            events: [Self::EVENT_CHANNEL; config::MAX_CONNECTIONS],
        }
    }

    fn with_mut<F: FnOnce(&mut State) -> R, R>(&self, f: F) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    pub(crate) fn role(&self, index: u8) -> LeConnRole {
        self.with_mut(|state| unwrap!(state.connections[index as usize].role))
    }

    pub(crate) fn handle(&self, index: u8) -> ConnHandle {
        self.with_mut(|state| unwrap!(state.connections[index as usize].handle))
    }

    pub(crate) fn peer_address(&self, index: u8) -> BdAddr {
        self.with_mut(|state| unwrap!(state.connections[index as usize].peer_addr))
    }

    pub(crate) fn is_connected(&self, index: u8) -> bool {
        self.with_mut(|state| state.connections[index as usize].state == ConnectionState::Connected)
    }

    /// Find the slot for a connected handle.
    pub(crate) fn index_of(&self, h: ConnHandle) -> Result<u8, Error> {
        self.with_mut(|state| {
            for (idx, storage) in state.connections.iter().enumerate() {
                match (storage.handle, &storage.state) {
                    (Some(handle), ConnectionState::Connected) if handle == h => {
                        return Ok(idx as u8);
                    }
                    _ => {}
                }
            }
            Err(Error::NotFound)
        })
    }

    pub(crate) fn is_handle_connected(&self, h: ConnHandle) -> bool {
        self.index_of(h).is_ok()
    }

    pub(crate) fn request_disconnect(&self, index: u8, reason: DisconnectReason) {
        self.with_mut(|state| {
            let entry = &mut state.connections[index as usize];
            if entry.state == ConnectionState::Connected {
                entry.state = ConnectionState::DisconnectRequest(reason);
                state.disconnect_waker.wake();
            }
        })
    }

    pub(crate) fn poll_disconnecting(&self, cx: Option<&mut Context<'_>>) -> Poll<DisconnectRequest<'_, M>> {
        self.with_mut(|state| {
            if let Some(cx) = cx {
                state.disconnect_waker.register(cx.waker());
            }
            for (idx, storage) in state.connections.iter().enumerate() {
                if let ConnectionState::DisconnectRequest(reason) = storage.state {
                    return Poll::Ready(DisconnectRequest {
                        index: idx,
                        handle: unwrap!(storage.handle),
                        reason,
                        manager: self,
                    });
                }
            }
            Poll::Pending
        })
    }

    /// Tear down the state for a disconnected handle, waking everything
    /// suspended on it.
    pub(crate) fn disconnected(&self, h: ConnHandle, reason: crate::hci::Status) -> Result<u8, Error> {
        let index = self.with_mut(|state| {
            for (idx, storage) in state.connections.iter_mut().enumerate() {
                if let Some(handle) = storage.handle {
                    if handle == h && storage.state != ConnectionState::Disconnected {
                        storage.state = ConnectionState::Disconnected;
                        storage.indication_busy = false;
                        storage.indication_waker.wake();
                        storage.link_credit_waker.wake();
                        storage.disconnection_waker.wake();
                        return Ok(idx as u8);
                    }
                }
            }
            trace!("[link][disconnect] connection handle {} not found", h.raw());
            Err(Error::NotFound)
        })?;
        let _ = self.events[index as usize].try_send(ConnectionEvent::Disconnected { reason });
        // Unblock anything waiting for client-directed traffic
        self.att_client[index as usize].clear();
        Ok(index)
    }

    pub(crate) fn connect(
        &self,
        handle: ConnHandle,
        peer_addr_kind: AddrKind,
        peer_addr: BdAddr,
        role: LeConnRole,
    ) -> Result<(), Error> {
        self.with_mut(|state| {
            let default_credits = state.default_link_credits;
            for (idx, storage) in state.connections.iter_mut().enumerate() {
                if ConnectionState::Disconnected == storage.state && storage.refcount == 0 {
                    storage.state = ConnectionState::Connecting;
                    storage.link_credits = default_credits;
                    storage.att_mtu = ATT_MTU_DEFAULT;
                    storage.att_mtu_exchanged = false;
                    storage.indication_busy = false;
                    storage.handle.replace(handle);
                    storage.peer_addr_kind.replace(peer_addr_kind);
                    storage.peer_addr.replace(peer_addr);
                    storage.role.replace(role);
                    self.att_client[idx].clear();
                    self.events[idx].clear();
                    state.accept_waker.wake();
                    return Ok(());
                }
            }
            trace!("[link][connect] no available slot found for handle {}", handle.raw());
            Err(Error::NotFound)
        })
    }

    pub(crate) fn poll_accept(
        &self,
        role: LeConnRole,
        peers: &[(AddrKind, &BdAddr)],
        cx: Option<&mut Context<'_>>,
    ) -> Poll<Connection<'_, M>> {
        self.with_mut(|state| {
            if let Some(cx) = cx {
                state.accept_waker.register(cx.waker());
            }
            for (idx, storage) in state.connections.iter_mut().enumerate() {
                if let ConnectionState::Connecting = storage.state {
                    let handle = unwrap!(storage.handle);
                    if unwrap!(storage.role) != role {
                        continue;
                    }
                    let matched = peers.is_empty()
                        || peers.iter().any(|peer| {
                            unwrap!(storage.peer_addr_kind) == peer.0 && &unwrap!(storage.peer_addr) == peer.1
                        });
                    if matched {
                        storage.state = ConnectionState::Connected;
                        storage.refcount = 1;
                        trace!(
                            "[link][poll_accept] connection handle {} in role {:?} accepted",
                            handle.raw(),
                            role
                        );
                        return Poll::Ready(Connection::new(idx as u8, self));
                    }
                }
            }
            Poll::Pending
        })
    }

    pub(crate) async fn accept(&self, role: LeConnRole, peers: &[(AddrKind, &BdAddr)]) -> Connection<'_, M> {
        poll_fn(move |cx| self.poll_accept(role, peers, Some(cx))).await
    }

    pub(crate) fn inc_ref(&self, index: u8) {
        self.with_mut(|state| {
            let storage = &mut state.connections[index as usize];
            storage.refcount = unwrap!(
                storage.refcount.checked_add(1),
                "Too many references to the same connection"
            );
        });
    }

    pub(crate) fn dec_ref(&self, index: u8) {
        self.with_mut(|state| {
            let storage = &mut state.connections[index as usize];
            storage.refcount = unwrap!(
                storage.refcount.checked_sub(1),
                "bug: dropping a connection with refcount 0"
            );
            if storage.refcount == 0 && storage.state == ConnectionState::Connected {
                storage.state = ConnectionState::DisconnectRequest(DisconnectReason::RemoteUserTerminatedConn);
                state.disconnect_waker.wake();
            }
        });
    }

    /// Wait until the slot leaves the connected state.
    pub(crate) async fn wait_disconnected(&self, index: u8) {
        poll_fn(|cx| {
            self.with_mut(|state| {
                let storage = &mut state.connections[index as usize];
                if storage.state == ConnectionState::Connected {
                    storage.disconnection_waker.register(cx.waker());
                    Poll::Pending
                } else {
                    Poll::Ready(())
                }
            })
        })
        .await
    }

    /// Current ATT MTU for a connected handle, the protocol default
    /// before any exchange.
    pub(crate) fn get_att_mtu(&self, h: ConnHandle) -> u16 {
        self.with_mut(|state| {
            for storage in state.connections.iter() {
                match storage.state {
                    ConnectionState::Connected if storage.handle == Some(h) => {
                        return storage.att_mtu;
                    }
                    _ => {}
                }
            }
            ATT_MTU_DEFAULT
        })
    }

    /// Record the result of an MTU exchange. The first exchange wins, a
    /// repeated exchange returns the value already negotiated so the MTU
    /// never decreases over the lifetime of the connection.
    pub(crate) fn exchange_att_mtu(&self, h: ConnHandle, mtu: u16) -> u16 {
        self.with_mut(|state| {
            for storage in state.connections.iter_mut() {
                match storage.state {
                    ConnectionState::Connected if storage.handle == Some(h) => {
                        if !storage.att_mtu_exchanged {
                            storage.att_mtu = mtu.max(ATT_MTU_DEFAULT);
                            storage.att_mtu_exchanged = true;
                        }
                        return storage.att_mtu;
                    }
                    _ => {}
                }
            }
            mtu
        })
    }

    pub(crate) fn set_link_credits(&self, credits: usize) {
        self.with_mut(|state| {
            state.default_link_credits = credits;
            for storage in state.connections.iter_mut() {
                storage.link_credits = credits;
            }
        })
    }

    /// Return transmit credits after a Number Of Completed Packets entry.
    pub(crate) fn confirm_sent(&self, handle: ConnHandle, packets: usize) -> Result<(), Error> {
        self.with_mut(|state| {
            for storage in state.connections.iter_mut() {
                match storage.state {
                    ConnectionState::Connected if storage.handle == Some(handle) => {
                        storage.link_credits += packets;
                        storage.link_credit_waker.wake();
                        return Ok(());
                    }
                    _ => {}
                }
            }
            Err(Error::NotFound)
        })
    }

    pub(crate) fn poll_request_to_send(
        &self,
        handle: ConnHandle,
        packets: usize,
        cx: Option<&mut Context<'_>>,
    ) -> Poll<Result<PacketGrant<'_, M>, Error>> {
        self.with_mut(|state| {
            for storage in state.connections.iter_mut() {
                match storage.state {
                    ConnectionState::Connected if storage.handle == Some(handle) => {
                        if packets <= storage.link_credits {
                            storage.link_credits -= packets;
                            return Poll::Ready(Ok(PacketGrant::new(self, handle, packets)));
                        }
                        if let Some(cx) = cx {
                            storage.link_credit_waker.register(cx.waker());
                        }
                        trace!(
                            "[link][poll_request_to_send][conn = {}] requested {} available {}",
                            handle.raw(),
                            packets,
                            storage.link_credits
                        );
                        return Poll::Pending;
                    }
                    _ => {}
                }
            }
            Poll::Ready(Err(Error::Disconnected))
        })
    }

    /// Claim the single in-flight indication slot for a connection.
    ///
    /// Holders release the slot when the confirmation arrives, so
    /// indications towards one peer are strictly ordered.
    pub(crate) async fn request_indication_slot(&self, index: u8) -> Result<(), Error> {
        poll_fn(|cx| {
            self.with_mut(|state| {
                let storage = &mut state.connections[index as usize];
                if storage.state != ConnectionState::Connected {
                    return Poll::Ready(Err(Error::Disconnected));
                }
                if storage.indication_busy {
                    storage.indication_waker.register(cx.waker());
                    Poll::Pending
                } else {
                    storage.indication_busy = true;
                    Poll::Ready(Ok(()))
                }
            })
        })
        .await
    }

    pub(crate) fn release_indication_slot(&self, index: u8) {
        self.with_mut(|state| {
            let storage = &mut state.connections[index as usize];
            storage.indication_busy = false;
            storage.indication_waker.wake();
        })
    }

    /// Deliver client-directed ATT traffic. Lossy if the client is not
    /// draining its queue.
    pub(crate) fn post_att_client(&self, index: u8, pdu: Pdu) {
        if self.att_client[index as usize].try_send(pdu).is_err() {
            warn!("[link][conn = {}] client att queue full, dropping pdu", index);
        }
    }

    pub(crate) async fn receive_att_client(&self, index: u8) -> Pdu {
        self.att_client[index as usize].receive().await
    }

    /// Snapshot of the currently connected handles.
    pub(crate) fn connected_handles(&self) -> heapless::Vec<ConnHandle, { config::MAX_CONNECTIONS }> {
        self.with_mut(|state| {
            let mut handles = heapless::Vec::new();
            for storage in state.connections.iter() {
                if storage.state == ConnectionState::Connected {
                    if let Some(handle) = storage.handle {
                        let _ = handles.push(handle);
                    }
                }
            }
            handles
        })
    }

    pub(crate) fn post_event(&self, index: u8, event: ConnectionEvent) {
        let _ = self.events[index as usize].try_send(event);
    }

    pub(crate) async fn next_event(&self, index: u8) -> ConnectionEvent {
        self.events[index as usize].receive().await
    }
}

pub struct DisconnectRequest<'a, M: RawMutex> {
    index: usize,
    handle: ConnHandle,
    reason: DisconnectReason,
    manager: &'a ConnectionManager<M>,
}

impl<M: RawMutex> DisconnectRequest<'_, M> {
    pub fn handle(&self) -> ConnHandle {
        self.handle
    }

    pub fn reason(&self) -> DisconnectReason {
        self.reason
    }

    pub fn confirm(self) {
        self.manager.with_mut(|state| {
            let storage = &mut state.connections[self.index];
            if let ConnectionState::DisconnectRequest(reason) = storage.state {
                storage.state = ConnectionState::Disconnecting(reason);
            }
        })
    }
}

#[derive(Debug)]
struct ConnectionStorage {
    state: ConnectionState,
    handle: Option<ConnHandle>,
    role: Option<LeConnRole>,
    peer_addr_kind: Option<AddrKind>,
    peer_addr: Option<BdAddr>,
    att_mtu: u16,
    att_mtu_exchanged: bool,
    link_credits: usize,
    link_credit_waker: WakerRegistration,
    indication_busy: bool,
    indication_waker: WakerRegistration,
    disconnection_waker: WakerRegistration,
    refcount: u8,
}

impl ConnectionStorage {
    const DISCONNECTED: ConnectionStorage = ConnectionStorage {
        state: ConnectionState::Disconnected,
        handle: None,
        role: None,
        peer_addr_kind: None,
        peer_addr: None,
        att_mtu: ATT_MTU_DEFAULT,
        att_mtu_exchanged: false,
        link_credits: 0,
        link_credit_waker: WakerRegistration::new(),
        indication_busy: false,
        indication_waker: WakerRegistration::new(),
        disconnection_waker: WakerRegistration::new(),
        refcount: 0,
    };
}

#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum ConnectionState {
    DisconnectRequest(DisconnectReason),
    Disconnecting(DisconnectReason),
    Disconnected,
    Connecting,
    Connected,
}

/// Credits for a number of ACL packets towards one connection. Unused
/// credits are returned on drop.
pub(crate) struct PacketGrant<'a, M: RawMutex> {
    manager: &'a ConnectionManager<M>,
    handle: ConnHandle,
    packets: usize,
}

impl<'a, M: RawMutex> PacketGrant<'a, M> {
    fn new(manager: &'a ConnectionManager<M>, handle: ConnHandle, packets: usize) -> Self {
        Self {
            manager,
            handle,
            packets,
        }
    }

    pub(crate) fn confirm(&mut self, sent: usize) {
        self.packets = self.packets.saturating_sub(sent);
    }
}

impl<M: RawMutex> Drop for PacketGrant<'_, M> {
    fn drop(&mut self) {
        if self.packets > 0 {
            let _ = self.manager.confirm_sent(self.handle, self.packets);
        }
    }
}

#[cfg(test)]
mod tests {
    use core::future::Future;
    use core::pin::pin;
    use core::task::Waker;

    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    use super::*;
    use crate::hci::Status;

    const ADDR_1: [u8; 6] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
    const ADDR_2: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

    type Manager = ConnectionManager<CriticalSectionRawMutex>;

    #[test]
    fn peripheral_connection_established() {
        let mgr = Manager::new();

        assert!(mgr.poll_accept(LeConnRole::Peripheral, &[], None).is_pending());

        unwrap!(mgr.connect(
            ConnHandle::new(0),
            AddrKind::RANDOM,
            BdAddr::new(ADDR_1),
            LeConnRole::Peripheral
        ));

        let Poll::Ready(handle) = mgr.poll_accept(LeConnRole::Peripheral, &[], None) else {
            panic!("expected connection to be accepted");
        };
        assert_eq!(handle.role(), LeConnRole::Peripheral);
        assert_eq!(handle.peer_address(), BdAddr::new(ADDR_1));

        handle.disconnect();
    }

    #[test]
    fn central_connection_established() {
        let mgr = Manager::new();

        assert!(mgr.poll_accept(LeConnRole::Central, &[], None).is_pending());

        unwrap!(mgr.connect(
            ConnHandle::new(0),
            AddrKind::RANDOM,
            BdAddr::new(ADDR_2),
            LeConnRole::Central
        ));

        let Poll::Ready(handle) = mgr.poll_accept(LeConnRole::Central, &[], None) else {
            panic!("expected connection to be accepted");
        };
        assert_eq!(handle.role(), LeConnRole::Central);
        assert_eq!(handle.peer_address(), BdAddr::new(ADDR_2));
    }

    #[test]
    fn accept_filters_on_peer_address() {
        let mgr = Manager::new();

        unwrap!(mgr.connect(
            ConnHandle::new(1),
            AddrKind::PUBLIC,
            BdAddr::new(ADDR_1),
            LeConnRole::Central
        ));

        let other = BdAddr::new(ADDR_2);
        assert!(mgr
            .poll_accept(LeConnRole::Central, &[(AddrKind::PUBLIC, &other)], None)
            .is_pending());

        let wanted = BdAddr::new(ADDR_1);
        let Poll::Ready(conn) = mgr.poll_accept(LeConnRole::Central, &[(AddrKind::PUBLIC, &wanted)], None) else {
            panic!("expected connection to be accepted");
        };
        assert_eq!(conn.peer_address(), wanted);
    }

    #[test]
    fn controller_disconnects_before_host() {
        let mgr = Manager::new();

        unwrap!(mgr.connect(
            ConnHandle::new(3),
            AddrKind::RANDOM,
            BdAddr::new(ADDR_1),
            LeConnRole::Central
        ));

        unwrap!(mgr.connect(
            ConnHandle::new(2),
            AddrKind::RANDOM,
            BdAddr::new(ADDR_2),
            LeConnRole::Peripheral
        ));

        let Poll::Ready(central) = mgr.poll_accept(LeConnRole::Central, &[], None) else {
            panic!("expected connection to be accepted");
        };

        let Poll::Ready(peripheral) = mgr.poll_accept(LeConnRole::Peripheral, &[], None) else {
            panic!("expected connection to be accepted");
        };

        assert_eq!(ConnHandle::new(3), central.handle());
        assert_eq!(ConnHandle::new(2), peripheral.handle());

        // Disconnect request from us
        peripheral.disconnect();

        // Polling should return the disconnecting handle
        let Poll::Ready(_req) = mgr.poll_disconnecting(None) else {
            panic!("expected a disconnect request");
        };

        // If nothing happens, polling should behave the same way
        let Poll::Ready(req) = mgr.poll_disconnecting(None) else {
            panic!("expected a disconnect request");
        };

        // Disconnection event from controller arrives before we confirm
        unwrap!(mgr.disconnected(ConnHandle::new(2), Status::new(0x13)));

        // This should be a noop
        req.confirm();

        // Polling should not return anything
        assert!(mgr.poll_disconnecting(None).is_pending());
    }

    #[test]
    fn controller_disconnects_after_host() {
        let mgr = Manager::new();

        unwrap!(mgr.connect(
            ConnHandle::new(2),
            AddrKind::RANDOM,
            BdAddr::new(ADDR_2),
            LeConnRole::Peripheral
        ));

        let Poll::Ready(peripheral) = mgr.poll_accept(LeConnRole::Peripheral, &[], None) else {
            panic!("expected connection to be accepted");
        };

        peripheral.disconnect();

        let Poll::Ready(req) = mgr.poll_disconnecting(None) else {
            panic!("expected a disconnect request");
        };

        // This should remove it from the list
        req.confirm();
        assert!(mgr.poll_disconnecting(None).is_pending());

        // Disconnection event from controller arrives after we confirmed
        unwrap!(mgr.disconnected(ConnHandle::new(2), Status::new(0x16)));
        assert!(mgr.poll_disconnecting(None).is_pending());
    }

    #[test]
    fn referenced_handle_not_reused() {
        let mgr = Manager::new();

        let handle = ConnHandle::new(42);
        unwrap!(mgr.connect(handle, AddrKind::RANDOM, BdAddr::new(ADDR_1), LeConnRole::Peripheral));

        let Poll::Ready(conn) = mgr.poll_accept(LeConnRole::Peripheral, &[], None) else {
            panic!("expected connection to be accepted");
        };

        unwrap!(mgr.disconnected(handle, Status::new(0x13)));

        // New incoming connection reusing handle
        let handle = ConnHandle::new(42);
        unwrap!(mgr.connect(handle, AddrKind::RANDOM, BdAddr::new(ADDR_2), LeConnRole::Peripheral));

        let Poll::Ready(conn2) = mgr.poll_accept(LeConnRole::Peripheral, &[], None) else {
            panic!("expected connection to be accepted");
        };

        // Ensure existing connection handle doesn't panic things
        assert_eq!(conn.handle(), ConnHandle::new(42));
        assert_eq!(conn.peer_address(), BdAddr::new(ADDR_1));
        assert!(!conn.is_connected());

        assert_eq!(conn2.handle(), ConnHandle::new(42));
        assert_eq!(conn2.peer_address(), BdAddr::new(ADDR_2));
        assert!(conn2.is_connected());
    }

    #[test]
    fn att_mtu_negotiated_once() {
        let mgr = Manager::new();
        let handle = ConnHandle::new(7);
        unwrap!(mgr.connect(handle, AddrKind::PUBLIC, BdAddr::new(ADDR_1), LeConnRole::Central));
        let Poll::Ready(_conn) = mgr.poll_accept(LeConnRole::Central, &[], None) else {
            panic!("expected connection to be accepted");
        };

        assert_eq!(mgr.get_att_mtu(handle), ATT_MTU_DEFAULT);
        assert_eq!(mgr.exchange_att_mtu(handle, 185), 185);
        // A repeated exchange can not lower the value
        assert_eq!(mgr.exchange_att_mtu(handle, 100), 185);
        assert_eq!(mgr.get_att_mtu(handle), 185);
    }

    #[test]
    fn att_mtu_never_below_default() {
        let mgr = Manager::new();
        let handle = ConnHandle::new(7);
        unwrap!(mgr.connect(handle, AddrKind::PUBLIC, BdAddr::new(ADDR_1), LeConnRole::Central));
        let Poll::Ready(_conn) = mgr.poll_accept(LeConnRole::Central, &[], None) else {
            panic!("expected connection to be accepted");
        };

        assert_eq!(mgr.exchange_att_mtu(handle, 5), ATT_MTU_DEFAULT);
    }

    #[test]
    fn link_credits_flow() {
        let mgr = Manager::new();
        let handle = ConnHandle::new(1);
        mgr.set_link_credits(2);
        unwrap!(mgr.connect(handle, AddrKind::PUBLIC, BdAddr::new(ADDR_1), LeConnRole::Central));
        let Poll::Ready(_conn) = mgr.poll_accept(LeConnRole::Central, &[], None) else {
            panic!("expected connection to be accepted");
        };

        let Poll::Ready(Ok(mut grant)) = mgr.poll_request_to_send(handle, 2, None) else {
            panic!("expected credits to be granted");
        };

        // All credits taken
        assert!(mgr.poll_request_to_send(handle, 1, None).is_pending());

        grant.confirm(1);
        drop(grant); // returns the unused credit

        let Poll::Ready(Ok(_grant)) = mgr.poll_request_to_send(handle, 1, None) else {
            panic!("expected credits to be granted");
        };
        unwrap!(mgr.confirm_sent(handle, 1));
    }

    #[test]
    fn disconnect_releases_indication_slot() {
        let mgr = Manager::new();
        let handle = ConnHandle::new(9);
        unwrap!(mgr.connect(handle, AddrKind::PUBLIC, BdAddr::new(ADDR_1), LeConnRole::Peripheral));
        let Poll::Ready(_conn) = mgr.poll_accept(LeConnRole::Peripheral, &[], None) else {
            panic!("expected connection to be accepted");
        };

        // Take the slot, then disconnect while it is held
        {
            let mut fut = pin!(mgr.request_indication_slot(0));
            let waker = Waker::noop();
            let mut cx = Context::from_waker(&waker);
            assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Ready(Ok(()))));
        }
        unwrap!(mgr.disconnected(handle, Status::new(0x13)));
        {
            let mut fut = pin!(mgr.request_indication_slot(0));
            let waker = Waker::noop();
            let mut cx = Context::from_waker(&waker);
            assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Ready(Err(Error::Disconnected))));
        }
    }
}
