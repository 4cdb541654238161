//! The HCI host.
//!
//! Owns the command/event correlation table, the connection table and the
//! L2CAP reassembly state. The [`BleHost::run`] future drives everything:
//! nothing is received from the controller and no disconnect requests are
//! processed unless it is polled.

use core::cell::RefCell;
use core::future::poll_fn;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::once_lock::OnceLock;
use embassy_time::{with_timeout, Duration, Instant, Timer};

use crate::central::Central;
use crate::command::PendingCommands;
use crate::config;
use crate::codec::FixedSize;
use crate::connection_manager::ConnectionManager;
use crate::cursor::{ReadCursor, WriteCursor};
use crate::hci::cmd::{Cmd, Disconnect, LeReadBufferSize, LeSetEventMask, ReadBdAddr, Reset, SetEventMask};
use crate::hci::data::{AclPacket, AclPacketBoundary};
use crate::hci::event::{Event, LeEvent};
use crate::hci::{BdAddr, ConnHandle, ControllerToHostPacket, DisconnectReason, Status, Transport};
use crate::l2cap::sar::PacketReassembly;
use crate::l2cap::{L2capHeader, L2CAP_CID_ATT, L2CAP_CID_LE_SIGNAL};
use crate::pdu::Pdu;
use crate::peripheral::Peripheral;
use crate::connection::ScanConfig;
use crate::scan::{ScanReport, Scanner};
use crate::{BleHostError, Error};

/// Mutex flavor used for all host-internal state.
pub(crate) type HostMutex = CriticalSectionRawMutex;

// Disconnection Complete and LE Meta.
const EVENT_MASK: u64 = (1 << 4) | (1 << 61);
// LE Connection Complete and LE Advertising Report.
const LE_EVENT_MASK: u64 = 0x03;

/// Controller capabilities read during bring-up.
pub(crate) struct ControllerInfo {
    pub(crate) acl_len: usize,
    pub(crate) bd_addr: BdAddr,
}

/// Traffic bound for the local attribute server.
pub(crate) enum ServerEvent {
    Data { handle: ConnHandle, pdu: Pdu },
    Disconnected { handle: ConnHandle },
}

/// Callback for events the host does not route internally.
///
/// Handlers run on the host's receive path after internal routing, in the
/// order they were registered. They must not block.
pub trait EventHandler {
    fn on_event(&self, event: &Event<'_>);
}

/// A BLE host.
pub struct BleHost<T: Transport> {
    transport: T,
    commands: PendingCommands<HostMutex, { config::COMMAND_SLOTS }>,
    pub(crate) connections: ConnectionManager<HostMutex>,
    reassembly: Mutex<HostMutex, RefCell<[PacketReassembly; config::MAX_CONNECTIONS]>>,
    pub(crate) server_events: Channel<HostMutex, ServerEvent, { config::ATT_RX_QUEUE_SIZE }>,
    scan_reports: Channel<HostMutex, ScanReport, { config::SCAN_QUEUE_SIZE }>,
    scan_enabled: AtomicBool,
    scan_dropped: AtomicU32,
    initialized: OnceLock<ControllerInfo>,
}

impl<T: Transport> BleHost<T> {
    const REASSEMBLY: PacketReassembly = PacketReassembly::new();

    /// Create a new host using the given controller transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            commands: PendingCommands::new(),
            connections: ConnectionManager::new(),
            reassembly: Mutex::new(RefCell::new([Self::REASSEMBLY; config::MAX_CONNECTIONS])),
            server_events: Channel::new(),
            scan_reports: Channel::new(),
            scan_enabled: AtomicBool::new(false),
            scan_dropped: AtomicU32::new(0),
            initialized: OnceLock::new(),
        }
    }

    /// Central role API for this host.
    pub fn central(&self) -> Central<'_, T> {
        Central::new(self)
    }

    /// Peripheral role API for this host.
    pub fn peripheral(&self) -> Peripheral<'_, T> {
        Peripheral::new(self)
    }

    /// Start scanning and return a handle for draining advertising reports.
    pub async fn scanner(&self, config: &ScanConfig<'_>) -> Result<Scanner<'_, T>, BleHostError<T::Error>> {
        Scanner::start(self, config).await
    }

    /// Public address of the controller, available once [`BleHost::run`] has
    /// finished bring-up.
    pub async fn address(&self) -> BdAddr {
        self.initialized.get().await.bd_addr
    }

    /// Issue an HCI command and wait for the matching Command Complete (or,
    /// for async commands, Command Status) event.
    pub async fn command<C: Cmd>(&self, cmd: C) -> Result<C::Return, BleHostError<T::Error>> {
        let token = self.commands.register(C::OPCODE, C::STATUS_EVENT)?;
        let mut params = [0u8; 64];
        let len = cmd.params(&mut params).map_err(Error::from)?;
        self.transport
            .write_command(C::OPCODE, &params[..len])
            .await
            .map_err(BleHostError::Controller)?;
        let ret = match with_timeout(config::COMMAND_TIMEOUT, token.wait()).await {
            Ok(ret) => ret?,
            Err(_) => {
                warn!("[host] command {:04x} timed out", C::OPCODE);
                return Err(Error::Timeout.into());
            }
        };
        let ret = C::return_params(&ret).map_err(Error::from)?;
        Ok(ret)
    }

    /// Send an L2CAP PDU over a connection, fragmenting it to the
    /// controller's ACL payload size.
    pub(crate) async fn send_l2cap(
        &self,
        handle: ConnHandle,
        channel: u16,
        payload: &[u8],
    ) -> Result<(), BleHostError<T::Error>> {
        let info = self.initialized.get().await;
        let mut packet = [0u8; config::L2CAP_MTU + L2capHeader::SIZE];
        let mut w = WriteCursor::new(&mut packet);
        w.write(L2capHeader {
            length: payload.len() as u16,
            channel,
        })
        .map_err(Error::from)?;
        w.append(payload).map_err(Error::from)?;
        let data = w.finish();

        let fragments = data.len().div_ceil(info.acl_len);
        let mut grant = poll_fn(|cx| self.connections.poll_request_to_send(handle, fragments, Some(cx))).await?;
        let mut boundary = AclPacketBoundary::FirstNonFlushable;
        for chunk in data.chunks(info.acl_len) {
            self.transport
                .write_acl(AclPacket::new(handle, boundary, chunk))
                .await
                .map_err(BleHostError::Controller)?;
            grant.confirm(1);
            boundary = AclPacketBoundary::Continuing;
        }
        Ok(())
    }

    /// Run the host.
    pub async fn run(&self) -> Result<(), BleHostError<T::Error>> {
        self.run_with_handlers(&[]).await
    }

    /// Run the host, fanning events out to the given handlers after
    /// internal routing.
    pub async fn run_with_handlers(&self, handlers: &[&dyn EventHandler]) -> Result<(), BleHostError<T::Error>> {
        let control = async {
            if self.initialized.try_get().is_none() {
                self.initialize().await?;
            }
            loop {
                match select(
                    poll_fn(|cx| self.connections.poll_disconnecting(Some(cx))),
                    Timer::after(Duration::from_secs(1)),
                )
                .await
                {
                    Either::First(request) => {
                        let handle = request.handle();
                        let reason = request.reason();
                        request.confirm();
                        match self.command(Disconnect { handle, reason }).await {
                            Ok(_) => {}
                            Err(BleHostError::BleHost(Error::Hci(status))) => {
                                // Unknown handle, the link is already gone.
                                warn!("[host] disconnect of {} rejected: {:?}", handle.raw(), status);
                                let _ = self.connections.disconnected(handle, status);
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    Either::Second(_) => self.sweep_reassembly(),
                }
            }
        };
        let rx = async {
            let mut rx = [0u8; 512];
            loop {
                match self.transport.read(&mut rx).await {
                    Ok(ControllerToHostPacket::Event(event)) => {
                        self.handle_event(&event).await;
                        for handler in handlers.iter() {
                            handler.on_event(&event);
                        }
                    }
                    Ok(ControllerToHostPacket::Acl(acl)) => {
                        let handle = acl.handle();
                        if let Err(e) = self.handle_acl(acl).await {
                            warn!("[host] error processing acl data for {}: {:?}", handle.raw(), e);
                            if let Ok(index) = self.connections.index_of(handle) {
                                self.connections
                                    .request_disconnect(index, DisconnectReason::RemoteUserTerminatedConn);
                            }
                        }
                    }
                    Err(e) => {
                        error!("[host] controller transport failed");
                        self.teardown();
                        return Err(BleHostError::Controller(e));
                    }
                }
            }
        };
        match select(rx, control).await {
            Either::First(r) => r,
            Either::Second(r) => r,
        }
    }

    async fn initialize(&self) -> Result<(), BleHostError<T::Error>> {
        self.command(Reset).await?.to_result()?;
        self.command(SetEventMask { mask: EVENT_MASK }).await?.to_result()?;
        self.command(LeSetEventMask { mask: LE_EVENT_MASK }).await?.to_result()?;
        let buffers = self.command(LeReadBufferSize).await?;
        buffers.status.to_result()?;
        let (status, bd_addr) = self.command(ReadBdAddr).await?;
        status.to_result()?;

        self.connections
            .set_link_credits(buffers.total_num_le_acl_data_packets as usize);
        let _ = self.initialized.init(ControllerInfo {
            acl_len: buffers.le_acl_data_packet_length as usize,
            bd_addr,
        });
        info!(
            "[host] initialized, bd_addr {}, acl buffers {} x {}",
            bd_addr, buffers.le_acl_data_packet_length, buffers.total_num_le_acl_data_packets
        );
        Ok(())
    }

    async fn handle_event(&self, event: &Event<'_>) {
        match event {
            Event::CommandComplete {
                opcode, return_params, ..
            } => {
                self.commands.complete(*opcode, return_params);
            }
            Event::CommandStatus { status, opcode, .. } => {
                self.commands.complete_status(*opcode, *status);
            }
            Event::DisconnectionComplete { status, handle, reason } => {
                let reason = if *status == Status::SUCCESS { *reason } else { *status };
                trace!("[host] disconnection complete for {}: {:?}", handle.raw(), reason);
                if let Ok(index) = self.connections.disconnected(*handle, reason) {
                    self.reassembly.lock(|r| r.borrow_mut()[index as usize].disconnected());
                    self.server_events
                        .send(ServerEvent::Disconnected { handle: *handle })
                        .await;
                }
            }
            Event::NumberOfCompletedPackets { completed } => {
                for (handle, count) in completed.clone() {
                    let _ = self.connections.confirm_sent(handle, count as usize);
                }
            }
            Event::Le(LeEvent::ConnectionComplete {
                status,
                handle,
                role,
                peer_addr_kind,
                peer_addr,
                ..
            }) => {
                if status.to_result().is_ok() {
                    if self
                        .connections
                        .connect(*handle, *peer_addr_kind, *peer_addr, *role)
                        .is_err()
                    {
                        warn!("[host] no slot for connection {}, disconnecting", handle.raw());
                        self.disconnect_unmanaged(*handle).await;
                    }
                } else {
                    warn!("[host] connection attempt failed: {:?}", status);
                }
            }
            Event::Le(LeEvent::AdvertisingReport { reports }) => {
                if self.scan_enabled.load(Ordering::Relaxed) {
                    for report in reports.clone() {
                        match report {
                            Ok(report) => {
                                if self.scan_reports.try_send(ScanReport::from_report(&report)).is_err() {
                                    self.scan_dropped.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            Err(e) => {
                                warn!("[host] malformed advertising report: {:?}", e);
                                break;
                            }
                        }
                    }
                }
            }
            Event::Le(LeEvent::Unknown { subcode, .. }) => {
                trace!("[host] ignoring le event {:02x}", subcode);
            }
            Event::Unknown { code, .. } => {
                trace!("[host] ignoring event {:02x}", code);
            }
        }
    }

    async fn handle_acl(&self, acl: AclPacket<'_>) -> Result<(), Error> {
        let index = self.connections.index_of(acl.handle())?;
        let (channel, pdu) = match acl.boundary_flag() {
            AclPacketBoundary::FirstNonFlushable | AclPacketBoundary::FirstFlushable => {
                let mut r = ReadCursor::new(acl.data());
                let header: L2capHeader = r.read()?;
                let data = r.remaining();
                if data.len() < header.length as usize {
                    let deadline = Instant::now() + config::REASSEMBLY_TIMEOUT;
                    self.reassembly.lock(|r| {
                        r.borrow_mut()[index as usize].init(header.channel, header.length, data, deadline)
                    })?;
                    return Ok(());
                }
                if data.len() > header.length as usize {
                    return Err(Error::InvalidValue);
                }
                (header.channel, Pdu::from_slice(data)?)
            }
            AclPacketBoundary::Continuing => {
                match self
                    .reassembly
                    .lock(|r| r.borrow_mut()[index as usize].update(acl.data()))?
                {
                    Some((channel, pdu)) => (channel, pdu),
                    None => return Ok(()),
                }
            }
            AclPacketBoundary::Complete => {
                return Err(Error::NotSupported);
            }
        };
        match channel {
            L2CAP_CID_ATT => {
                let opcode = pdu.as_ref().first().copied().ok_or(Error::InvalidValue)?;
                if opcode % 2 == 1 {
                    // Server-originated, bound for our client.
                    self.connections.post_att_client(index, pdu);
                } else {
                    self.server_events
                        .send(ServerEvent::Data {
                            handle: acl.handle(),
                            pdu,
                        })
                        .await;
                }
            }
            L2CAP_CID_LE_SIGNAL => {
                trace!("[host] ignoring le signaling pdu");
            }
            other => {
                warn!("[host] data on unexpected l2cap channel {:04x}", other);
            }
        }
        Ok(())
    }

    /// Disconnect a handle that never got a connection slot. Fire and
    /// forget, the completion resolves against an empty pending table.
    async fn disconnect_unmanaged(&self, handle: ConnHandle) {
        let cmd = Disconnect {
            handle,
            reason: DisconnectReason::RemoteDeviceTerminatedConnLowResources,
        };
        let mut params = [0u8; 8];
        if let Ok(len) = cmd.params(&mut params) {
            let _ = self.transport.write_command(Disconnect::OPCODE, &params[..len]).await;
        }
    }

    fn sweep_reassembly(&self) {
        let now = Instant::now();
        self.reassembly.lock(|r| {
            for (index, slot) in r.borrow_mut().iter_mut().enumerate() {
                if slot.is_expired(now) {
                    warn!("[host][conn = {}] reassembly timed out, disconnecting", index);
                    slot.disconnected();
                    self.connections
                        .request_disconnect(index as u8, DisconnectReason::RemoteUserTerminatedConn);
                }
            }
        });
    }

    /// Fail everything in flight after a transport error.
    fn teardown(&self) {
        self.commands.close(Error::ChannelClosed);
        for handle in self.connections.connected_handles() {
            let _ = self.connections.disconnected(handle, Status::new(0x08));
            let _ = self.server_events.try_send(ServerEvent::Disconnected { handle });
        }
        self.reassembly.lock(|r| {
            for slot in r.borrow_mut().iter_mut() {
                slot.disconnected();
            }
        });
    }

    pub(crate) fn scan_start(&self) {
        self.scan_reports.clear();
        self.scan_dropped.store(0, Ordering::Relaxed);
        self.scan_enabled.store(true, Ordering::Relaxed);
    }

    pub(crate) fn scan_stop(&self) {
        self.scan_enabled.store(false, Ordering::Relaxed);
    }

    pub(crate) async fn next_scan_report(&self) -> ScanReport {
        self.scan_reports.receive().await
    }

    pub(crate) fn scan_dropped_count(&self) -> u32 {
        self.scan_dropped.load(Ordering::Relaxed)
    }
}
