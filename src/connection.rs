//! BLE connection.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Duration;

use crate::connection_manager::ConnectionManager;
use crate::hci::cmd::ReadRssi;
use crate::hci::{AddrKind, BdAddr, ConnHandle, DisconnectReason, LeConnRole, Status, Transport};
use crate::host::BleHost;
use crate::BleHostError;

/// Connection configuration.
pub struct ConnectConfig<'d> {
    /// Scan configuration to use while connecting.
    pub scan_config: ScanConfig<'d>,
    /// Parameters to use for the connection.
    pub connect_params: ConnectParams,
}

/// Scan/connect configuration.
pub struct ScanConfig<'d> {
    /// Active scanning.
    pub active: bool,
    /// List of addresses to accept.
    pub filter_accept_list: &'d [(AddrKind, &'d BdAddr)],
    /// Scan interval.
    pub interval: Duration,
    /// Scan window.
    pub window: Duration,
}

impl Default for ScanConfig<'_> {
    fn default() -> Self {
        Self {
            active: true,
            filter_accept_list: &[],
            interval: Duration::from_secs(1),
            window: Duration::from_secs(1),
        }
    }
}

/// Connection parameters.
pub struct ConnectParams {
    /// Minimum connection interval.
    pub min_connection_interval: Duration,
    /// Maximum connection interval.
    pub max_connection_interval: Duration,
    /// Maximum peripheral latency in connection events.
    pub max_latency: u16,
    /// Supervision timeout.
    pub supervision_timeout: Duration,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            min_connection_interval: Duration::from_millis(80),
            max_connection_interval: Duration::from_millis(80),
            max_latency: 0,
            supervision_timeout: Duration::from_secs(8),
        }
    }
}

/// A connection event.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Connection disconnected.
    Disconnected {
        /// The reason (status code) for the disconnect.
        reason: Status,
    },
}

/// Handle to a BLE connection.
///
/// When the last reference to a connection is dropped, the connection is automatically disconnected.
pub struct Connection<'d, M: RawMutex> {
    index: u8,
    manager: &'d ConnectionManager<M>,
}

impl<M: RawMutex> Clone for Connection<'_, M> {
    fn clone(&self) -> Self {
        self.manager.inc_ref(self.index);
        Connection::new(self.index, self.manager)
    }
}

impl<M: RawMutex> Drop for Connection<'_, M> {
    fn drop(&mut self) {
        self.manager.dec_ref(self.index);
    }
}

impl<'d, M: RawMutex> Connection<'d, M> {
    pub(crate) fn new(index: u8, manager: &'d ConnectionManager<M>) -> Self {
        Self { index, manager }
    }

    pub(crate) fn index(&self) -> u8 {
        self.index
    }

    /// Check if still connected.
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected(self.index)
    }

    /// Connection handle of this connection.
    pub fn handle(&self) -> ConnHandle {
        self.manager.handle(self.index)
    }

    /// The negotiated ATT MTU for this connection.
    pub fn att_mtu(&self) -> u16 {
        self.manager.get_att_mtu(self.handle())
    }

    /// The connection role for this connection.
    pub fn role(&self) -> LeConnRole {
        self.manager.role(self.index)
    }

    /// The peer address for this connection.
    pub fn peer_address(&self) -> BdAddr {
        self.manager.peer_address(self.index)
    }

    /// Wait for next connection event.
    pub async fn next(&self) -> ConnectionEvent {
        self.manager.next_event(self.index).await
    }

    /// Wait for the connection to be disconnected.
    pub async fn wait_disconnected(&self) {
        self.manager.wait_disconnected(self.index).await
    }

    /// Request connection to be disconnected.
    pub fn disconnect(&self) {
        self.manager
            .request_disconnect(self.index, DisconnectReason::RemoteUserTerminatedConn);
    }

    /// Request connection to be disconnected with a specific reason code.
    pub fn disconnect_with_reason(&self, reason: DisconnectReason) {
        self.manager.request_disconnect(self.index, reason);
    }

    /// The RSSI value for this connection.
    pub async fn rssi<T: Transport>(&self, host: &BleHost<T>) -> Result<i8, BleHostError<T::Error>> {
        let (status, _, rssi) = host.command(ReadRssi { handle: self.handle() }).await?;
        status.to_result()?;
        Ok(rssi)
    }
}
