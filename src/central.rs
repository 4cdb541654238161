//! Functionality for the BLE central role.

use crate::connection::{ConnectConfig, Connection};
use crate::hci::cmd::{LeCreateConn, LeCreateConnCancel};
use crate::hci::{AddrKind, LeConnRole, Transport};
use crate::host::{BleHost, HostMutex};
use crate::{BleHostError, Error};

/// Scan interval and window are in units of 0.625 ms.
pub(crate) fn scan_units(duration: embassy_time::Duration) -> u16 {
    (duration.as_micros() / 625) as u16
}

/// Connection intervals are in units of 1.25 ms.
fn interval_units(duration: embassy_time::Duration) -> u16 {
    (duration.as_micros() / 1250) as u16
}

/// Supervision timeout is in units of 10 ms.
fn timeout_units(duration: embassy_time::Duration) -> u16 {
    (duration.as_millis() / 10) as u16
}

/// A type implementing the BLE central role.
pub struct Central<'d, T: Transport> {
    host: &'d BleHost<T>,
}

impl<'d, T: Transport> Central<'d, T> {
    pub(crate) fn new(host: &'d BleHost<T>) -> Self {
        Self { host }
    }

    /// Attempt to create a connection with the provided config.
    ///
    /// Dials the first entry of the filter accept list and waits for the
    /// link to come up. Use [`Central::cancel_connect`] from another task to
    /// abort a dial that does not complete.
    pub async fn connect(
        &mut self,
        config: &ConnectConfig<'_>,
    ) -> Result<Connection<'d, HostMutex>, BleHostError<T::Error>> {
        if config.scan_config.filter_accept_list.is_empty() {
            return Err(Error::InvalidValue.into());
        }
        let (peer_addr_kind, peer_addr) = config.scan_config.filter_accept_list[0];

        let status = self
            .host
            .command(LeCreateConn {
                scan_interval: scan_units(config.scan_config.interval),
                scan_window: scan_units(config.scan_config.window),
                use_filter_accept_list: false,
                peer_addr_kind,
                peer_addr: *peer_addr,
                own_addr_kind: AddrKind::PUBLIC,
                conn_interval_min: interval_units(config.connect_params.min_connection_interval),
                conn_interval_max: interval_units(config.connect_params.max_connection_interval),
                max_latency: config.connect_params.max_latency,
                supervision_timeout: timeout_units(config.connect_params.supervision_timeout),
                min_ce_length: 0,
                max_ce_length: 0,
            })
            .await?;
        status.to_result()?;

        let conn = self
            .host
            .connections
            .accept(LeConnRole::Central, config.scan_config.filter_accept_list)
            .await;
        Ok(conn)
    }

    /// Attempt to create a connection, giving up after `timeout`.
    ///
    /// A dial that does not complete in time is cancelled with LE Create
    /// Connection Cancel before the error is returned.
    pub async fn connect_with_timeout(
        &mut self,
        config: &ConnectConfig<'_>,
        timeout: embassy_time::Duration,
    ) -> Result<Connection<'d, HostMutex>, BleHostError<T::Error>> {
        match embassy_time::with_timeout(timeout, self.connect(config)).await {
            Ok(result) => result,
            Err(_) => {
                self.cancel_connect().await?;
                Err(Error::Timeout.into())
            }
        }
    }

    /// Cancel an in-progress connection attempt.
    pub async fn cancel_connect(&mut self) -> Result<(), BleHostError<T::Error>> {
        let status = self.host.command(LeCreateConnCancel).await?;
        status.to_result()?;
        Ok(())
    }
}
