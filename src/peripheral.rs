//! Functionality for the BLE peripheral role.

use crate::advertise::{Advertisement, AdvertisementParameters, ADV_CHANNEL_MAP_ALL};
use crate::connection::Connection;
use crate::hci::cmd::{LeSetAdvData, LeSetAdvEnable, LeSetAdvParams, LeSetScanResponseData};
use crate::hci::{AddrKind, BdAddr, LeConnRole, Transport};
use crate::host::{BleHost, HostMutex};
use crate::{BleHostError, Error};

fn adv_units(duration: embassy_time::Duration) -> u16 {
    (duration.as_micros() / 625) as u16
}

fn adv_block(payload: &[u8]) -> Result<(u8, [u8; 31]), Error> {
    if payload.len() > 31 {
        return Err(Error::InsufficientSpace);
    }
    let mut block = [0u8; 31];
    block[..payload.len()].copy_from_slice(payload);
    Ok((payload.len() as u8, block))
}

/// A type implementing the BLE peripheral role.
pub struct Peripheral<'d, T: Transport> {
    host: &'d BleHost<T>,
}

impl<'d, T: Transport> Peripheral<'d, T> {
    pub(crate) fn new(host: &'d BleHost<T>) -> Self {
        Self { host }
    }

    /// Start advertising with the given parameters and payload.
    pub async fn advertise(
        &mut self,
        params: &AdvertisementParameters,
        advertisement: Advertisement<'_>,
    ) -> Result<Advertiser<'d, T>, BleHostError<T::Error>> {
        let (adv_data, scan_data) = advertisement.payloads();
        let (adv_len, adv_payload) = adv_block(adv_data)?;
        let (scan_len, scan_payload) = adv_block(scan_data)?;

        self.host
            .command(LeSetAdvParams {
                interval_min: adv_units(params.interval_min),
                interval_max: adv_units(params.interval_max),
                adv_kind: advertisement.adv_kind(),
                own_addr_kind: AddrKind::PUBLIC,
                peer_addr_kind: AddrKind::PUBLIC,
                peer_addr: BdAddr::new([0; 6]),
                channel_map: ADV_CHANNEL_MAP_ALL,
                filter_policy: 0,
            })
            .await?
            .to_result()?;

        self.host
            .command(LeSetAdvData {
                len: adv_len,
                data: adv_payload,
            })
            .await?
            .to_result()?;

        self.host
            .command(LeSetScanResponseData {
                len: scan_len,
                data: scan_payload,
            })
            .await?
            .to_result()?;

        self.host.command(LeSetAdvEnable { enable: true }).await?.to_result()?;

        Ok(Advertiser {
            host: self.host,
            connectable: advertisement.is_connectable(),
        })
    }
}

/// An active advertising session.
pub struct Advertiser<'d, T: Transport> {
    host: &'d BleHost<T>,
    connectable: bool,
}

impl<'d, T: Transport> Advertiser<'d, T> {
    /// Wait for a central to connect to the advertised device.
    ///
    /// The controller stops advertising by itself when the connection is
    /// established.
    pub async fn accept(self) -> Result<Connection<'d, HostMutex>, BleHostError<T::Error>> {
        if !self.connectable {
            return Err(Error::InvalidState.into());
        }
        let conn = self.host.connections.accept(LeConnRole::Peripheral, &[]).await;
        Ok(conn)
    }

    /// Stop advertising.
    pub async fn stop(self) -> Result<(), BleHostError<T::Error>> {
        self.host.command(LeSetAdvEnable { enable: false }).await?.to_result()?;
        Ok(())
    }
}
