//! BLE scanning.

use heapless::Vec;

use crate::connection::ScanConfig;
use crate::hci::cmd::{LeSetScanEnable, LeSetScanParams};
use crate::hci::event::AdvReport;
use crate::hci::{AddrKind, BdAddr, Transport};
use crate::host::BleHost;
use crate::BleHostError;

/// An advertising report, detached from the receive buffer.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Advertising event kind (ADV_IND, SCAN_RSP, ...).
    pub event_kind: u8,
    /// Address kind of the advertiser.
    pub addr_kind: AddrKind,
    /// Address of the advertiser.
    pub addr: BdAddr,
    /// Received signal strength in dBm.
    pub rssi: i8,
    data: Vec<u8, 31>,
}

impl ScanReport {
    pub(crate) fn from_report(report: &AdvReport<'_>) -> Self {
        let mut data = Vec::new();
        // Advertising data is at most 31 bytes on legacy PDUs.
        let _ = data.extend_from_slice(&report.data[..report.data.len().min(31)]);
        Self {
            event_kind: report.event_kind,
            addr_kind: report.addr_kind,
            addr: report.addr,
            rssi: report.rssi,
            data,
        }
    }

    /// Raw advertising data of this report.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// An active scan session.
///
/// Reports are delivered through a bounded queue. When the consumer does not
/// keep up, new reports are dropped and counted instead of blocking the
/// host. Dropping the scanner stops scanning.
pub struct Scanner<'d, T: Transport> {
    host: &'d BleHost<T>,
}

impl<'d, T: Transport> Scanner<'d, T> {
    pub(crate) async fn start(host: &'d BleHost<T>, config: &ScanConfig<'_>) -> Result<Self, BleHostError<T::Error>> {
        host.command(LeSetScanParams {
            active: config.active,
            interval: crate::central::scan_units(config.interval),
            window: crate::central::scan_units(config.window),
            own_addr_kind: AddrKind::PUBLIC,
            filter_policy: 0,
        })
        .await?
        .to_result()?;

        host.scan_start();
        if let Err(e) = host
            .command(LeSetScanEnable {
                enable: true,
                filter_duplicates: false,
            })
            .await
        {
            host.scan_stop();
            return Err(e);
        }
        Ok(Self { host })
    }

    /// Wait for the next advertising report.
    pub async fn next(&mut self) -> ScanReport {
        self.host.next_scan_report().await
    }

    /// Number of reports dropped because the queue was full.
    pub fn dropped(&self) -> u32 {
        self.host.scan_dropped_count()
    }

    /// Stop scanning, telling the controller to go quiet.
    pub async fn stop(self) -> Result<(), BleHostError<T::Error>> {
        self.host
            .command(LeSetScanEnable {
                enable: false,
                filter_duplicates: false,
            })
            .await?
            .to_result()?;
        Ok(())
    }
}

impl<T: Transport> Drop for Scanner<'_, T> {
    fn drop(&mut self) {
        // Stop queueing reports. The controller keeps scanning until the
        // disable command goes out, those reports are discarded.
        self.host.scan_stop();
    }
}
