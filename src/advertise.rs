//! Advertisement config.

use embassy_time::Duration;

/// Advertising kinds carried in the LE Set Advertising Parameters command.
pub(crate) const ADV_KIND_ADV_IND: u8 = 0x00;
pub(crate) const ADV_KIND_ADV_SCAN_IND: u8 = 0x02;
pub(crate) const ADV_KIND_ADV_NONCONN_IND: u8 = 0x03;

/// All three advertising channels.
pub(crate) const ADV_CHANNEL_MAP_ALL: u8 = 0x07;

/// Advertising parameters.
pub struct AdvertisementParameters {
    /// Minimum advertising interval.
    pub interval_min: Duration,
    /// Maximum advertising interval.
    pub interval_max: Duration,
}

impl Default for AdvertisementParameters {
    fn default() -> Self {
        Self {
            interval_min: Duration::from_millis(250),
            interval_max: Duration::from_millis(250),
        }
    }
}

/// The advertisement to send.
///
/// The advertising and scan response payloads are opaque AD structure
/// blocks, at most 31 bytes each. Use
/// [`AdStructure::encode_slice`](crate::ad_structure::AdStructure::encode_slice)
/// to build them.
pub enum Advertisement<'d> {
    /// Connectable and scannable undirected advertising (ADV_IND).
    ConnectableScannableUndirected {
        adv_data: &'d [u8],
        scan_data: &'d [u8],
    },
    /// Scannable but not connectable undirected advertising (ADV_SCAN_IND).
    ScannableUndirected {
        adv_data: &'d [u8],
        scan_data: &'d [u8],
    },
    /// Neither connectable nor scannable undirected advertising (ADV_NONCONN_IND).
    NonconnectableNonscannableUndirected {
        adv_data: &'d [u8],
    },
}

impl Advertisement<'_> {
    pub(crate) fn adv_kind(&self) -> u8 {
        match self {
            Advertisement::ConnectableScannableUndirected { .. } => ADV_KIND_ADV_IND,
            Advertisement::ScannableUndirected { .. } => ADV_KIND_ADV_SCAN_IND,
            Advertisement::NonconnectableNonscannableUndirected { .. } => ADV_KIND_ADV_NONCONN_IND,
        }
    }

    pub(crate) fn payloads(&self) -> (&[u8], &[u8]) {
        match self {
            Advertisement::ConnectableScannableUndirected { adv_data, scan_data } => (adv_data, scan_data),
            Advertisement::ScannableUndirected { adv_data, scan_data } => (adv_data, scan_data),
            Advertisement::NonconnectableNonscannableUndirected { adv_data } => (adv_data, &[]),
        }
    }

    pub(crate) fn is_connectable(&self) -> bool {
        matches!(self, Advertisement::ConnectableScannableUndirected { .. })
    }
}
