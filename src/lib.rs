//! An async BLE host stack for embedded controllers.
//!
//! The host talks to any controller implementing the [`hci::Transport`]
//! trait and provides connection management, L2CAP fragmentation and
//! reassembly over the fixed attribute channel, and both GATT roles on top.
//!
//! The entry point is [`BleHost`]: create one from a transport, spawn
//! [`BleHost::run`] and use [`BleHost::central`], [`BleHost::peripheral`]
//! or [`BleHost::scanner`] from other tasks.
#![no_std]
#![allow(async_fn_in_trait)]

#[macro_use]
mod fmt;

mod codec;
mod command;
mod connection_manager;
mod cursor;
mod pdu;

pub mod ad_structure;
pub mod advertise;
pub mod att;
pub mod attribute;
mod attribute_server;
pub mod central;
pub mod config;
pub mod connection;
pub mod gatt;
pub mod hci;
mod host;
mod l2cap;
pub mod mock_controller;
pub mod peripheral;
pub mod scan;
pub mod types;

pub use host::{BleHost, EventHandler};

use att::AttErrorCode;
use hci::Status;

/// Errors originating in the host.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// The controller reported a failure status.
    Hci(Status),
    /// The peer reported a protocol error.
    Att(AttErrorCode),
    /// A response did not arrive in time.
    Timeout,
    /// No free resource slot for the operation.
    Busy,
    /// The requested item does not exist.
    NotFound,
    /// The operation is not supported by this entity.
    NotSupported,
    /// The peer has not subscribed to the characteristic.
    NotSubscribed,
    /// The operation is not valid in the current state.
    InvalidState,
    /// A value failed validation.
    InvalidValue,
    /// A buffer was too small for the data.
    InsufficientSpace,
    /// The host is shutting down.
    ChannelClosed,
    /// The connection is gone.
    Disconnected,
    /// The peer answered a request with the wrong response.
    UnexpectedGattResponse,
    /// All notification subscriber slots are taken.
    GattSubscriberLimitReached,
}

impl From<codec::Error> for Error {
    fn from(error: codec::Error) -> Self {
        match error {
            codec::Error::InsufficientSpace => Error::InsufficientSpace,
            codec::Error::InvalidValue => Error::InvalidValue,
        }
    }
}

/// Errors from host operations that involve the controller.
#[derive(Debug)]
pub enum BleHostError<E> {
    /// The controller transport failed.
    Controller(E),
    /// The host failed.
    BleHost(Error),
}

impl<E> From<Error> for BleHostError<E> {
    fn from(error: Error) -> Self {
        Self::BleHost(error)
    }
}

impl<E> From<codec::Error> for BleHostError<E> {
    fn from(error: codec::Error) -> Self {
        Self::BleHost(error.into())
    }
}

#[cfg(feature = "defmt")]
impl<E> defmt::Format for BleHostError<E> {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Controller(_) => defmt::write!(fmt, "Controller"),
            Self::BleHost(value) => defmt::write!(fmt, "BleHost({})", value),
        }
    }
}

/// Common imports.
pub mod prelude {
    pub use crate::ad_structure::AdStructure;
    pub use crate::advertise::{Advertisement, AdvertisementParameters};
    pub use crate::attribute::{
        AttributeHandler, AttributeTable, Characteristic, CharacteristicProp, Service, Uuid,
    };
    pub use crate::central::Central;
    pub use crate::connection::{ConnectConfig, Connection, ConnectionEvent, ConnectParams, ScanConfig};
    pub use crate::gatt::client::{CharacteristicHandle, Descriptor, GattClient, NotificationListener, ServiceHandle};
    pub use crate::gatt::{GattEvent, GattServer};
    pub use crate::hci::{AddrKind, BdAddr, ConnHandle, SerialTransport, Transport};
    pub use crate::peripheral::Peripheral;
    pub use crate::scan::{ScanReport, Scanner};
    pub use crate::{BleHost, BleHostError, Error, EventHandler};
}
