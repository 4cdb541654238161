//! GATT server role.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::with_timeout;

use crate::att::{self, AttReq, AttRsp};
use crate::attribute::{AttributeTable, Characteristic};
use crate::attribute_server::AttributeServer;
use crate::config;
use crate::connection::Connection;
use crate::hci::{ConnHandle, Transport};
use crate::host::{BleHost, HostMutex, ServerEvent};
use crate::l2cap::L2CAP_CID_ATT;
use crate::{BleHostError, Error};

pub mod client;

/// Events from the server to the application.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GattEvent {
    /// A peer wrote to an attribute. The new value can be read from the table.
    Write {
        /// Connection the write arrived on.
        connection: ConnHandle,
        /// Attribute handle that was written.
        handle: u16,
    },
    /// A peer enabled notifications or indications on a descriptor.
    Subscribed {
        /// Connection the subscription belongs to.
        connection: ConnHandle,
        /// Handle of the configuration descriptor.
        cccd_handle: u16,
    },
    /// A peer disabled notifications and indications on a descriptor.
    Unsubscribed {
        /// Connection the subscription belonged to.
        connection: ConnHandle,
        /// Handle of the configuration descriptor.
        cccd_handle: u16,
    },
    /// A connection went away and its subscriptions were dropped.
    Disconnected {
        /// Connection that went away.
        connection: ConnHandle,
    },
}

/// A GATT server exposing an attribute table to connected peers.
///
/// [`GattServer::run`] must be polled for requests to be answered.
pub struct GattServer<'values, 'd, T: Transport, const MAX: usize> {
    host: &'d BleHost<T>,
    server: AttributeServer<'values, 'd, HostMutex, MAX>,
    events: Channel<HostMutex, GattEvent, { config::ATT_RX_QUEUE_SIZE }>,
    confirmations: [Signal<HostMutex, ()>; config::MAX_CONNECTIONS],
}

impl<'values, 'd, T: Transport, const MAX: usize> GattServer<'values, 'd, T, MAX> {
    const CONFIRMATION: Signal<HostMutex, ()> = Signal::new();

    /// Create a new GATT server serving the given attribute table.
    pub fn new(host: &'d BleHost<T>, table: &'d AttributeTable<'values, HostMutex, MAX>) -> Self {
        Self {
            host,
            server: AttributeServer::new(table),
            events: Channel::new(),
            confirmations: [Self::CONFIRMATION; config::MAX_CONNECTIONS],
        }
    }

    /// The attribute table this server serves.
    pub fn table(&self) -> &'d AttributeTable<'values, HostMutex, MAX> {
        self.server.table()
    }

    /// Process inbound requests. Never returns unless the transport fails.
    pub async fn run(&self) -> Result<(), BleHostError<T::Error>> {
        loop {
            match self.host.server_events.receive().await {
                ServerEvent::Data { handle, pdu } => self.handle_data(handle, pdu.as_ref()).await?,
                ServerEvent::Disconnected { handle } => {
                    self.server.disconnect(handle);
                    self.publish(GattEvent::Disconnected { connection: handle });
                }
            }
        }
    }

    /// Next server event. Events are dropped when not consumed fast enough.
    pub async fn next_event(&self) -> GattEvent {
        self.events.receive().await
    }

    /// Send a notification for a characteristic to a connected peer.
    ///
    /// Fails with [`Error::NotSubscribed`] when the peer has not enabled
    /// notifications via the characteristic's configuration descriptor.
    pub async fn notify(
        &self,
        connection: &Connection<'_, HostMutex>,
        characteristic: &Characteristic,
        value: &[u8],
    ) -> Result<(), BleHostError<T::Error>> {
        let handle = connection.handle();
        if !self.server.notifications_enabled(handle, characteristic) {
            return Err(Error::NotSubscribed.into());
        }

        let mtu = self.host.connections.get_att_mtu(handle);
        let len = value.len().min(mtu as usize - 3);
        let rsp = AttRsp::Notify {
            handle: characteristic.handle,
            data: &value[..len],
        };
        self.send(handle, &rsp).await
    }

    /// Send an indication for a characteristic and wait for the confirmation.
    ///
    /// At most one indication per connection is in flight at any time.
    pub async fn indicate(
        &self,
        connection: &Connection<'_, HostMutex>,
        characteristic: &Characteristic,
        value: &[u8],
    ) -> Result<(), BleHostError<T::Error>> {
        let handle = connection.handle();
        if !self.server.indications_enabled(handle, characteristic) {
            return Err(Error::NotSubscribed.into());
        }
        let index = connection.index();

        self.host.connections.request_indication_slot(index).await?;
        let result = self.indicate_and_confirm(connection, handle, index, characteristic, value).await;
        self.host.connections.release_indication_slot(index);
        result
    }

    async fn indicate_and_confirm(
        &self,
        connection: &Connection<'_, HostMutex>,
        handle: ConnHandle,
        index: u8,
        characteristic: &Characteristic,
        value: &[u8],
    ) -> Result<(), BleHostError<T::Error>> {
        let mtu = self.host.connections.get_att_mtu(handle);
        let len = value.len().min(mtu as usize - 3);
        let rsp = AttRsp::Indicate {
            handle: characteristic.handle,
            data: &value[..len],
        };
        self.confirmations[index as usize].reset();
        self.send(handle, &rsp).await?;

        let confirmed = with_timeout(
            config::ATT_REQUEST_TIMEOUT,
            select(
                self.confirmations[index as usize].wait(),
                connection.wait_disconnected(),
            ),
        )
        .await
        .map_err(|_| Error::Timeout)?;
        match confirmed {
            Either::First(()) => Ok(()),
            Either::Second(()) => Err(Error::Disconnected.into()),
        }
    }

    async fn handle_data(&self, handle: ConnHandle, data: &[u8]) -> Result<(), BleHostError<T::Error>> {
        let req = match AttReq::decode(data) {
            Ok(req) => req,
            Err(_) => {
                warn!("[gatt] malformed request on {:?}", handle);
                let opcode = data.first().copied().unwrap_or(0);
                let rsp = AttRsp::Error {
                    request: opcode,
                    handle: 0,
                    code: att::AttErrorCode::INVALID_PDU,
                };
                return self.send(handle, &rsp).await;
            }
        };

        match req {
            AttReq::ExchangeMtu { mtu } => {
                let mtu = self
                    .host
                    .connections
                    .exchange_att_mtu(handle, mtu.min(config::ATT_MTU_MAX as u16));
                trace!("[gatt] negotiated mtu {} on {:?}", mtu, handle);
                let rsp = AttRsp::ExchangeMtu {
                    mtu: config::ATT_MTU_MAX as u16,
                };
                self.send(handle, &rsp).await
            }
            AttReq::ConfirmIndication => {
                if let Ok(index) = self.host.connections.index_of(handle) {
                    self.confirmations[index as usize].signal(());
                }
                Ok(())
            }
            AttReq::WriteCmd { handle: attr, data } => {
                // A failed command is silently dropped, without an event.
                if self.server.write_no_response(handle, attr, data).is_ok() {
                    self.emit_write_events(handle, &req);
                }
                Ok(())
            }
            req => {
                let mtu = self.host.connections.get_att_mtu(handle);
                let mut rsp = [0u8; config::L2CAP_MTU];
                let result = self.server.process(handle, &req, mtu, &mut rsp);
                match result {
                    Ok(Some(len)) => {
                        self.host.send_l2cap(handle, L2CAP_CID_ATT, &rsp[..len]).await?;
                        if rsp[0] != att::ATT_ERROR_RSP {
                            self.emit_write_events(handle, &req);
                        }
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(e) => Err(Error::from(e).into()),
                }
            }
        }
    }

    fn emit_write_events(&self, connection: ConnHandle, req: &AttReq<'_>) {
        let handle = match req {
            AttReq::Write { handle, .. } => *handle,
            AttReq::WriteCmd { handle, .. } => *handle,
            _ => return,
        };
        let event = if self.server.is_cccd(handle) {
            if self.server.cccd_value(connection, handle) != 0 {
                GattEvent::Subscribed {
                    connection,
                    cccd_handle: handle,
                }
            } else {
                GattEvent::Unsubscribed {
                    connection,
                    cccd_handle: handle,
                }
            }
        } else {
            GattEvent::Write { connection, handle }
        };
        self.publish(event);
    }

    fn publish(&self, event: GattEvent) {
        if self.events.try_send(event).is_err() {
            warn!("[gatt] event queue full, dropping {:?}", event);
        }
    }

    async fn send(&self, handle: ConnHandle, rsp: &AttRsp<'_>) -> Result<(), BleHostError<T::Error>> {
        let mut buf = [0u8; config::L2CAP_MTU];
        let len = rsp.size();
        rsp.encode(&mut buf[..len]).map_err(Error::from)?;
        self.host.send_l2cap(handle, L2CAP_CID_ATT, &buf[..len]).await
    }
}
