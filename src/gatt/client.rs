//! GATT client role.

use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::pubsub::{PubSubChannel, WaitResult};
use embassy_time::with_timeout;
use heapless::Vec;

use crate::att::{self, AttReq, AttRsp};
use crate::attribute::{
    Characteristic, CharacteristicProp, CharacteristicProps, CHARACTERISTIC_CCCD_UUID16, CHARACTERISTIC_UUID16,
    PRIMARY_SERVICE_UUID16,
};
use crate::config;
use crate::connection::Connection;
use crate::cursor::ReadCursor;
use crate::hci::Transport;
use crate::host::{BleHost, HostMutex};
use crate::l2cap::L2CAP_CID_ATT;
use crate::pdu::Pdu;
use crate::types::uuid::Uuid;
use crate::{BleHostError, Error};

const MAX_NOTIF: usize = config::GATT_CLIENT_NOTIFICATION_MAX_SUBSCRIBERS;
const NOTIF_QSIZE: usize = config::GATT_CLIENT_NOTIFICATION_QUEUE_SIZE;

/// Largest value payload carried in a notification or indication.
pub const NOTIFICATION_MAX: usize = config::ATT_MTU_MAX - 3;

/// A value received via notification or indication.
#[derive(Debug, PartialEq, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Notification {
    handle: u16,
    data: [u8; NOTIFICATION_MAX],
    len: usize,
}

impl AsRef<[u8]> for Notification {
    fn as_ref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// Listener for values pushed by the server for one characteristic.
pub struct NotificationListener<'lst> {
    handle: u16,
    listener: embassy_sync::pubsub::DynSubscriber<'lst, Notification>,
}

impl NotificationListener<'_> {
    /// Wait for the next value pushed for this characteristic.
    pub async fn next(&mut self) -> Notification {
        loop {
            if let WaitResult::Message(m) = self.listener.next_message().await {
                if m.handle == self.handle {
                    return m;
                }
            }
        }
    }
}

/// Handle for a GATT service.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Clone)]
pub struct ServiceHandle {
    start: u16,
    end: u16,
    uuid: Uuid,
}

impl ServiceHandle {
    /// The UUID this service was discovered with.
    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// The handle range covered by this service.
    pub fn handle_range(&self) -> (u16, u16) {
        (self.start, self.end)
    }
}

/// A characteristic discovered on a remote server.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone)]
pub struct CharacteristicHandle {
    declaration: u16,
    handle: u16,
    props: CharacteristicProps,
    uuid: Uuid,
}

impl CharacteristicHandle {
    /// The value handle of this characteristic.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// The handle of the characteristic declaration.
    pub fn declaration_handle(&self) -> u16 {
        self.declaration
    }

    /// The UUID of this characteristic.
    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// The property bitmask of this characteristic.
    pub fn properties(&self) -> CharacteristicProps {
        self.props
    }
}

/// A descriptor discovered on a remote server.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Clone)]
pub struct Descriptor {
    handle: u16,
    uuid: Uuid,
}

impl Descriptor {
    /// The handle of this descriptor.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// The UUID of this descriptor.
    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }
}

/// A GATT client for one connection.
///
/// [`GattClient::task`] must be polled for responses and notifications to be
/// processed. Requests are serialized, at most one is outstanding at a time.
pub struct GattClient<'reference, T: Transport, const MAX_SERVICES: usize> {
    known_services: RefCell<Vec<ServiceHandle, MAX_SERVICES>>,
    host: &'reference BleHost<T>,
    connection: Connection<'reference, HostMutex>,
    request_lock: Mutex<NoopRawMutex, ()>,
    response_channel: Channel<NoopRawMutex, Pdu, 1>,
    notifications: PubSubChannel<NoopRawMutex, Notification, NOTIF_QSIZE, MAX_NOTIF, 1>,
}

impl<'reference, T: Transport, const MAX_SERVICES: usize> GattClient<'reference, T, MAX_SERVICES> {
    /// Create a GATT client for the given connection.
    pub fn new(host: &'reference BleHost<T>, connection: &Connection<'reference, HostMutex>) -> Self {
        Self {
            known_services: RefCell::new(Vec::new()),
            host,
            connection: connection.clone(),
            request_lock: Mutex::new(()),
            response_channel: Channel::new(),
            notifications: PubSubChannel::new(),
        }
    }

    /// Negotiate the ATT MTU for this connection, returning the agreed value.
    ///
    /// The result is the smaller of `mtu` and what the server supports. The
    /// negotiated value applies for the rest of the connection.
    pub async fn exchange_mtu(&self, mtu: u16) -> Result<u16, BleHostError<T::Error>> {
        let mtu = mtu.min(config::ATT_MTU_MAX as u16);
        let response = self.request(AttReq::ExchangeMtu { mtu }).await?;
        match Self::response(response.as_ref())? {
            AttRsp::ExchangeMtu { mtu: server_mtu } => {
                let agreed = self
                    .host
                    .connections
                    .exchange_att_mtu(self.connection.handle(), mtu.min(server_mtu));
                trace!("[gatt client] negotiated mtu {}", agreed);
                Ok(agreed)
            }
            AttRsp::Error { code, .. } => Err(Error::Att(code).into()),
            _ => Err(Error::UnexpectedGattResponse.into()),
        }
    }

    /// Discover primary services associated with a UUID.
    pub async fn services_by_uuid(&self, uuid: &Uuid) -> Result<Vec<ServiceHandle, MAX_SERVICES>, BleHostError<T::Error>> {
        let mut start: u16 = 0x0001;
        let mut result = Vec::new();

        loop {
            let data = AttReq::FindByTypeValue {
                start_handle: start,
                end_handle: 0xffff,
                att_type: 0x2800,
                att_value: uuid.as_raw(),
            };

            let response = self.request(data).await?;
            match Self::response(response.as_ref())? {
                AttRsp::Error { code, .. } => {
                    if code == att::AttErrorCode::ATTRIBUTE_NOT_FOUND {
                        break;
                    }
                    return Err(Error::Att(code).into());
                }
                AttRsp::FindByTypeValue { mut it } => {
                    let mut end: u16 = 0;
                    while let Some(res) = it.next() {
                        let (handle, e) = res?;
                        end = e;
                        let svc = ServiceHandle {
                            start: handle,
                            end,
                            uuid: uuid.clone(),
                        };
                        result.push(svc.clone()).map_err(|_| Error::InsufficientSpace)?;
                        self.known_services
                            .borrow_mut()
                            .push(svc)
                            .map_err(|_| Error::InsufficientSpace)?;
                    }
                    if end == 0xffff {
                        break;
                    }
                    start = end + 1;
                }
                rsp => {
                    trace!("[gatt client] unexpected response: {:?}", rsp);
                    return Err(Error::UnexpectedGattResponse.into());
                }
            }
        }

        Ok(result)
    }

    /// Discover all primary services.
    pub async fn services(&self) -> Result<Vec<ServiceHandle, MAX_SERVICES>, BleHostError<T::Error>> {
        let mut start: u16 = 0x0001;
        let mut result = Vec::new();

        loop {
            let data = AttReq::ReadByGroupType {
                start,
                end: 0xffff,
                group_type: Uuid::new_short(0x2800),
            };

            let response = self.request(data).await?;
            match Self::response(response.as_ref())? {
                AttRsp::ReadByGroupType { mut it } => {
                    let mut end: u16 = 0;
                    while let Some(item) = it.next() {
                        let (first, e, value) = item?;
                        end = e;
                        let uuid = Uuid::try_from(value)?;
                        let svc = ServiceHandle { start: first, end, uuid };
                        result.push(svc.clone()).map_err(|_| Error::InsufficientSpace)?;
                        self.known_services
                            .borrow_mut()
                            .push(svc)
                            .map_err(|_| Error::InsufficientSpace)?;
                    }
                    if end == 0xffff {
                        break;
                    }
                    start = end + 1;
                }
                AttRsp::Error { code, .. } => {
                    if code == att::AttErrorCode::ATTRIBUTE_NOT_FOUND {
                        break;
                    }
                    return Err(Error::Att(code).into());
                }
                _ => return Err(Error::UnexpectedGattResponse.into()),
            }
        }

        Ok(result)
    }

    /// Discover the characteristics of a service.
    pub async fn characteristics(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicHandle, MAX_SERVICES>, BleHostError<T::Error>> {
        let mut start = service.start;
        let mut result = Vec::new();

        while start <= service.end {
            let data = AttReq::ReadByType {
                start,
                end: service.end,
                attribute_type: Uuid::new_short(0x2803),
            };

            let response = self.request(data).await?;
            match Self::response(response.as_ref())? {
                AttRsp::ReadByType { mut it } => {
                    while let Some(item) = it.next() {
                        let (declaration, item) = item?;
                        let (props, handle, uuid) = decode_declaration(item)?;
                        result
                            .push(CharacteristicHandle {
                                declaration,
                                handle,
                                props,
                                uuid,
                            })
                            .map_err(|_| Error::InsufficientSpace)?;
                        if handle == 0xffff {
                            return Ok(result);
                        }
                        start = handle + 1;
                    }
                }
                AttRsp::Error { code, .. } => {
                    if code == att::AttErrorCode::ATTRIBUTE_NOT_FOUND {
                        break;
                    }
                    return Err(Error::Att(code).into());
                }
                _ => return Err(Error::UnexpectedGattResponse.into()),
            }
        }

        Ok(result)
    }

    /// Discover the descriptors of a characteristic.
    ///
    /// Walks the handles after the value handle, stopping at the next
    /// characteristic or service declaration or at the end of the service.
    pub async fn descriptors(
        &self,
        service: &ServiceHandle,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<Descriptor, MAX_SERVICES>, BleHostError<T::Error>> {
        let mut result = Vec::new();
        let mut start = characteristic.handle + 1;

        'walk: while start != 0 && start <= service.end {
            let data = AttReq::FindInformation {
                start_handle: start,
                end_handle: service.end,
            };

            let response = self.request(data).await?;
            match Self::response(response.as_ref())? {
                AttRsp::FindInformation { mut it } => {
                    while let Some(item) = it.next() {
                        let (handle, uuid) = item?;
                        if uuid == CHARACTERISTIC_UUID16 || uuid == PRIMARY_SERVICE_UUID16 {
                            break 'walk;
                        }
                        result
                            .push(Descriptor { handle, uuid })
                            .map_err(|_| Error::InsufficientSpace)?;
                        if handle == 0xffff {
                            break 'walk;
                        }
                        start = handle + 1;
                    }
                }
                AttRsp::Error { code, .. } => {
                    if code == att::AttErrorCode::ATTRIBUTE_NOT_FOUND {
                        break;
                    }
                    return Err(Error::Att(code).into());
                }
                _ => return Err(Error::UnexpectedGattResponse.into()),
            }
        }

        Ok(result)
    }

    /// Discover a characteristic in a given service using a UUID.
    pub async fn characteristic_by_uuid(
        &self,
        service: &ServiceHandle,
        uuid: &Uuid,
    ) -> Result<Characteristic, BleHostError<T::Error>> {
        let mut start: u16 = service.start;
        let mut found_notify_handle = None;

        loop {
            let data = AttReq::ReadByType {
                start,
                end: service.end,
                attribute_type: Uuid::new_short(0x2803),
            };
            let response = self.request(data).await?;

            match Self::response(response.as_ref())? {
                AttRsp::ReadByType { mut it } => {
                    while let Some(item) = it.next() {
                        let (_decl_handle, item) = item?;
                        let (props, handle, decl_uuid) = decode_declaration(item)?;

                        // A previous match needs the next declaration to bound
                        // the descriptor search.
                        if let Some(found) = found_notify_handle {
                            return Ok(Characteristic {
                                handle: found,
                                cccd_handle: Some(self.find_cccd(found, handle - 1).await?),
                            });
                        }

                        if *uuid == decl_uuid {
                            if !props.any(&[CharacteristicProp::Indicate, CharacteristicProp::Notify]) {
                                return Ok(Characteristic {
                                    handle,
                                    cccd_handle: None,
                                });
                            }
                            found_notify_handle = Some(handle);
                        }

                        if handle == 0xffff {
                            return Err(Error::NotFound.into());
                        }
                        start = handle + 1;
                    }
                }
                AttRsp::Error { code, .. } => match code {
                    att::AttErrorCode::ATTRIBUTE_NOT_FOUND => match found_notify_handle {
                        Some(found) => {
                            return Ok(Characteristic {
                                handle: found,
                                cccd_handle: Some(self.find_cccd(found, service.end).await?),
                            });
                        }
                        None => return Err(Error::NotFound.into()),
                    },
                    _ => return Err(Error::Att(code).into()),
                },
                _ => return Err(Error::UnexpectedGattResponse.into()),
            }
        }
    }

    async fn find_cccd(&self, start: u16, end: u16) -> Result<u16, BleHostError<T::Error>> {
        let mut start_handle = start;

        while start_handle <= end {
            let data = AttReq::FindInformation {
                start_handle,
                end_handle: end,
            };

            let response = self.request(data).await?;
            match Self::response(response.as_ref())? {
                AttRsp::FindInformation { mut it } => {
                    while let Some(item) = it.next() {
                        let (handle, uuid) = item?;
                        if uuid == CHARACTERISTIC_CCCD_UUID16 {
                            return Ok(handle);
                        }
                        start_handle = handle + 1;
                    }
                }
                AttRsp::Error { code, .. } => return Err(Error::Att(code).into()),
                _ => return Err(Error::UnexpectedGattResponse.into()),
            }
        }
        Err(Error::NotFound.into())
    }

    /// Read a characteristic described by a handle.
    ///
    /// The number of bytes copied into the provided buffer is returned.
    pub async fn read_characteristic(
        &self,
        characteristic: &Characteristic,
        dest: &mut [u8],
    ) -> Result<usize, BleHostError<T::Error>> {
        self.read_by_handle(characteristic.handle, dest).await
    }

    /// Read a descriptor value.
    ///
    /// The number of bytes copied into the provided buffer is returned.
    pub async fn read_descriptor(
        &self,
        descriptor: &Descriptor,
        dest: &mut [u8],
    ) -> Result<usize, BleHostError<T::Error>> {
        self.read_by_handle(descriptor.handle, dest).await
    }

    async fn read_by_handle(&self, handle: u16, dest: &mut [u8]) -> Result<usize, BleHostError<T::Error>> {
        let response = self.request(AttReq::Read { handle }).await?;

        match Self::response(response.as_ref())? {
            AttRsp::Read { data } => {
                let to_copy = data.len().min(dest.len());
                dest[..to_copy].copy_from_slice(&data[..to_copy]);
                Ok(to_copy)
            }
            AttRsp::Error { code, .. } => Err(Error::Att(code).into()),
            _ => Err(Error::UnexpectedGattResponse.into()),
        }
    }

    /// Read a characteristic described by a UUID.
    ///
    /// The number of bytes copied into the provided buffer is returned.
    pub async fn read_characteristic_by_uuid(
        &self,
        service: &ServiceHandle,
        uuid: &Uuid,
        dest: &mut [u8],
    ) -> Result<usize, BleHostError<T::Error>> {
        let data = AttReq::ReadByType {
            start: service.start,
            end: service.end,
            attribute_type: uuid.clone(),
        };

        let response = self.request(data).await?;
        match Self::response(response.as_ref())? {
            AttRsp::ReadByType { mut it } => {
                let mut to_copy = 0;
                if let Some(item) = it.next() {
                    let (_handle, data) = item?;
                    to_copy = data.len().min(dest.len());
                    dest[..to_copy].copy_from_slice(&data[..to_copy]);
                }
                Ok(to_copy)
            }
            AttRsp::Error { code, .. } => Err(Error::Att(code).into()),
            _ => Err(Error::UnexpectedGattResponse.into()),
        }
    }

    /// Write to a characteristic described by a handle.
    pub async fn write_characteristic(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
    ) -> Result<(), BleHostError<T::Error>> {
        self.write_by_handle(characteristic.handle, data).await
    }

    /// Write a descriptor value.
    pub async fn write_descriptor(&self, descriptor: &Descriptor, data: &[u8]) -> Result<(), BleHostError<T::Error>> {
        self.write_by_handle(descriptor.handle, data).await
    }

    async fn write_by_handle(&self, handle: u16, data: &[u8]) -> Result<(), BleHostError<T::Error>> {
        let response = self.request(AttReq::Write { handle, data }).await?;

        match Self::response(response.as_ref())? {
            AttRsp::Write => Ok(()),
            AttRsp::Error { code, .. } => Err(Error::Att(code).into()),
            _ => Err(Error::UnexpectedGattResponse.into()),
        }
    }

    /// Write without waiting for a response to a characteristic described by a handle.
    pub async fn write_characteristic_without_response(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
    ) -> Result<(), BleHostError<T::Error>> {
        self.send(AttReq::WriteCmd {
            handle: characteristic.handle,
            data,
        })
        .await
    }

    /// Subscribe to notifications or indications of a given characteristic.
    ///
    /// A listener is returned, which has a `next()` method.
    pub async fn subscribe(
        &self,
        characteristic: &Characteristic,
        indication: bool,
    ) -> Result<NotificationListener<'_>, BleHostError<T::Error>> {
        let value = u16::to_le_bytes(if indication { 0x02 } else { 0x01 });
        let cccd_handle = characteristic.cccd_handle.ok_or(Error::NotSupported)?;

        // On a closed connection no descriptor write is attempted, the
        // listener simply never fires.
        let response = match self
            .request(AttReq::Write {
                handle: cccd_handle,
                data: &value,
            })
            .await
        {
            Ok(response) => Some(response),
            Err(BleHostError::BleHost(Error::Disconnected)) => None,
            Err(e) => return Err(e),
        };

        if let Some(response) = response {
            match Self::response(response.as_ref())? {
                AttRsp::Write => {}
                AttRsp::Error { code, .. } => return Err(Error::Att(code).into()),
                _ => return Err(Error::UnexpectedGattResponse.into()),
            }
        }

        match self.notifications.dyn_subscriber() {
            Ok(listener) => Ok(NotificationListener {
                listener,
                handle: characteristic.handle,
            }),
            Err(_) => Err(Error::GattSubscriberLimitReached.into()),
        }
    }

    /// Unsubscribe from a given characteristic.
    ///
    /// Values already queued may still be delivered to listeners. Calling
    /// this on a closed connection is a no-op.
    pub async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<(), BleHostError<T::Error>> {
        let response = match self
            .request(AttReq::Write {
                handle: characteristic.cccd_handle.ok_or(Error::NotSupported)?,
                data: &[0, 0],
            })
            .await
        {
            Ok(response) => response,
            Err(BleHostError::BleHost(Error::Disconnected)) => return Ok(()),
            Err(e) => return Err(e),
        };

        match Self::response(response.as_ref())? {
            AttRsp::Write => Ok(()),
            AttRsp::Error { code, .. } => Err(Error::Att(code).into()),
            _ => Err(Error::UnexpectedGattResponse.into()),
        }
    }

    /// Task which handles responses and notifications for this connection.
    pub async fn task(&self) -> Result<(), BleHostError<T::Error>> {
        loop {
            let pdu = self.host.connections.receive_att_client(self.connection.index()).await;
            match pdu.as_ref().first() {
                Some(&att::ATT_HANDLE_VALUE_NTF) => self.handle_value_packet(&pdu.as_ref()[1..])?,
                Some(&att::ATT_HANDLE_VALUE_IND) => {
                    // Confirm before delivery, the server serializes on this.
                    self.send(AttReq::ConfirmIndication).await?;
                    self.handle_value_packet(&pdu.as_ref()[1..])?;
                }
                _ => {
                    if self.response_channel.try_send(pdu).is_err() {
                        warn!("[gatt client] dropping response without a requester");
                    }
                }
            }
        }
    }

    fn handle_value_packet(&self, data: &[u8]) -> Result<(), BleHostError<T::Error>> {
        let mut r = ReadCursor::new(data);
        let handle: u16 = r.read().map_err(Error::from)?;
        let value = r.remaining();

        let mut data = [0u8; NOTIFICATION_MAX];
        let to_copy = data.len().min(value.len());
        data[..to_copy].copy_from_slice(&value[..to_copy]);
        let n = Notification {
            handle,
            data,
            len: to_copy,
        };
        self.notifications.immediate_publisher().publish_immediate(n);
        Ok(())
    }

    /// Perform a request and wait for the response.
    async fn request(&self, req: AttReq<'_>) -> Result<Pdu, BleHostError<T::Error>> {
        let _guard = self.request_lock.lock().await;
        self.response_channel.clear();
        self.send(req).await?;

        let result = with_timeout(
            config::ATT_REQUEST_TIMEOUT,
            select(self.response_channel.receive(), self.connection.wait_disconnected()),
        )
        .await
        .map_err(|_| Error::Timeout)?;
        match result {
            Either::First(pdu) => Ok(pdu),
            Either::Second(()) => Err(Error::Disconnected.into()),
        }
    }

    async fn send(&self, req: AttReq<'_>) -> Result<(), BleHostError<T::Error>> {
        let mut buf = [0u8; config::L2CAP_MTU];
        let len = req.size();
        req.encode(&mut buf[..len]).map_err(Error::from)?;
        self.host
            .send_l2cap(self.connection.handle(), L2CAP_CID_ATT, &buf[..len])
            .await
    }

    fn response(data: &[u8]) -> Result<AttRsp<'_>, Error> {
        AttRsp::decode(data).map_err(Error::from)
    }
}

fn decode_declaration(item: &[u8]) -> Result<(CharacteristicProps, u16, Uuid), Error> {
    let mut r = ReadCursor::new(item);
    let props: u8 = r.read()?;
    let handle: u16 = r.read()?;
    let uuid = Uuid::try_from(r.remaining())?;
    Ok((CharacteristicProps(props), handle, uuid))
}
