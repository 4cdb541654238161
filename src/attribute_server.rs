//! Request dispatch for the GATT server role.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::att::{self, AttErrorCode, AttReq};
use crate::attribute::{AttributeData, AttributeTable, Characteristic, Uuid};
use crate::codec;
use crate::config;
use crate::cursor::WriteCursor;
use crate::hci::ConnHandle;

/// Client characteristic configuration values tracked for one connection.
const CCCD_SLOTS: usize = 8;

const NOTIFICATIONS_ENABLED: u16 = 0x0001;
const INDICATIONS_ENABLED: u16 = 0x0002;

#[derive(Default)]
struct ConnectionCccd {
    handle: Option<ConnHandle>,
    entries: heapless::Vec<(u16, u16), CCCD_SLOTS>,
}

impl ConnectionCccd {
    const EMPTY: Self = Self {
        handle: None,
        entries: heapless::Vec::new(),
    };

    fn get(&self, cccd_handle: u16) -> u16 {
        self.entries
            .iter()
            .find(|(handle, _)| *handle == cccd_handle)
            .map(|(_, value)| *value)
            .unwrap_or(0)
    }

    fn set(&mut self, cccd_handle: u16, value: u16) -> Result<(), AttErrorCode> {
        for entry in self.entries.iter_mut() {
            if entry.0 == cccd_handle {
                entry.1 = value;
                return Ok(());
            }
        }
        self.entries
            .push((cccd_handle, value))
            .map_err(|_| AttErrorCode::INSUFFICIENT_RESOURCES)
    }
}

/// Dispatches incoming requests against an attribute table and tracks
/// per-connection descriptor state.
///
/// Subscription state is keyed by connection and cleared when that
/// connection goes away.
pub struct AttributeServer<'values, 'd, M: RawMutex, const MAX: usize> {
    table: &'d AttributeTable<'values, M, MAX>,
    cccd: Mutex<M, RefCell<[ConnectionCccd; config::MAX_CONNECTIONS]>>,
}

impl<'values, 'd, M: RawMutex, const MAX: usize> AttributeServer<'values, 'd, M, MAX> {
    /// Create a new attribute server over the given table.
    pub fn new(table: &'d AttributeTable<'values, M, MAX>) -> Self {
        Self {
            table,
            cccd: Mutex::new(RefCell::new([ConnectionCccd::EMPTY; config::MAX_CONNECTIONS])),
        }
    }

    pub(crate) fn table(&self) -> &'d AttributeTable<'values, M, MAX> {
        self.table
    }

    /// Process one inbound PDU and write the response, if any, into `rsp`.
    ///
    /// The response never exceeds the negotiated `mtu`. Commands and
    /// confirmations produce no response.
    pub fn process(
        &self,
        conn: ConnHandle,
        req: &AttReq<'_>,
        mtu: u16,
        rsp: &mut [u8],
    ) -> Result<Option<usize>, codec::Error> {
        let limit = (mtu as usize).min(rsp.len());
        let rsp = &mut rsp[..limit];
        let len = match req {
            AttReq::ReadByGroupType { start, end, group_type } => {
                self.handle_read_by_group_type(*start, *end, group_type, rsp)?
            }
            AttReq::ReadByType {
                start,
                end,
                attribute_type,
            } => self.handle_read_by_type(*start, *end, attribute_type, rsp)?,
            AttReq::FindInformation {
                start_handle,
                end_handle,
            } => self.handle_find_information(*start_handle, *end_handle, rsp)?,
            AttReq::FindByTypeValue {
                start_handle,
                end_handle,
                att_type,
                att_value,
            } => self.handle_find_by_type_value(*start_handle, *end_handle, *att_type, att_value, rsp)?,
            AttReq::Read { handle } => self.handle_read(conn, *handle, rsp)?,
            AttReq::ReadBlob { handle, offset } => self.handle_read_blob(conn, *handle, *offset, rsp)?,
            AttReq::Write { handle, data } => self.handle_write(conn, *handle, data, rsp)?,
            AttReq::WriteCmd { handle, data } => {
                self.do_write(conn, *handle, data).ok();
                return Ok(None);
            }
            AttReq::ReadMultiple { .. } => error_response(rsp, att::ATT_READ_MULTIPLE_REQ, 0, AttErrorCode::REQUEST_NOT_SUPPORTED)?,
            AttReq::PrepareWrite { handle, .. } => {
                error_response(rsp, att::ATT_PREPARE_WRITE_REQ, *handle, AttErrorCode::REQUEST_NOT_SUPPORTED)?
            }
            AttReq::ExecuteWrite { .. } => {
                error_response(rsp, att::ATT_EXECUTE_WRITE_REQ, 0, AttErrorCode::REQUEST_NOT_SUPPORTED)?
            }
            // Negotiated by the caller, confirmations consumed by the caller.
            AttReq::ExchangeMtu { .. } | AttReq::ConfirmIndication => return Ok(None),
        };
        Ok(Some(len))
    }

    /// Whether the peer on `conn` has enabled notifications via this descriptor.
    pub fn notifications_enabled(&self, conn: ConnHandle, characteristic: &Characteristic) -> bool {
        characteristic
            .cccd_handle
            .map(|cccd| self.cccd_value(conn, cccd) & NOTIFICATIONS_ENABLED != 0)
            .unwrap_or(false)
    }

    /// Whether the peer on `conn` has enabled indications via this descriptor.
    pub fn indications_enabled(&self, conn: ConnHandle, characteristic: &Characteristic) -> bool {
        characteristic
            .cccd_handle
            .map(|cccd| self.cccd_value(conn, cccd) & INDICATIONS_ENABLED != 0)
            .unwrap_or(false)
    }

    pub(crate) fn cccd_value(&self, conn: ConnHandle, cccd_handle: u16) -> u16 {
        self.cccd.lock(|state| {
            let state = state.borrow();
            state
                .iter()
                .find(|c| c.handle == Some(conn))
                .map(|c| c.get(cccd_handle))
                .unwrap_or(0)
        })
    }

    /// Forget all descriptor state for a connection.
    pub(crate) fn disconnect(&self, conn: ConnHandle) {
        self.cccd.lock(|state| {
            let mut state = state.borrow_mut();
            for c in state.iter_mut() {
                if c.handle == Some(conn) {
                    c.handle = None;
                    c.entries.clear();
                }
            }
        })
    }

    pub(crate) fn is_cccd(&self, handle: u16) -> bool {
        self.table.iterate(|mut it| {
            while let Some(att) = it.next() {
                if att.handle == handle {
                    return matches!(att.data, AttributeData::Cccd);
                }
            }
            false
        })
    }

    fn set_cccd_value(&self, conn: ConnHandle, cccd_handle: u16, value: u16) -> Result<(), AttErrorCode> {
        self.cccd.lock(|state| {
            let mut state = state.borrow_mut();
            if let Some(c) = state.iter_mut().find(|c| c.handle == Some(conn)) {
                return c.set(cccd_handle, value);
            }
            if let Some(c) = state.iter_mut().find(|c| c.handle.is_none()) {
                c.handle = Some(conn);
                return c.set(cccd_handle, value);
            }
            Err(AttErrorCode::INSUFFICIENT_RESOURCES)
        })
    }

    fn handle_read_by_group_type(
        &self,
        start: u16,
        end: u16,
        group_type: &Uuid,
        rsp: &mut [u8],
    ) -> Result<usize, codec::Error> {
        let mut w = WriteCursor::new(rsp);
        let mut item_len = 0;
        let (err, len) = {
            let (mut header, mut body) = w.split(2)?;
            let err = self.table.iterate(|mut it| {
                let mut err = Err(AttErrorCode::ATTRIBUTE_NOT_FOUND);
                while let Some(att) = it.next() {
                    if att.uuid == *group_type && att.handle >= start && att.handle <= end {
                        let value = att.data.read(0, body.write_buf().get_mut(4..).unwrap_or(&mut []));
                        match value {
                            Ok(len) if item_len == 0 || item_len == len => {
                                if body.available() < 4 + len {
                                    break;
                                }
                                item_len = len;
                                body.write(att.handle)?;
                                body.write(att.last_handle_in_group)?;
                                body.commit(len)?;
                                err = Ok(());
                            }
                            Ok(_) => break,
                            Err(e) => {
                                if err.is_err() {
                                    err = Err(e);
                                }
                                break;
                            }
                        }
                    }
                }
                Ok::<_, codec::Error>(err)
            })?;
            if err.is_ok() {
                header.write(att::ATT_READ_BY_GROUP_TYPE_RSP)?;
                header.write(4 + item_len as u8)?;
            }
            (err, header.len() + body.len())
        };
        match err {
            Ok(()) => Ok(len),
            Err(e) => error_response_cursor(w, att::ATT_READ_BY_GROUP_TYPE_REQ, start, e),
        }
    }

    fn handle_read_by_type(
        &self,
        start: u16,
        end: u16,
        attribute_type: &Uuid,
        rsp: &mut [u8],
    ) -> Result<usize, codec::Error> {
        let mut w = WriteCursor::new(rsp);
        let mut item_len = 0;
        let (err, len) = {
            let (mut header, mut body) = w.split(2)?;
            let err = self.table.iterate(|mut it| {
                let mut err = Err(AttErrorCode::ATTRIBUTE_NOT_FOUND);
                while let Some(att) = it.next() {
                    if att.uuid == *attribute_type && att.handle >= start && att.handle <= end {
                        let value = att.data.read(0, body.write_buf().get_mut(2..).unwrap_or(&mut []));
                        match value {
                            Ok(len) if item_len == 0 || item_len == len => {
                                if body.available() < 2 + len {
                                    break;
                                }
                                item_len = len;
                                body.write(att.handle)?;
                                body.commit(len)?;
                                err = Ok(());
                            }
                            Ok(_) => break,
                            Err(e) => {
                                if err.is_err() {
                                    err = Err(e);
                                }
                                break;
                            }
                        }
                    }
                }
                Ok::<_, codec::Error>(err)
            })?;
            if err.is_ok() {
                header.write(att::ATT_READ_BY_TYPE_RSP)?;
                header.write(2 + item_len as u8)?;
            }
            (err, header.len() + body.len())
        };
        match err {
            Ok(()) => Ok(len),
            Err(e) => error_response_cursor(w, att::ATT_READ_BY_TYPE_REQ, start, e),
        }
    }

    fn handle_find_information(&self, start: u16, end: u16, rsp: &mut [u8]) -> Result<usize, codec::Error> {
        let mut w = WriteCursor::new(rsp);
        let found = {
            let (mut header, mut body) = w.split(2)?;
            let mut format = 0;
            self.table.iterate(|mut it| {
                while let Some(att) = it.next() {
                    if att.handle >= start && att.handle <= end {
                        if format == 0 {
                            format = att.uuid.get_type();
                        } else if format != att.uuid.get_type() {
                            break;
                        }
                        if body.available() < 2 + att.uuid.as_raw().len() {
                            break;
                        }
                        body.write(att.handle)?;
                        body.append(att.uuid.as_raw())?;
                    }
                }
                Ok::<_, codec::Error>(())
            })?;
            if body.len() > 0 {
                header.write(att::ATT_FIND_INFORMATION_RSP)?;
                header.write(format)?;
                Some(header.len() + body.len())
            } else {
                None
            }
        };
        if let Some(len) = found {
            Ok(len)
        } else {
            error_response_cursor(w, att::ATT_FIND_INFORMATION_REQ, start, AttErrorCode::ATTRIBUTE_NOT_FOUND)
        }
    }

    fn handle_find_by_type_value(
        &self,
        start: u16,
        end: u16,
        att_type: u16,
        att_value: &[u8],
        rsp: &mut [u8],
    ) -> Result<usize, codec::Error> {
        let uuid = Uuid::new_short(att_type);
        let mut w = WriteCursor::new(rsp);
        let found = {
            let (mut header, mut body) = w.split(1)?;
            self.table.iterate(|mut it| {
                let mut value = [0u8; 16];
                while let Some(att) = it.next() {
                    if att.uuid == uuid && att.handle >= start && att.handle <= end {
                        let matched = match att.data.read(0, &mut value[..]) {
                            Ok(len) => &value[..len] == att_value,
                            Err(_) => false,
                        };
                        if matched {
                            if body.available() < 4 {
                                break;
                            }
                            body.write(att.handle)?;
                            body.write(att.last_handle_in_group)?;
                        }
                    }
                }
                Ok::<_, codec::Error>(())
            })?;
            if body.len() > 0 {
                header.write(att::ATT_FIND_BY_TYPE_VALUE_RSP)?;
                Some(header.len() + body.len())
            } else {
                None
            }
        };
        if let Some(len) = found {
            Ok(len)
        } else {
            error_response_cursor(w, att::ATT_FIND_BY_TYPE_VALUE_REQ, start, AttErrorCode::ATTRIBUTE_NOT_FOUND)
        }
    }

    fn handle_read(&self, conn: ConnHandle, handle: u16, rsp: &mut [u8]) -> Result<usize, codec::Error> {
        self.do_read(conn, handle, 0, att::ATT_READ_RSP, att::ATT_READ_REQ, rsp)
    }

    fn handle_read_blob(&self, conn: ConnHandle, handle: u16, offset: u16, rsp: &mut [u8]) -> Result<usize, codec::Error> {
        self.do_read(conn, handle, offset, att::ATT_READ_BLOB_RSP, att::ATT_READ_BLOB_REQ, rsp)
    }

    fn do_read(
        &self,
        conn: ConnHandle,
        handle: u16,
        offset: u16,
        rsp_opcode: u8,
        req_opcode: u8,
        rsp: &mut [u8],
    ) -> Result<usize, codec::Error> {
        let mut w = WriteCursor::new(rsp);
        w.write(rsp_opcode)?;
        let err = self.table.iterate(|mut it| {
            let mut err = Err(AttErrorCode::ATTRIBUTE_NOT_FOUND);
            while let Some(att) = it.next() {
                if att.handle == handle {
                    if matches!(att.data, AttributeData::Cccd) {
                        let value = self.cccd_value(conn, handle);
                        err = if offset == 0 {
                            w.write(value).map_err(|_| AttErrorCode::UNLIKELY_ERROR)
                        } else {
                            Err(AttErrorCode::INVALID_OFFSET)
                        };
                    } else {
                        err = att.data.read(offset as usize, w.write_buf()).and_then(|len| {
                            w.commit(len).map_err(|_| AttErrorCode::UNLIKELY_ERROR)
                        });
                    }
                    break;
                }
            }
            err
        });
        match err {
            Ok(()) => Ok(w.len()),
            Err(e) => error_response_cursor(w, req_opcode, handle, e),
        }
    }

    fn handle_write(&self, conn: ConnHandle, handle: u16, data: &[u8], rsp: &mut [u8]) -> Result<usize, codec::Error> {
        let mut w = WriteCursor::new(rsp);
        match self.do_write(conn, handle, data) {
            Ok(()) => {
                w.write(att::ATT_WRITE_RSP)?;
                Ok(w.len())
            }
            Err(e) => error_response_cursor(w, att::ATT_WRITE_REQ, handle, e),
        }
    }

    /// Applies a Write Command. The caller learns whether the write landed,
    /// the peer never does.
    pub(crate) fn write_no_response(&self, conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), AttErrorCode> {
        self.do_write(conn, handle, data)
    }

    fn do_write(&self, conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), AttErrorCode> {
        self.table.iterate(|mut it| {
            while let Some(att) = it.next() {
                if att.handle == handle {
                    if matches!(att.data, AttributeData::Cccd) {
                        if data.len() != 2 {
                            return Err(AttErrorCode::INVALID_ATTRIBUTE_VALUE_LENGTH);
                        }
                        let value = u16::from_le_bytes([data[0], data[1]]);
                        return self.set_cccd_value(conn, handle, value);
                    }
                    return att.data.write(0, data);
                }
            }
            Err(AttErrorCode::ATTRIBUTE_NOT_FOUND)
        })
    }
}

fn error_response(rsp: &mut [u8], request: u8, handle: u16, code: AttErrorCode) -> Result<usize, codec::Error> {
    error_response_cursor(WriteCursor::new(rsp), request, handle, code)
}

fn error_response_cursor(mut w: WriteCursor<'_>, request: u8, handle: u16, code: AttErrorCode) -> Result<usize, codec::Error> {
    w.reset();
    w.write(att::ATT_ERROR_RSP)?;
    w.write(request)?;
    w.write(handle)?;
    w.write(code.raw())?;
    Ok(w.len())
}

#[cfg(test)]
mod tests {
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    use super::*;
    use crate::att::ATT_MTU_DEFAULT;
    use crate::attribute::{CharacteristicProp, Service};

    fn battery_table(
        storage: &mut [u8; 2],
    ) -> (AttributeTable<'_, CriticalSectionRawMutex, 16>, Characteristic) {
        let mut table = AttributeTable::new();
        let chara = {
            let mut svc = table.add_service(Service::new(0x180fu16));
            svc.add_characteristic(
                0x2a19u16,
                &[
                    CharacteristicProp::Read,
                    CharacteristicProp::Write,
                    CharacteristicProp::Notify,
                ],
                &mut storage[..],
            )
            .build()
        };
        (table, chara)
    }

    #[test]
    fn read_by_group_type_returns_service() {
        let mut storage = [0u8; 2];
        let (table, _) = battery_table(&mut storage);
        let server: AttributeServer<'_, '_, CriticalSectionRawMutex, 16> = AttributeServer::new(&table);

        let mut rsp = [0u8; 64];
        let req = AttReq::ReadByGroupType {
            start: 1,
            end: 0xffff,
            group_type: Uuid::new_short(0x2800),
        };
        let len = unwrap!(server.process(ConnHandle::new(1), &req, ATT_MTU_DEFAULT, &mut rsp)).unwrap();
        assert_eq!(&rsp[..len], &[0x11, 0x06, 0x01, 0x00, 0x04, 0x00, 0x0f, 0x18]);
    }

    #[test]
    fn read_by_type_returns_declaration() {
        let mut storage = [0u8; 2];
        let (table, _) = battery_table(&mut storage);
        let server: AttributeServer<'_, '_, CriticalSectionRawMutex, 16> = AttributeServer::new(&table);

        let mut rsp = [0u8; 64];
        let req = AttReq::ReadByType {
            start: 1,
            end: 0xffff,
            attribute_type: Uuid::new_short(0x2803),
        };
        let len = unwrap!(server.process(ConnHandle::new(1), &req, ATT_MTU_DEFAULT, &mut rsp)).unwrap();
        assert_eq!(&rsp[..len], &[0x09, 0x07, 0x02, 0x00, 0x1a, 0x03, 0x00, 0x19, 0x2a]);
    }

    #[test]
    fn find_information_lists_handles_and_uuids() {
        let mut storage = [0u8; 2];
        let (table, _) = battery_table(&mut storage);
        let server: AttributeServer<'_, '_, CriticalSectionRawMutex, 16> = AttributeServer::new(&table);

        let mut rsp = [0u8; 64];
        let req = AttReq::FindInformation {
            start_handle: 3,
            end_handle: 4,
        };
        let len = unwrap!(server.process(ConnHandle::new(1), &req, ATT_MTU_DEFAULT, &mut rsp)).unwrap();
        assert_eq!(
            &rsp[..len],
            &[0x05, 0x01, 0x03, 0x00, 0x19, 0x2a, 0x04, 0x00, 0x02, 0x29]
        );

        let req = AttReq::FindInformation {
            start_handle: 5,
            end_handle: 0xffff,
        };
        let len = unwrap!(server.process(ConnHandle::new(1), &req, ATT_MTU_DEFAULT, &mut rsp)).unwrap();
        assert_eq!(&rsp[..len], &[0x01, 0x04, 0x05, 0x00, 0x0a]);
    }

    #[test]
    fn find_by_type_value_matches_service_uuid() {
        let mut storage = [0u8; 2];
        let (table, _) = battery_table(&mut storage);
        let server: AttributeServer<'_, '_, CriticalSectionRawMutex, 16> = AttributeServer::new(&table);

        let mut rsp = [0u8; 64];
        let req = AttReq::FindByTypeValue {
            start_handle: 1,
            end_handle: 0xffff,
            att_type: 0x2800,
            att_value: &[0x0f, 0x18],
        };
        let len = unwrap!(server.process(ConnHandle::new(1), &req, ATT_MTU_DEFAULT, &mut rsp)).unwrap();
        assert_eq!(&rsp[..len], &[0x07, 0x01, 0x00, 0x04, 0x00]);
    }

    #[test]
    fn read_and_write_round_trip() {
        let mut storage = [0u8; 2];
        let (table, chara) = battery_table(&mut storage);
        let server: AttributeServer<'_, '_, CriticalSectionRawMutex, 16> = AttributeServer::new(&table);
        let conn = ConnHandle::new(1);

        let mut rsp = [0u8; 64];
        let write = AttReq::Write {
            handle: chara.handle,
            data: &[0x2a, 0x00],
        };
        let len = unwrap!(server.process(conn, &write, ATT_MTU_DEFAULT, &mut rsp)).unwrap();
        assert_eq!(&rsp[..len], &[0x13]);

        let read = AttReq::Read { handle: chara.handle };
        let len = unwrap!(server.process(conn, &read, ATT_MTU_DEFAULT, &mut rsp)).unwrap();
        assert_eq!(&rsp[..len], &[0x0b, 0x2a, 0x00]);
    }

    #[test]
    fn read_response_clipped_to_mtu() {
        let value = [0xabu8; 40];
        let mut table: AttributeTable<'_, CriticalSectionRawMutex, 16> = AttributeTable::new();
        let chara = {
            let mut svc = table.add_service(Service::new(0x180fu16));
            svc.add_characteristic_ro(0x2a19u16, &value).build()
        };
        let server: AttributeServer<'_, '_, CriticalSectionRawMutex, 16> = AttributeServer::new(&table);

        let mut rsp = [0u8; 64];
        let read = AttReq::Read { handle: chara.handle };
        let len = unwrap!(server.process(ConnHandle::new(1), &read, ATT_MTU_DEFAULT, &mut rsp)).unwrap();
        assert_eq!(len, ATT_MTU_DEFAULT as usize);
        assert_eq!(rsp[0], 0x0b);
    }

    #[test]
    fn cccd_state_is_per_connection() {
        let mut storage = [0u8; 2];
        let (table, chara) = battery_table(&mut storage);
        let server: AttributeServer<'_, '_, CriticalSectionRawMutex, 16> = AttributeServer::new(&table);
        let first = ConnHandle::new(1);
        let second = ConnHandle::new(2);

        let mut rsp = [0u8; 64];
        let subscribe = AttReq::Write {
            handle: chara.cccd_handle.unwrap(),
            data: &[0x01, 0x00],
        };
        let len = unwrap!(server.process(first, &subscribe, ATT_MTU_DEFAULT, &mut rsp)).unwrap();
        assert_eq!(&rsp[..len], &[0x13]);

        assert!(server.notifications_enabled(first, &chara));
        assert!(!server.notifications_enabled(second, &chara));

        server.disconnect(first);
        assert!(!server.notifications_enabled(first, &chara));
    }

    #[test]
    fn unsupported_requests_are_rejected() {
        let mut storage = [0u8; 2];
        let (table, _) = battery_table(&mut storage);
        let server: AttributeServer<'_, '_, CriticalSectionRawMutex, 16> = AttributeServer::new(&table);

        let mut rsp = [0u8; 64];
        let req = AttReq::ExecuteWrite { flags: 0x01 };
        let len = unwrap!(server.process(ConnHandle::new(1), &req, ATT_MTU_DEFAULT, &mut rsp)).unwrap();
        assert_eq!(&rsp[..len], &[0x01, 0x18, 0x00, 0x00, 0x06]);
    }
}
