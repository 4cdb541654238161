//! Attribute protocol PDUs.
//!
//! Opcode parity tells the direction: even opcodes originate at the client
//! (requests, commands and the indication confirmation), odd opcodes at the
//! server (responses, notifications and indications).

use core::fmt::Display;
use core::mem;

use crate::codec::{self, Decode};
use crate::cursor::{ReadCursor, WriteCursor};
use crate::types::uuid::Uuid;

/// ATT MTU before any exchange has happened.
pub const ATT_MTU_DEFAULT: u16 = 23;

pub(crate) const ATT_ERROR_RSP: u8 = 0x01;
pub(crate) const ATT_EXCHANGE_MTU_REQ: u8 = 0x02;
pub(crate) const ATT_EXCHANGE_MTU_RSP: u8 = 0x03;
pub(crate) const ATT_FIND_INFORMATION_REQ: u8 = 0x04;
pub(crate) const ATT_FIND_INFORMATION_RSP: u8 = 0x05;
pub(crate) const ATT_FIND_BY_TYPE_VALUE_REQ: u8 = 0x06;
pub(crate) const ATT_FIND_BY_TYPE_VALUE_RSP: u8 = 0x07;
pub(crate) const ATT_READ_BY_TYPE_REQ: u8 = 0x08;
pub(crate) const ATT_READ_BY_TYPE_RSP: u8 = 0x09;
pub(crate) const ATT_READ_REQ: u8 = 0x0a;
pub(crate) const ATT_READ_RSP: u8 = 0x0b;
pub(crate) const ATT_READ_BLOB_REQ: u8 = 0x0c;
pub(crate) const ATT_READ_BLOB_RSP: u8 = 0x0d;
pub(crate) const ATT_READ_MULTIPLE_REQ: u8 = 0x0e;
pub(crate) const ATT_READ_BY_GROUP_TYPE_REQ: u8 = 0x10;
pub(crate) const ATT_READ_BY_GROUP_TYPE_RSP: u8 = 0x11;
pub(crate) const ATT_WRITE_REQ: u8 = 0x12;
pub(crate) const ATT_WRITE_RSP: u8 = 0x13;
pub(crate) const ATT_PREPARE_WRITE_REQ: u8 = 0x16;
pub(crate) const ATT_EXECUTE_WRITE_REQ: u8 = 0x18;
pub(crate) const ATT_HANDLE_VALUE_NTF: u8 = 0x1b;
pub(crate) const ATT_HANDLE_VALUE_IND: u8 = 0x1d;
pub(crate) const ATT_HANDLE_VALUE_CFM: u8 = 0x1e;
pub(crate) const ATT_WRITE_CMD: u8 = 0x52;

/// Attribute Error Code
///
/// This type describes the error field of the `ATT_ERROR_RSP` PDU from the
/// Bluetooth Core Specification Vol 3, Part F.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct AttErrorCode {
    value: u8,
}

impl AttErrorCode {
    pub(crate) const fn new(value: u8) -> Self {
        Self { value }
    }

    pub const fn raw(&self) -> u8 {
        self.value
    }

    /// Attempted to use a handle that isn't valid on this server
    pub const INVALID_HANDLE: Self = Self { value: 0x01 };
    /// The attribute cannot be read
    pub const READ_NOT_PERMITTED: Self = Self { value: 0x02 };
    /// The attribute cannot be written
    pub const WRITE_NOT_PERMITTED: Self = Self { value: 0x03 };
    /// The attribute PDU was invalid
    pub const INVALID_PDU: Self = Self { value: 0x04 };
    /// The attribute requires authentication before it can be read or written
    pub const INSUFFICIENT_AUTHENTICATION: Self = Self { value: 0x05 };
    /// ATT Server does not support the request received from the client
    pub const REQUEST_NOT_SUPPORTED: Self = Self { value: 0x06 };
    /// Offset specified was past the end of the attribute
    pub const INVALID_OFFSET: Self = Self { value: 0x07 };
    /// The attribute requires authorisation before it can be read or written
    pub const INSUFFICIENT_AUTHORISATION: Self = Self { value: 0x08 };
    /// Too many prepare writes have been queued
    pub const PREPARE_QUEUE_FULL: Self = Self { value: 0x09 };
    /// No attribute found within the given attribute handle range
    pub const ATTRIBUTE_NOT_FOUND: Self = Self { value: 0x0a };
    /// The attribute cannot be read using the ATT_READ_BLOB_REQ PDU
    pub const ATTRIBUTE_NOT_LONG: Self = Self { value: 0x0b };
    /// The Encryption Key Size used for encrypting this link is too short
    pub const INSUFFICIENT_ENCRYPTION_KEY_SIZE: Self = Self { value: 0x0c };
    /// The attribute value length is invalid for the operation
    pub const INVALID_ATTRIBUTE_VALUE_LENGTH: Self = Self { value: 0x0d };
    /// The attribute request encountered an unlikely error and could not be completed
    pub const UNLIKELY_ERROR: Self = Self { value: 0x0e };
    /// The attribute requires encryption before it can be read or written
    pub const INSUFFICIENT_ENCRYPTION: Self = Self { value: 0x0f };
    /// The attribute type is not a supported grouping attribute
    pub const UNSUPPORTED_GROUP_TYPE: Self = Self { value: 0x10 };
    /// Insufficient Resources to complete the request
    pub const INSUFFICIENT_RESOURCES: Self = Self { value: 0x11 };
    /// The server requests the client to rediscover the database
    pub const DATABASE_OUT_OF_SYNC: Self = Self { value: 0x12 };
    /// The attribute parameter value was not allowed
    pub const VALUE_NOT_ALLOWED: Self = Self { value: 0x13 };
}

impl Display for AttErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Self::INVALID_HANDLE => f.write_str("invalid handle"),
            Self::READ_NOT_PERMITTED => f.write_str("read not permitted"),
            Self::WRITE_NOT_PERMITTED => f.write_str("write not permitted"),
            Self::INVALID_PDU => f.write_str("invalid pdu"),
            Self::INSUFFICIENT_AUTHENTICATION => f.write_str("insufficient authentication"),
            Self::REQUEST_NOT_SUPPORTED => f.write_str("request not supported"),
            Self::INVALID_OFFSET => f.write_str("invalid offset"),
            Self::INSUFFICIENT_AUTHORISATION => f.write_str("insufficient authorisation"),
            Self::PREPARE_QUEUE_FULL => f.write_str("prepare queue full"),
            Self::ATTRIBUTE_NOT_FOUND => f.write_str("attribute not found"),
            Self::ATTRIBUTE_NOT_LONG => f.write_str("attribute not long"),
            Self::INSUFFICIENT_ENCRYPTION_KEY_SIZE => f.write_str("insufficient encryption key size"),
            Self::INVALID_ATTRIBUTE_VALUE_LENGTH => f.write_str("invalid attribute value length"),
            Self::UNLIKELY_ERROR => f.write_str("unlikely error"),
            Self::INSUFFICIENT_ENCRYPTION => f.write_str("insufficient encryption"),
            Self::UNSUPPORTED_GROUP_TYPE => f.write_str("unsupported group type"),
            Self::INSUFFICIENT_RESOURCES => f.write_str("insufficient resources"),
            Self::DATABASE_OUT_OF_SYNC => f.write_str("database out of sync"),
            Self::VALUE_NOT_ALLOWED => f.write_str("value not allowed"),
            other => write!(f, "error code {:#04x}", other.value),
        }
    }
}

impl codec::Encode for AttErrorCode {
    fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        self.value.encode(dest)
    }
}

impl codec::Decode<'_> for AttErrorCode {
    fn decode(src: &[u8]) -> Result<Self, codec::Error> {
        Ok(Self { value: u8::decode(src)? })
    }
}

impl codec::Type for AttErrorCode {
    fn size(&self) -> usize {
        mem::size_of::<u8>()
    }
}

impl From<codec::Error> for AttErrorCode {
    fn from(_: codec::Error) -> Self {
        AttErrorCode::INVALID_PDU
    }
}

/// Client-originated PDUs (even opcodes).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug)]
pub enum AttReq<'d> {
    ExchangeMtu {
        mtu: u16,
    },
    ReadByGroupType {
        start: u16,
        end: u16,
        group_type: Uuid,
    },
    ReadByType {
        start: u16,
        end: u16,
        attribute_type: Uuid,
    },
    FindByTypeValue {
        start_handle: u16,
        end_handle: u16,
        att_type: u16,
        att_value: &'d [u8],
    },
    FindInformation {
        start_handle: u16,
        end_handle: u16,
    },
    Read {
        handle: u16,
    },
    ReadBlob {
        handle: u16,
        offset: u16,
    },
    ReadMultiple {
        handles: &'d [u8],
    },
    Write {
        handle: u16,
        data: &'d [u8],
    },
    WriteCmd {
        handle: u16,
        data: &'d [u8],
    },
    PrepareWrite {
        handle: u16,
        offset: u16,
        value: &'d [u8],
    },
    ExecuteWrite {
        flags: u8,
    },
    /// Confirmation of a received indication.
    ConfirmIndication,
}

/// Server-originated PDUs (odd opcodes).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug)]
pub enum AttRsp<'d> {
    ExchangeMtu {
        mtu: u16,
    },
    Error {
        request: u8,
        handle: u16,
        code: AttErrorCode,
    },
    ReadByGroupType {
        it: ReadByGroupTypeIter<'d>,
    },
    ReadByType {
        it: ReadByTypeIter<'d>,
    },
    FindByTypeValue {
        it: FindByTypeValueIter<'d>,
    },
    FindInformation {
        it: FindInformationIter<'d>,
    },
    Read {
        data: &'d [u8],
    },
    ReadBlob {
        data: &'d [u8],
    },
    Write,
    Notify {
        handle: u16,
        data: &'d [u8],
    },
    Indicate {
        handle: u16,
        data: &'d [u8],
    },
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug)]
pub enum Att<'d> {
    Req(AttReq<'d>),
    Rsp(AttRsp<'d>),
}

impl<'d> Att<'d> {
    pub fn decode(data: &'d [u8]) -> Result<Att<'d>, codec::Error> {
        let mut r = ReadCursor::new(data);
        let opcode: u8 = r.read()?;
        if opcode % 2 == 0 {
            Ok(Att::Req(AttReq::decode_with_opcode(opcode, r)?))
        } else {
            Ok(Att::Rsp(AttRsp::decode_with_opcode(opcode, r)?))
        }
    }
}

/// Entries of a Find By Type Value response: (found, group end) handle pairs.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Debug)]
pub struct FindByTypeValueIter<'d> {
    cursor: ReadCursor<'d>,
}

impl FindByTypeValueIter<'_> {
    pub fn next(&mut self) -> Option<Result<(u16, u16), crate::Error>> {
        if self.cursor.available() >= 4 {
            let res = (|| {
                let handle: u16 = self.cursor.read()?;
                let end: u16 = self.cursor.read()?;
                Ok((handle, end))
            })();
            Some(res)
        } else {
            None
        }
    }
}

/// Entries of a Read By Type response: (handle, value) pairs.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Debug)]
pub struct ReadByTypeIter<'d> {
    item_len: usize,
    cursor: ReadCursor<'d>,
}

impl<'d> ReadByTypeIter<'d> {
    pub fn next(&mut self) -> Option<Result<(u16, &'d [u8]), crate::Error>> {
        if self.item_len > 2 && self.cursor.available() >= self.item_len {
            let res = (|| {
                let handle: u16 = self.cursor.read()?;
                let item = self.cursor.slice(self.item_len - 2)?;
                Ok((handle, item))
            })();
            Some(res)
        } else {
            None
        }
    }
}

/// Entries of a Read By Group Type response: (start, end, value) triples.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Debug)]
pub struct ReadByGroupTypeIter<'d> {
    item_len: usize,
    cursor: ReadCursor<'d>,
}

impl<'d> ReadByGroupTypeIter<'d> {
    pub fn next(&mut self) -> Option<Result<(u16, u16, &'d [u8]), crate::Error>> {
        if self.item_len > 4 && self.cursor.available() >= self.item_len {
            let res = (|| {
                let start: u16 = self.cursor.read()?;
                let end: u16 = self.cursor.read()?;
                let item = self.cursor.slice(self.item_len - 4)?;
                Ok((start, end, item))
            })();
            Some(res)
        } else {
            None
        }
    }
}

/// Entries of a Find Information response: (handle, uuid) pairs.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Debug)]
pub struct FindInformationIter<'d> {
    format: u8,
    cursor: ReadCursor<'d>,
}

impl FindInformationIter<'_> {
    pub fn next(&mut self) -> Option<Result<(u16, Uuid), crate::Error>> {
        let uuid_len = match self.format {
            0x01 => 2,
            0x02 => 16,
            _ => return None,
        };
        if self.cursor.available() >= 2 + uuid_len {
            let res = (|| {
                let handle: u16 = self.cursor.read()?;
                let uuid = self.cursor.slice(uuid_len)?;
                let uuid = Uuid::try_from(uuid).map_err(|_| codec::Error::InvalidValue)?;
                Ok((handle, uuid))
            })();
            Some(res)
        } else {
            None
        }
    }
}

impl codec::Type for AttRsp<'_> {
    fn size(&self) -> usize {
        AttRsp::size(self)
    }
}

impl codec::Encode for AttRsp<'_> {
    fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        AttRsp::encode(self, dest)
    }
}

impl<'d> codec::Decode<'d> for AttRsp<'d> {
    fn decode(src: &'d [u8]) -> Result<AttRsp<'d>, codec::Error> {
        AttRsp::decode(src)
    }
}

impl<'d> AttRsp<'d> {
    pub fn size(&self) -> usize {
        1 + match self {
            Self::ExchangeMtu { .. } => 2,
            Self::Error { .. } => 4,
            Self::ReadByGroupType { it } => 1 + it.cursor.clone().remaining().len(),
            Self::ReadByType { it } => 1 + it.cursor.clone().remaining().len(),
            Self::FindByTypeValue { it } => it.cursor.clone().remaining().len(),
            Self::FindInformation { it } => 1 + it.cursor.clone().remaining().len(),
            Self::Read { data } => data.len(),
            Self::ReadBlob { data } => data.len(),
            Self::Write => 0,
            Self::Notify { data, .. } => 2 + data.len(),
            Self::Indicate { data, .. } => 2 + data.len(),
        }
    }

    pub fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        let mut w = WriteCursor::new(dest);
        match self {
            Self::ExchangeMtu { mtu } => {
                w.write(ATT_EXCHANGE_MTU_RSP)?;
                w.write(*mtu)?;
            }
            Self::Error { request, handle, code } => {
                w.write(ATT_ERROR_RSP)?;
                w.write(*request)?;
                w.write(*handle)?;
                w.write(*code)?;
            }
            Self::ReadByGroupType { it } => {
                w.write(ATT_READ_BY_GROUP_TYPE_RSP)?;
                w.write(it.item_len as u8)?;
                let mut it = it.clone();
                while let Some(Ok((start, end, item))) = it.next() {
                    w.write(start)?;
                    w.write(end)?;
                    w.append(item)?;
                }
            }
            Self::ReadByType { it } => {
                w.write(ATT_READ_BY_TYPE_RSP)?;
                w.write(it.item_len as u8)?;
                let mut it = it.clone();
                while let Some(Ok((handle, item))) = it.next() {
                    w.write(handle)?;
                    w.append(item)?;
                }
            }
            Self::FindByTypeValue { it } => {
                w.write(ATT_FIND_BY_TYPE_VALUE_RSP)?;
                let mut it = it.clone();
                while let Some(Ok((start, end))) = it.next() {
                    w.write(start)?;
                    w.write(end)?;
                }
            }
            Self::FindInformation { it } => {
                w.write(ATT_FIND_INFORMATION_RSP)?;
                w.write(it.format)?;
                let mut it = it.clone();
                while let Some(Ok((handle, uuid))) = it.next() {
                    w.write(handle)?;
                    w.write_ref(&uuid)?;
                }
            }
            Self::Read { data } => {
                w.write(ATT_READ_RSP)?;
                w.append(data)?;
            }
            Self::ReadBlob { data } => {
                w.write(ATT_READ_BLOB_RSP)?;
                w.append(data)?;
            }
            Self::Write => {
                w.write(ATT_WRITE_RSP)?;
            }
            Self::Notify { handle, data } => {
                w.write(ATT_HANDLE_VALUE_NTF)?;
                w.write(*handle)?;
                w.append(data)?;
            }
            Self::Indicate { handle, data } => {
                w.write(ATT_HANDLE_VALUE_IND)?;
                w.write(*handle)?;
                w.append(data)?;
            }
        }
        Ok(())
    }

    pub fn decode(data: &'d [u8]) -> Result<AttRsp<'d>, codec::Error> {
        let mut r = ReadCursor::new(data);
        let opcode: u8 = r.read()?;
        AttRsp::decode_with_opcode(opcode, r)
    }

    pub fn decode_with_opcode(opcode: u8, mut r: ReadCursor<'d>) -> Result<AttRsp<'d>, codec::Error> {
        match opcode {
            ATT_EXCHANGE_MTU_RSP => {
                let mtu: u16 = r.read()?;
                Ok(Self::ExchangeMtu { mtu })
            }
            ATT_ERROR_RSP => {
                let request = r.read()?;
                let handle = r.read()?;
                let code = r.read()?;
                Ok(Self::Error { request, handle, code })
            }
            ATT_READ_BY_GROUP_TYPE_RSP => {
                let item_len: u8 = r.read()?;
                Ok(Self::ReadByGroupType {
                    it: ReadByGroupTypeIter {
                        item_len: item_len as usize,
                        cursor: r,
                    },
                })
            }
            ATT_READ_BY_TYPE_RSP => {
                let item_len: u8 = r.read()?;
                Ok(Self::ReadByType {
                    it: ReadByTypeIter {
                        item_len: item_len as usize,
                        cursor: r,
                    },
                })
            }
            ATT_FIND_BY_TYPE_VALUE_RSP => Ok(Self::FindByTypeValue {
                it: FindByTypeValueIter { cursor: r },
            }),
            ATT_FIND_INFORMATION_RSP => {
                let format: u8 = r.read()?;
                Ok(Self::FindInformation {
                    it: FindInformationIter { format, cursor: r },
                })
            }
            ATT_READ_RSP => Ok(Self::Read { data: r.remaining() }),
            ATT_READ_BLOB_RSP => Ok(Self::ReadBlob { data: r.remaining() }),
            ATT_WRITE_RSP => Ok(Self::Write),
            ATT_HANDLE_VALUE_NTF => {
                let handle: u16 = r.read()?;
                Ok(Self::Notify {
                    handle,
                    data: r.remaining(),
                })
            }
            ATT_HANDLE_VALUE_IND => {
                let handle: u16 = r.read()?;
                Ok(Self::Indicate {
                    handle,
                    data: r.remaining(),
                })
            }
            _ => Err(codec::Error::InvalidValue),
        }
    }
}

impl codec::Type for AttReq<'_> {
    fn size(&self) -> usize {
        AttReq::size(self)
    }
}

impl codec::Encode for AttReq<'_> {
    fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        AttReq::encode(self, dest)
    }
}

impl<'d> codec::Decode<'d> for AttReq<'d> {
    fn decode(data: &'d [u8]) -> Result<AttReq<'d>, codec::Error> {
        AttReq::decode(data)
    }
}

impl<'d> AttReq<'d> {
    /// The opcode this PDU goes out with.
    pub fn opcode(&self) -> u8 {
        match self {
            Self::ExchangeMtu { .. } => ATT_EXCHANGE_MTU_REQ,
            Self::ReadByGroupType { .. } => ATT_READ_BY_GROUP_TYPE_REQ,
            Self::ReadByType { .. } => ATT_READ_BY_TYPE_REQ,
            Self::FindByTypeValue { .. } => ATT_FIND_BY_TYPE_VALUE_REQ,
            Self::FindInformation { .. } => ATT_FIND_INFORMATION_REQ,
            Self::Read { .. } => ATT_READ_REQ,
            Self::ReadBlob { .. } => ATT_READ_BLOB_REQ,
            Self::ReadMultiple { .. } => ATT_READ_MULTIPLE_REQ,
            Self::Write { .. } => ATT_WRITE_REQ,
            Self::WriteCmd { .. } => ATT_WRITE_CMD,
            Self::PrepareWrite { .. } => ATT_PREPARE_WRITE_REQ,
            Self::ExecuteWrite { .. } => ATT_EXECUTE_WRITE_REQ,
            Self::ConfirmIndication => ATT_HANDLE_VALUE_CFM,
        }
    }

    /// Whether this PDU starts a transaction the server answers.
    pub fn expects_response(&self) -> bool {
        !matches!(self, Self::WriteCmd { .. } | Self::ConfirmIndication)
    }

    pub fn size(&self) -> usize {
        1 + match self {
            Self::ExchangeMtu { .. } => 2,
            Self::ReadByGroupType { group_type, .. } => 4 + group_type.as_raw().len(),
            Self::ReadByType { attribute_type, .. } => 4 + attribute_type.as_raw().len(),
            Self::FindByTypeValue { att_value, .. } => 6 + att_value.len(),
            Self::FindInformation { .. } => 4,
            Self::Read { .. } => 2,
            Self::ReadBlob { .. } => 4,
            Self::ReadMultiple { handles } => handles.len(),
            Self::Write { data, .. } => 2 + data.len(),
            Self::WriteCmd { data, .. } => 2 + data.len(),
            Self::PrepareWrite { value, .. } => 4 + value.len(),
            Self::ExecuteWrite { .. } => 1,
            Self::ConfirmIndication => 0,
        }
    }

    pub fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        let mut w = WriteCursor::new(dest);
        w.write(self.opcode())?;
        match self {
            Self::ExchangeMtu { mtu } => {
                w.write(*mtu)?;
            }
            Self::ReadByGroupType { start, end, group_type } => {
                w.write(*start)?;
                w.write(*end)?;
                w.write_ref(group_type)?;
            }
            Self::ReadByType {
                start,
                end,
                attribute_type,
            } => {
                w.write(*start)?;
                w.write(*end)?;
                w.write_ref(attribute_type)?;
            }
            Self::FindByTypeValue {
                start_handle,
                end_handle,
                att_type,
                att_value,
            } => {
                w.write(*start_handle)?;
                w.write(*end_handle)?;
                w.write(*att_type)?;
                w.append(att_value)?;
            }
            Self::FindInformation {
                start_handle,
                end_handle,
            } => {
                w.write(*start_handle)?;
                w.write(*end_handle)?;
            }
            Self::Read { handle } => {
                w.write(*handle)?;
            }
            Self::ReadBlob { handle, offset } => {
                w.write(*handle)?;
                w.write(*offset)?;
            }
            Self::ReadMultiple { handles } => {
                w.append(handles)?;
            }
            Self::Write { handle, data } | Self::WriteCmd { handle, data } => {
                w.write(*handle)?;
                w.append(data)?;
            }
            Self::PrepareWrite { handle, offset, value } => {
                w.write(*handle)?;
                w.write(*offset)?;
                w.append(value)?;
            }
            Self::ExecuteWrite { flags } => {
                w.write(*flags)?;
            }
            Self::ConfirmIndication => {}
        }
        Ok(())
    }

    pub fn decode(data: &'d [u8]) -> Result<AttReq<'d>, codec::Error> {
        let mut r = ReadCursor::new(data);
        let opcode: u8 = r.read()?;
        AttReq::decode_with_opcode(opcode, r)
    }

    pub fn decode_with_opcode(opcode: u8, mut r: ReadCursor<'d>) -> Result<AttReq<'d>, codec::Error> {
        match opcode {
            ATT_EXCHANGE_MTU_REQ => {
                let mtu: u16 = r.read()?;
                Ok(Self::ExchangeMtu { mtu })
            }
            ATT_READ_BY_GROUP_TYPE_REQ => {
                let start: u16 = r.read()?;
                let end: u16 = r.read()?;
                let group_type = Uuid::decode(r.remaining())?;
                Ok(Self::ReadByGroupType { start, end, group_type })
            }
            ATT_READ_BY_TYPE_REQ => {
                let start: u16 = r.read()?;
                let end: u16 = r.read()?;
                let attribute_type = Uuid::decode(r.remaining())?;
                Ok(Self::ReadByType {
                    start,
                    end,
                    attribute_type,
                })
            }
            ATT_FIND_BY_TYPE_VALUE_REQ => {
                let start_handle: u16 = r.read()?;
                let end_handle: u16 = r.read()?;
                let att_type: u16 = r.read()?;
                Ok(Self::FindByTypeValue {
                    start_handle,
                    end_handle,
                    att_type,
                    att_value: r.remaining(),
                })
            }
            ATT_FIND_INFORMATION_REQ => {
                let start_handle: u16 = r.read()?;
                let end_handle: u16 = r.read()?;
                Ok(Self::FindInformation {
                    start_handle,
                    end_handle,
                })
            }
            ATT_READ_REQ => {
                let handle: u16 = r.read()?;
                Ok(Self::Read { handle })
            }
            ATT_READ_BLOB_REQ => {
                let handle: u16 = r.read()?;
                let offset: u16 = r.read()?;
                Ok(Self::ReadBlob { handle, offset })
            }
            ATT_READ_MULTIPLE_REQ => Ok(Self::ReadMultiple { handles: r.remaining() }),
            ATT_WRITE_REQ => {
                let handle: u16 = r.read()?;
                Ok(Self::Write {
                    handle,
                    data: r.remaining(),
                })
            }
            ATT_WRITE_CMD => {
                let handle: u16 = r.read()?;
                Ok(Self::WriteCmd {
                    handle,
                    data: r.remaining(),
                })
            }
            ATT_PREPARE_WRITE_REQ => {
                let handle: u16 = r.read()?;
                let offset: u16 = r.read()?;
                Ok(Self::PrepareWrite {
                    handle,
                    offset,
                    value: r.remaining(),
                })
            }
            ATT_EXECUTE_WRITE_REQ => {
                let flags: u8 = r.read()?;
                Ok(Self::ExecuteWrite { flags })
            }
            ATT_HANDLE_VALUE_CFM => Ok(Self::ConfirmIndication),
            code => {
                warn!("[att] unknown opcode {:02x}", code);
                Err(codec::Error::InvalidValue)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Type;

    fn round_trip_req(req: AttReq<'_>) -> heapless::Vec<u8, 64> {
        let mut buf = [0u8; 64];
        req.encode(&mut buf).unwrap();
        heapless::Vec::from_slice(&buf[..req.size()]).unwrap()
    }

    #[test]
    fn exchange_mtu_req() {
        let encoded = round_trip_req(AttReq::ExchangeMtu { mtu: 185 });
        assert_eq!(&encoded[..], &[0x02, 0xb9, 0x00]);
        let Att::Req(AttReq::ExchangeMtu { mtu }) = Att::decode(&encoded).unwrap() else {
            panic!("wrong pdu");
        };
        assert_eq!(mtu, 185);
    }

    #[test]
    fn write_req_round_trip() {
        let encoded = round_trip_req(AttReq::Write {
            handle: 0x0005,
            data: &[1, 2, 3],
        });
        assert_eq!(&encoded[..], &[0x12, 0x05, 0x00, 1, 2, 3]);
        let Att::Req(AttReq::Write { handle, data }) = Att::decode(&encoded).unwrap() else {
            panic!("wrong pdu");
        };
        assert_eq!(handle, 0x0005);
        assert_eq!(data, &[1, 2, 3]);
    }

    #[test]
    fn confirmation_has_no_payload() {
        let encoded = round_trip_req(AttReq::ConfirmIndication);
        assert_eq!(&encoded[..], &[0x1e]);
        assert!(matches!(
            Att::decode(&encoded).unwrap(),
            Att::Req(AttReq::ConfirmIndication)
        ));
        assert!(!AttReq::ConfirmIndication.expects_response());
    }

    #[test]
    fn error_rsp_round_trip() {
        let rsp = AttRsp::Error {
            request: ATT_READ_REQ,
            handle: 0x0042,
            code: AttErrorCode::READ_NOT_PERMITTED,
        };
        let mut buf = [0u8; 8];
        rsp.encode(&mut buf).unwrap();
        assert_eq!(&buf[..rsp.size()], &[0x01, 0x0a, 0x42, 0x00, 0x02]);
        let Att::Rsp(AttRsp::Error { request, handle, code }) = Att::decode(&buf[..rsp.size()]).unwrap() else {
            panic!("wrong pdu");
        };
        assert_eq!(request, ATT_READ_REQ);
        assert_eq!(handle, 0x0042);
        assert_eq!(code, AttErrorCode::READ_NOT_PERMITTED);
    }

    #[test]
    fn read_by_group_type_rsp_iterates() {
        // Two 16-bit uuid services
        let data = [0x11, 0x06, 0x01, 0x00, 0x05, 0x00, 0x00, 0x18, 0x06, 0x00, 0x09, 0x00, 0x01, 0x18];
        let Att::Rsp(AttRsp::ReadByGroupType { mut it }) = Att::decode(&data).unwrap() else {
            panic!("wrong pdu");
        };
        let (start, end, value) = it.next().unwrap().unwrap();
        assert_eq!((start, end), (1, 5));
        assert_eq!(value, &[0x00, 0x18]);
        let (start, end, value) = it.next().unwrap().unwrap();
        assert_eq!((start, end), (6, 9));
        assert_eq!(value, &[0x01, 0x18]);
        assert!(it.next().is_none());
    }

    #[test]
    fn find_information_rsp_iterates() {
        let data = [0x05, 0x01, 0x0a, 0x00, 0x02, 0x29];
        let Att::Rsp(AttRsp::FindInformation { mut it }) = Att::decode(&data).unwrap() else {
            panic!("wrong pdu");
        };
        let (handle, uuid) = it.next().unwrap().unwrap();
        assert_eq!(handle, 0x000a);
        assert_eq!(uuid, Uuid::new_short(0x2902));
        assert!(it.next().is_none());
    }

    #[test]
    fn notification_round_trip() {
        let rsp = AttRsp::Notify {
            handle: 0x0010,
            data: &[0xaa],
        };
        let mut buf = [0u8; 8];
        rsp.encode(&mut buf).unwrap();
        assert_eq!(&buf[..rsp.size()], &[0x1b, 0x10, 0x00, 0xaa]);
        let Att::Rsp(AttRsp::Notify { handle, data }) = Att::decode(&buf[..rsp.size()]).unwrap() else {
            panic!("wrong pdu");
        };
        assert_eq!(handle, 0x0010);
        assert_eq!(data, &[0xaa]);
    }

    #[test]
    fn malformed_pdu_rejected() {
        assert!(Att::decode(&[]).is_err());
        assert!(Att::decode(&[0x00]).is_err());
        assert!(Att::decode(&[0xff]).is_err());
    }
}
