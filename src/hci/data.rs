//! ACL data packets.

use crate::codec::Error as CodecError;

use super::ConnHandle;

/// Packet boundary flag of an ACL packet, bits 12..14 of the handle field.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclPacketBoundary {
    /// Start of a non automatically flushable PDU (host to controller).
    FirstNonFlushable,
    /// Continuation fragment.
    Continuing,
    /// Start of an automatically flushable PDU (controller to host).
    FirstFlushable,
    Complete,
}

impl AclPacketBoundary {
    pub(crate) fn flags(&self) -> u16 {
        let bits = match self {
            Self::FirstNonFlushable => 0b00,
            Self::Continuing => 0b01,
            Self::FirstFlushable => 0b10,
            Self::Complete => 0b11,
        };
        bits << 12
    }

    pub(crate) fn from_flags(raw: u16) -> Self {
        match (raw >> 12) & 0b11 {
            0b00 => Self::FirstNonFlushable,
            0b01 => Self::Continuing,
            0b10 => Self::FirstFlushable,
            _ => Self::Complete,
        }
    }
}

/// A single ACL data packet, borrowed from the receive buffer.
pub struct AclPacket<'d> {
    handle: ConnHandle,
    boundary: AclPacketBoundary,
    data: &'d [u8],
}

impl<'d> AclPacket<'d> {
    pub fn new(handle: ConnHandle, boundary: AclPacketBoundary, data: &'d [u8]) -> Self {
        Self { handle, boundary, data }
    }

    /// Decode from the 4 byte wire header plus payload.
    pub fn decode(header: &[u8; 4], data: &'d [u8]) -> Result<Self, CodecError> {
        let raw = u16::from_le_bytes([header[0], header[1]]);
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        if len != data.len() {
            return Err(CodecError::InvalidValue);
        }
        Ok(Self {
            handle: ConnHandle::new(raw),
            boundary: AclPacketBoundary::from_flags(raw),
            data,
        })
    }

    /// The 4 byte wire header for this packet.
    pub fn header(&self) -> [u8; 4] {
        let raw = self.handle.raw() | self.boundary.flags();
        let len = self.data.len() as u16;
        let raw = raw.to_le_bytes();
        let len = len.to_le_bytes();
        [raw[0], raw[1], len[0], len[1]]
    }

    pub fn handle(&self) -> ConnHandle {
        self.handle
    }

    pub fn boundary_flag(&self) -> AclPacketBoundary {
        self.boundary
    }

    pub fn data(&self) -> &'d [u8] {
        self.data
    }
}
