//! Advertising data (AD) structures.
//!
//! The payload of each structure is treated as opaque bytes; only the
//! length/type framing is generated here.

use crate::codec::Error as CodecError;
use crate::cursor::WriteCursor;
use crate::types::uuid::Uuid;

pub const AD_FLAG_LE_LIMITED_DISCOVERABLE: u8 = 0b00000001;
pub const LE_GENERAL_DISCOVERABLE: u8 = 0b00000010;
pub const BR_EDR_NOT_SUPPORTED: u8 = 0b00000100;

/// One advertising data structure.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone)]
pub enum AdStructure<'d> {
    /// Device flags and baseband capabilities.
    ///
    /// Must not be used in scan response data.
    Flags(u8),

    /// Incomplete list of 16-bit service UUIDs.
    ServiceUuids16(&'d [Uuid]),

    /// Incomplete list of 128-bit service UUIDs.
    ServiceUuids128(&'d [Uuid]),

    /// Service data with a 16-bit service UUID.
    ServiceData16 {
        uuid: u16,
        data: &'d [u8],
    },

    /// The full (unabbreviated) device name.
    CompleteLocalName(&'d [u8]),

    /// The shortened device name.
    ShortenedLocalName(&'d [u8]),

    /// Manufacturer specific data.
    ManufacturerSpecificData {
        company_identifier: u16,
        payload: &'d [u8],
    },

    /// Any other AD structure, stored as raw bytes after the type.
    Unknown {
        ty: u8,
        data: &'d [u8],
    },
}

impl AdStructure<'_> {
    /// Encode a slice of AD structures into `dest`, returning the length used.
    pub fn encode_slice(structures: &[AdStructure<'_>], dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        for s in structures {
            s.encode(&mut w)?;
        }
        Ok(w.len())
    }

    /// Encode this AD structure, including the length/type framing.
    pub fn encode(&self, w: &mut WriteCursor<'_>) -> Result<(), CodecError> {
        match self {
            AdStructure::Flags(flags) => {
                w.append(&[0x02, 0x01, *flags])?;
            }
            AdStructure::ServiceUuids16(uuids) => {
                w.append(&[(uuids.len() * 2 + 1) as u8, 0x02])?;
                for uuid in uuids.iter() {
                    w.append(uuid.as_raw())?;
                }
            }
            AdStructure::ServiceUuids128(uuids) => {
                w.append(&[(uuids.len() * 16 + 1) as u8, 0x06])?;
                for uuid in uuids.iter() {
                    w.append(uuid.as_raw())?;
                }
            }
            AdStructure::ServiceData16 { uuid, data } => {
                w.append(&[(data.len() + 3) as u8, 0x16])?;
                w.append(&uuid.to_le_bytes())?;
                w.append(data)?;
            }
            AdStructure::CompleteLocalName(name) => {
                w.append(&[(name.len() + 1) as u8, 0x09])?;
                w.append(name)?;
            }
            AdStructure::ShortenedLocalName(name) => {
                w.append(&[(name.len() + 1) as u8, 0x08])?;
                w.append(name)?;
            }
            AdStructure::ManufacturerSpecificData {
                company_identifier,
                payload,
            } => {
                w.append(&[(payload.len() + 3) as u8, 0xff])?;
                w.append(&company_identifier.to_le_bytes())?;
                w.append(payload)?;
            }
            AdStructure::Unknown { ty, data } => {
                w.append(&[(data.len() + 1) as u8, *ty])?;
                w.append(data)?;
            }
        }
        Ok(())
    }
}
