//! UUID types.

use core::fmt;
use core::str::FromStr;

use crate::codec::{Decode, Encode, Error, Type};

/// A 16-bit, 32-bit or 128-bit UUID.
///
/// Bytes are kept in the over-the-air (little endian) order.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Uuid {
    /// 16-bit UUID
    Uuid16([u8; 2]),
    /// 32-bit UUID
    Uuid32([u8; 4]),
    /// 128-bit UUID
    Uuid128([u8; 16]),
}

impl From<u128> for Uuid {
    fn from(data: u128) -> Self {
        Uuid::Uuid128(data.to_le_bytes())
    }
}

impl From<[u8; 16]> for Uuid {
    fn from(data: [u8; 16]) -> Self {
        Uuid::Uuid128(data)
    }
}

impl From<[u8; 4]> for Uuid {
    fn from(data: [u8; 4]) -> Self {
        Uuid::Uuid32(data)
    }
}

impl From<u32> for Uuid {
    fn from(data: u32) -> Self {
        Uuid::Uuid32(data.to_le_bytes())
    }
}

impl From<[u8; 2]> for Uuid {
    fn from(data: [u8; 2]) -> Self {
        Uuid::Uuid16(data)
    }
}

impl From<u16> for Uuid {
    fn from(data: u16) -> Self {
        Uuid::Uuid16(data.to_le_bytes())
    }
}

impl Uuid {
    /// Create a new 16-bit UUID.
    pub const fn new_short(val: u16) -> Self {
        Self::Uuid16(val.to_le_bytes())
    }

    /// Create a new 128-bit UUID.
    pub const fn new_long(val: [u8; 16]) -> Self {
        Self::Uuid128(val)
    }

    /// Copy the UUID bytes into a slice.
    pub fn bytes(&self, data: &mut [u8]) {
        match self {
            Uuid::Uuid16(uuid) => data.copy_from_slice(uuid),
            Uuid::Uuid32(uuid) => data.copy_from_slice(uuid),
            Uuid::Uuid128(uuid) => data.copy_from_slice(uuid),
        }
    }

    /// Get the UUID format type used in the Find Information response.
    pub fn get_type(&self) -> u8 {
        match self {
            Uuid::Uuid16(_) => 0x01,
            Uuid::Uuid32(_) => 0x02,
            Uuid::Uuid128(_) => 0x02,
        }
    }

    /// Get the 16-bit UUID value.
    ///
    /// Panics if this is not a 16-bit UUID.
    pub fn as_short(&self) -> u16 {
        match self {
            Uuid::Uuid16(data) => u16::from_le_bytes([data[0], data[1]]),
            _ => panic!("wrong type"),
        }
    }

    /// Get the raw little endian bytes.
    pub fn as_raw(&self) -> &[u8] {
        match self {
            Uuid::Uuid16(uuid) => uuid,
            Uuid::Uuid32(uuid) => uuid,
            Uuid::Uuid128(uuid) => uuid,
        }
    }
}

impl TryFrom<&[u8]> for Uuid {
    type Error = crate::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value.len() {
            2 => Ok(Uuid::Uuid16([value[0], value[1]])),
            4 => Ok(Uuid::Uuid32([value[0], value[1], value[2], value[3]])),
            16 => {
                let mut bytes = [0; 16];
                bytes.copy_from_slice(value);
                Ok(Uuid::Uuid128(bytes))
            }
            _ => Err(crate::Error::InvalidValue),
        }
    }
}

impl FromStr for Uuid {
    type Err = crate::Error;

    /// Parse the canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` form into
    /// a 128-bit UUID. The text is big endian, storage is little endian.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn hex(b: u8) -> Result<u8, crate::Error> {
            match b {
                b'0'..=b'9' => Ok(b - b'0'),
                b'a'..=b'f' => Ok(b - b'a' + 10),
                b'A'..=b'F' => Ok(b - b'A' + 10),
                _ => Err(crate::Error::InvalidValue),
            }
        }
        let s = s.as_bytes();
        if s.len() != 36 || s[8] != b'-' || s[13] != b'-' || s[18] != b'-' || s[23] != b'-' {
            return Err(crate::Error::InvalidValue);
        }
        let mut bytes = [0u8; 16];
        let mut idx = 0;
        let mut pos = 0;
        while idx < 16 {
            if s[pos] == b'-' {
                pos += 1;
                continue;
            }
            bytes[15 - idx] = (hex(s[pos])? << 4) | hex(s[pos + 1])?;
            idx += 1;
            pos += 2;
        }
        Ok(Uuid::Uuid128(bytes))
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Uuid16(data) => write!(f, "{:04x}", u16::from_le_bytes(*data)),
            Uuid::Uuid32(data) => write!(f, "{:08x}", u32::from_le_bytes(*data)),
            Uuid::Uuid128(data) => {
                for (i, byte) in data.iter().rev().enumerate() {
                    if i == 4 || i == 6 || i == 8 || i == 10 {
                        f.write_str("-")?;
                    }
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl Type for Uuid {
    fn size(&self) -> usize {
        self.as_raw().len()
    }
}

impl Decode<'_> for Uuid {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        match src.len() {
            2 => Ok(Uuid::Uuid16([src[0], src[1]])),
            16 => Ok(Uuid::Uuid128(src[0..16].try_into().map_err(|_| Error::InvalidValue)?)),
            _ => Err(Error::InvalidValue),
        }
    }
}

impl Encode for Uuid {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        self.bytes(dest);
        Ok(())
    }
}
