//! HCI packet framing and parameter types.
//!
//! The controller is reached through a [`Transport`], which frames commands,
//! ACL data and events. The UART (H4) framing prefixes every packet with a
//! one byte packet kind.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embedded_io_async::{Read, ReadExactError, Write};

use crate::codec::{Decode, Encode, Error as CodecError, FixedSize};
#[cfg(test)]
use crate::cursor::WriteCursor;

pub mod cmd;
pub mod data;
pub mod event;

#[cfg(test)]
use cmd::Cmd;
use data::AclPacket;
use event::Event;

/// HCI connection handle.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnHandle(u16);

impl ConnHandle {
    pub const fn new(raw: u16) -> Self {
        Self(raw & 0x0fff)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }
}

/// HCI status code.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(u8);

impl Status {
    pub const SUCCESS: Status = Status(0);

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }

    pub fn to_result(self) -> Result<(), crate::Error> {
        if self == Self::SUCCESS {
            Ok(())
        } else {
            Err(crate::Error::Hci(self))
        }
    }
}

impl FixedSize for Status {
    const SIZE: usize = 1;
}

impl Decode<'_> for Status {
    fn decode(src: &[u8]) -> Result<Self, CodecError> {
        Ok(Status(u8::decode(src)?))
    }
}

impl Encode for Status {
    fn encode(&self, dest: &mut [u8]) -> Result<(), CodecError> {
        self.0.encode(dest)
    }
}

/// A bluetooth device address in little endian byte order.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    pub const fn new(raw: [u8; 6]) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> [u8; 6] {
        self.0
    }

    /// Parse the display form `AA:BB:CC:DD:EE:FF` (big endian text).
    pub fn from_str_colon(s: &str) -> Result<Self, crate::Error> {
        fn hex(b: u8) -> Result<u8, crate::Error> {
            match b {
                b'0'..=b'9' => Ok(b - b'0'),
                b'a'..=b'f' => Ok(b - b'a' + 10),
                b'A'..=b'F' => Ok(b - b'A' + 10),
                _ => Err(crate::Error::InvalidValue),
            }
        }
        let s = s.as_bytes();
        if s.len() != 17 {
            return Err(crate::Error::InvalidValue);
        }
        let mut raw = [0u8; 6];
        for i in 0..6 {
            let pos = i * 3;
            if i > 0 && s[pos - 1] != b':' {
                return Err(crate::Error::InvalidValue);
            }
            raw[5 - i] = (hex(s[pos])? << 4) | hex(s[pos + 1])?;
        }
        Ok(Self(raw))
    }
}

impl core::str::FromStr for BdAddr {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_colon(s)
    }
}

impl core::fmt::Display for BdAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, b) in self.0.iter().rev().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl FixedSize for BdAddr {
    const SIZE: usize = 6;
}

impl Decode<'_> for BdAddr {
    fn decode(src: &[u8]) -> Result<Self, CodecError> {
        if src.len() < 6 {
            return Err(CodecError::InsufficientSpace);
        }
        Ok(Self(src[0..6].try_into().map_err(|_| CodecError::InvalidValue)?))
    }
}

impl Encode for BdAddr {
    fn encode(&self, dest: &mut [u8]) -> Result<(), CodecError> {
        dest[..6].copy_from_slice(&self.0);
        Ok(())
    }
}

/// Device address kind.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrKind(u8);

impl AddrKind {
    pub const PUBLIC: AddrKind = AddrKind(0);
    pub const RANDOM: AddrKind = AddrKind(1);

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }
}

/// Role of the local device in a connection.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeConnRole {
    Central,
    Peripheral,
}

/// Reason codes accepted by the Disconnect command.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    AuthenticationFailure = 0x05,
    RemoteUserTerminatedConn = 0x13,
    RemoteDeviceTerminatedConnLowResources = 0x14,
    RemoteDeviceTerminatedConnPowerOff = 0x15,
    UnsupportedRemoteFeature = 0x1a,
    UnacceptableConnParameters = 0x3b,
}

/// A complete packet received from the controller.
pub enum ControllerToHostPacket<'d> {
    Event(Event<'d>),
    Acl(AclPacket<'d>),
}

/// Physical or virtual link to a controller.
///
/// Implementations frame and deframe complete HCI packets. All methods take
/// `&self`; implementations serialize access internally so the host can read
/// and write concurrently.
pub trait Transport {
    type Error: core::fmt::Debug;

    /// Read a complete packet into `rx`, returning a typed view of it.
    async fn read<'a>(&self, rx: &'a mut [u8]) -> Result<ControllerToHostPacket<'a>, Self::Error>;

    /// Write a command packet, parameters already encoded.
    async fn write_command(&self, opcode: u16, params: &[u8]) -> Result<(), Self::Error>;

    /// Write an ACL data packet.
    async fn write_acl(&self, packet: AclPacket<'_>) -> Result<(), Self::Error>;
}

impl<T: Transport> Transport for &T {
    type Error = T::Error;

    async fn read<'a>(&self, rx: &'a mut [u8]) -> Result<ControllerToHostPacket<'a>, Self::Error> {
        T::read(self, rx).await
    }

    async fn write_command(&self, opcode: u16, params: &[u8]) -> Result<(), Self::Error> {
        T::write_command(self, opcode, params).await
    }

    async fn write_acl(&self, packet: AclPacket<'_>) -> Result<(), Self::Error> {
        T::write_acl(self, packet).await
    }
}

/// Encode a command into `buf` as opcode + length + parameters.
#[cfg(test)]
pub(crate) fn encode_command<C: Cmd>(cmd: &C, buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut w = WriteCursor::new(buf);
    let (mut header, mut body) = w.split(3)?;
    let len = cmd.params(body.write_buf())?;
    body.commit(len)?;
    header.write(C::OPCODE)?;
    header.write(len as u8)?;
    Ok(3 + len)
}

const H4_COMMAND: u8 = 0x01;
const H4_ACL: u8 = 0x02;
const H4_EVENT: u8 = 0x04;

/// Errors from the serial transport.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug)]
pub enum SerialTransportError<E> {
    Read(E),
    Write(E),
    Eof,
    InvalidPacketKind(u8),
    Codec(CodecError),
}

impl<E> From<ReadExactError<E>> for SerialTransportError<E> {
    fn from(e: ReadExactError<E>) -> Self {
        match e {
            ReadExactError::UnexpectedEof => Self::Eof,
            ReadExactError::Other(e) => Self::Read(e),
        }
    }
}

/// H4 framing over a split serial port.
pub struct SerialTransport<M: RawMutex, R, W> {
    reader: Mutex<M, R>,
    writer: Mutex<M, W>,
}

impl<M: RawMutex, R: Read, W: Write> SerialTransport<M, R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    async fn write_packet(&self, kind: u8, header: &[u8], payload: &[u8]) -> Result<(), SerialTransportError<W::Error>> {
        let mut writer = self.writer.lock().await;
        writer.write_all(&[kind]).await.map_err(SerialTransportError::Write)?;
        writer.write_all(header).await.map_err(SerialTransportError::Write)?;
        if !payload.is_empty() {
            writer.write_all(payload).await.map_err(SerialTransportError::Write)?;
        }
        writer.flush().await.map_err(SerialTransportError::Write)
    }
}

impl<M: RawMutex, R: Read, W: Write<Error = R::Error>> Transport for SerialTransport<M, R, W>
where
    R::Error: core::fmt::Debug,
{
    type Error = SerialTransportError<R::Error>;

    async fn read<'a>(&self, rx: &'a mut [u8]) -> Result<ControllerToHostPacket<'a>, Self::Error> {
        let mut reader = self.reader.lock().await;
        let mut kind = [0u8];
        reader.read_exact(&mut kind).await?;
        match kind[0] {
            H4_EVENT => {
                let mut header = [0u8; 2];
                reader.read_exact(&mut header).await?;
                let len = header[1] as usize;
                if rx.len() < len {
                    return Err(SerialTransportError::Codec(CodecError::InsufficientSpace));
                }
                reader.read_exact(&mut rx[..len]).await?;
                let event = Event::decode(header[0], &rx[..len]).map_err(SerialTransportError::Codec)?;
                Ok(ControllerToHostPacket::Event(event))
            }
            H4_ACL => {
                let mut header = [0u8; 4];
                reader.read_exact(&mut header).await?;
                let len = u16::from_le_bytes([header[2], header[3]]) as usize;
                if rx.len() < len {
                    return Err(SerialTransportError::Codec(CodecError::InsufficientSpace));
                }
                reader.read_exact(&mut rx[..len]).await?;
                let acl = AclPacket::decode(&header, &rx[..len]).map_err(SerialTransportError::Codec)?;
                Ok(ControllerToHostPacket::Acl(acl))
            }
            other => Err(SerialTransportError::InvalidPacketKind(other)),
        }
    }

    async fn write_command(&self, opcode: u16, params: &[u8]) -> Result<(), Self::Error> {
        let header = [opcode.to_le_bytes()[0], opcode.to_le_bytes()[1], params.len() as u8];
        self.write_packet(H4_COMMAND, &header, params).await
    }

    async fn write_acl(&self, packet: AclPacket<'_>) -> Result<(), Self::Error> {
        let header = packet.header();
        self.write_packet(H4_ACL, &header, packet.data()).await
    }
}
