//! Typed HCI commands.

use crate::codec::{Decode, Error as CodecError};
use crate::cursor::{ReadCursor, WriteCursor};

use super::{AddrKind, BdAddr, ConnHandle, DisconnectReason, Status};

/// Combine group and command fields into an opcode.
pub const fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) | ocf
}

pub(crate) const OGF_LINK_CONTROL: u8 = 0x01;
pub(crate) const OGF_CONTROLLER: u8 = 0x03;
pub(crate) const OGF_INFORMATIONAL: u8 = 0x04;
pub(crate) const OGF_STATUS: u8 = 0x05;
pub(crate) const OGF_LE: u8 = 0x08;

/// An HCI command with typed return parameters.
///
/// Commands answered with Command Status instead of Command Complete set
/// `STATUS_EVENT` and decode no return parameters beyond the status itself.
pub trait Cmd {
    const OPCODE: u16;
    const STATUS_EVENT: bool = false;

    type Return;

    /// Encode the parameter block, returning its length.
    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError>;

    /// Decode the Command Complete return parameters.
    fn return_params(src: &[u8]) -> Result<Self::Return, CodecError>;
}

fn no_params(_dest: &mut [u8]) -> Result<usize, CodecError> {
    Ok(0)
}

fn status_only(src: &[u8]) -> Result<Status, CodecError> {
    let mut r = ReadCursor::new(src);
    r.read()
}

/// Reset the controller (Controller & Baseband).
pub struct Reset;

impl Cmd for Reset {
    const OPCODE: u16 = opcode(OGF_CONTROLLER, 0x0003);
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        no_params(dest)
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Set the event mask (Controller & Baseband).
pub struct SetEventMask {
    pub mask: u64,
}

impl Cmd for SetEventMask {
    const OPCODE: u16 = opcode(OGF_CONTROLLER, 0x0001);
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.append(&self.mask.to_le_bytes())?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Read the public device address (Informational).
pub struct ReadBdAddr;

impl Cmd for ReadBdAddr {
    const OPCODE: u16 = opcode(OGF_INFORMATIONAL, 0x0009);
    type Return = (Status, BdAddr);

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        no_params(dest)
    }

    fn return_params(src: &[u8]) -> Result<Self::Return, CodecError> {
        let mut r = ReadCursor::new(src);
        let status: Status = r.read()?;
        let addr: BdAddr = r.read()?;
        Ok((status, addr))
    }
}

/// Read the RSSI of a connection (Status parameters).
pub struct ReadRssi {
    pub handle: ConnHandle,
}

impl Cmd for ReadRssi {
    const OPCODE: u16 = opcode(OGF_STATUS, 0x0005);
    type Return = (Status, ConnHandle, i8);

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.write(self.handle.raw())?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Self::Return, CodecError> {
        let mut r = ReadCursor::new(src);
        let status: Status = r.read()?;
        let handle: u16 = r.read()?;
        let rssi: u8 = r.read()?;
        Ok((status, ConnHandle::new(handle), rssi as i8))
    }
}

/// Terminate a connection (Link Control). Completes via Command Status,
/// the link goes away with a later Disconnection Complete event.
pub struct Disconnect {
    pub handle: ConnHandle,
    pub reason: DisconnectReason,
}

impl Cmd for Disconnect {
    const OPCODE: u16 = opcode(OGF_LINK_CONTROL, 0x0006);
    const STATUS_EVENT: bool = true;
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.write(self.handle.raw())?;
        w.write(self.reason as u8)?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Set the LE event mask.
pub struct LeSetEventMask {
    pub mask: u64,
}

impl Cmd for LeSetEventMask {
    const OPCODE: u16 = opcode(OGF_LE, 0x0001);
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.append(&self.mask.to_le_bytes())?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Read the controller's ACL buffer geometry.
pub struct LeReadBufferSize;

/// Return parameters of [`LeReadBufferSize`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct LeBufferSize {
    pub status: Status,
    /// Largest ACL payload the controller accepts in one packet.
    pub le_acl_data_packet_length: u16,
    /// Number of ACL packets the controller can hold.
    pub total_num_le_acl_data_packets: u8,
}

impl Cmd for LeReadBufferSize {
    const OPCODE: u16 = opcode(OGF_LE, 0x0002);
    type Return = LeBufferSize;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        no_params(dest)
    }

    fn return_params(src: &[u8]) -> Result<Self::Return, CodecError> {
        let mut r = ReadCursor::new(src);
        Ok(LeBufferSize {
            status: r.read()?,
            le_acl_data_packet_length: r.read()?,
            total_num_le_acl_data_packets: r.read()?,
        })
    }
}

/// Set the random device address.
pub struct LeSetRandomAddr {
    pub addr: BdAddr,
}

impl Cmd for LeSetRandomAddr {
    const OPCODE: u16 = opcode(OGF_LE, 0x0005);
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.write(self.addr)?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Legacy advertising parameters. Intervals in units of 0.625 ms.
pub struct LeSetAdvParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub adv_kind: u8,
    pub own_addr_kind: AddrKind,
    pub peer_addr_kind: AddrKind,
    pub peer_addr: BdAddr,
    pub channel_map: u8,
    pub filter_policy: u8,
}

impl Cmd for LeSetAdvParams {
    const OPCODE: u16 = opcode(OGF_LE, 0x0006);
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.write(self.interval_min)?;
        w.write(self.interval_max)?;
        w.write(self.adv_kind)?;
        w.write(self.own_addr_kind.raw())?;
        w.write(self.peer_addr_kind.raw())?;
        w.write(self.peer_addr)?;
        w.write(self.channel_map)?;
        w.write(self.filter_policy)?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Legacy advertising data, always a 31 byte block on the wire.
pub struct LeSetAdvData {
    pub len: u8,
    pub data: [u8; 31],
}

impl Cmd for LeSetAdvData {
    const OPCODE: u16 = opcode(OGF_LE, 0x0008);
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.write(self.len)?;
        w.append(&self.data)?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Legacy scan response data, always a 31 byte block on the wire.
pub struct LeSetScanResponseData {
    pub len: u8,
    pub data: [u8; 31],
}

impl Cmd for LeSetScanResponseData {
    const OPCODE: u16 = opcode(OGF_LE, 0x0009);
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.write(self.len)?;
        w.append(&self.data)?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Enable or disable legacy advertising.
pub struct LeSetAdvEnable {
    pub enable: bool,
}

impl Cmd for LeSetAdvEnable {
    const OPCODE: u16 = opcode(OGF_LE, 0x000a);
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.write(self.enable as u8)?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Legacy scan parameters. Interval and window in units of 0.625 ms.
pub struct LeSetScanParams {
    pub active: bool,
    pub interval: u16,
    pub window: u16,
    pub own_addr_kind: AddrKind,
    pub filter_policy: u8,
}

impl Cmd for LeSetScanParams {
    const OPCODE: u16 = opcode(OGF_LE, 0x000b);
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.write(self.active as u8)?;
        w.write(self.interval)?;
        w.write(self.window)?;
        w.write(self.own_addr_kind.raw())?;
        w.write(self.filter_policy)?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Enable or disable legacy scanning.
pub struct LeSetScanEnable {
    pub enable: bool,
    pub filter_duplicates: bool,
}

impl Cmd for LeSetScanEnable {
    const OPCODE: u16 = opcode(OGF_LE, 0x000c);
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.write(self.enable as u8)?;
        w.write(self.filter_duplicates as u8)?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Dial a peer. Completes via Command Status, the link shows up with a
/// later LE Connection Complete event. Intervals in protocol units.
pub struct LeCreateConn {
    pub scan_interval: u16,
    pub scan_window: u16,
    pub use_filter_accept_list: bool,
    pub peer_addr_kind: AddrKind,
    pub peer_addr: BdAddr,
    pub own_addr_kind: AddrKind,
    pub conn_interval_min: u16,
    pub conn_interval_max: u16,
    pub max_latency: u16,
    pub supervision_timeout: u16,
    pub min_ce_length: u16,
    pub max_ce_length: u16,
}

impl Cmd for LeCreateConn {
    const OPCODE: u16 = opcode(OGF_LE, 0x000d);
    const STATUS_EVENT: bool = true;
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = WriteCursor::new(dest);
        w.write(self.scan_interval)?;
        w.write(self.scan_window)?;
        w.write(self.use_filter_accept_list as u8)?;
        w.write(self.peer_addr_kind.raw())?;
        w.write(self.peer_addr)?;
        w.write(self.own_addr_kind.raw())?;
        w.write(self.conn_interval_min)?;
        w.write(self.conn_interval_max)?;
        w.write(self.max_latency)?;
        w.write(self.supervision_timeout)?;
        w.write(self.min_ce_length)?;
        w.write(self.max_ce_length)?;
        Ok(w.len())
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

/// Cancel an in-progress LE Create Connection.
pub struct LeCreateConnCancel;

impl Cmd for LeCreateConnCancel {
    const OPCODE: u16 = opcode(OGF_LE, 0x000e);
    type Return = Status;

    fn params(&self, dest: &mut [u8]) -> Result<usize, CodecError> {
        no_params(dest)
    }

    fn return_params(src: &[u8]) -> Result<Status, CodecError> {
        status_only(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::encode_command;

    #[test]
    fn opcodes() {
        assert_eq!(Reset::OPCODE, 0x0c03);
        assert_eq!(ReadBdAddr::OPCODE, 0x1009);
        assert_eq!(Disconnect::OPCODE, 0x0406);
        assert_eq!(LeCreateConn::OPCODE, 0x200d);
        assert_eq!(ReadRssi::OPCODE, 0x1405);
    }

    #[test]
    fn encode_reset() {
        let mut buf = [0u8; 16];
        let len = encode_command(&Reset, &mut buf).unwrap();
        assert_eq!(&buf[..len], &[0x03, 0x0c, 0x00]);
    }

    #[test]
    fn encode_disconnect() {
        let mut buf = [0u8; 16];
        let cmd = Disconnect {
            handle: ConnHandle::new(0x0040),
            reason: DisconnectReason::RemoteUserTerminatedConn,
        };
        let len = encode_command(&cmd, &mut buf).unwrap();
        assert_eq!(&buf[..len], &[0x06, 0x04, 0x03, 0x40, 0x00, 0x13]);
    }

    #[test]
    fn decode_le_buffer_size() {
        let ret = LeReadBufferSize::return_params(&[0x00, 0xfb, 0x00, 0x08]).unwrap();
        assert_eq!(ret.status, Status::SUCCESS);
        assert_eq!(ret.le_acl_data_packet_length, 251);
        assert_eq!(ret.total_num_le_acl_data_packets, 8);
    }

    #[test]
    fn decode_read_rssi() {
        let (status, handle, rssi) = ReadRssi::return_params(&[0x00, 0x40, 0x00, 0xc8]).unwrap();
        assert_eq!(status, Status::SUCCESS);
        assert_eq!(handle, ConnHandle::new(0x0040));
        assert_eq!(rssi, -56);
    }
}
