//! A scriptable in-memory controller for exercising the host without hardware.

use core::convert::Infallible;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use crate::hci::data::{AclPacket, AclPacketBoundary};
use crate::hci::event::Event;
use crate::hci::{AddrKind, BdAddr, ConnHandle, ControllerToHostPacket, Transport};

const QUEUE_SIZE: usize = 16;
const EVENT_MAX: usize = 64;
const ACL_MAX: usize = crate::config::L2CAP_MTU + 4;

/// A packet written by the host, captured for inspection.
#[derive(Debug)]
pub enum HostPacket {
    /// An HCI command, parameters still encoded.
    Command {
        /// Command opcode.
        opcode: u16,
        /// Encoded command parameters.
        params: Vec<u8, EVENT_MAX>,
    },
    /// An ACL data packet.
    Acl {
        /// Connection handle.
        handle: ConnHandle,
        /// Packet boundary flag.
        boundary: AclPacketBoundary,
        /// Packet payload.
        data: Vec<u8, ACL_MAX>,
    },
}

enum ControllerPacket {
    Event { code: u8, params: Vec<u8, EVENT_MAX> },
    Acl { handle: ConnHandle, data: Vec<u8, ACL_MAX> },
}

/// Captures everything the host writes and plays back scripted packets.
///
/// Drive it from a test: await [`MockController::host_packet`] to observe
/// traffic, and use the injection methods to emulate controller behavior.
pub struct MockController {
    outbound: Channel<CriticalSectionRawMutex, HostPacket, QUEUE_SIZE>,
    inbound: Channel<CriticalSectionRawMutex, ControllerPacket, QUEUE_SIZE>,
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl MockController {
    /// Create a new controller with empty queues.
    pub fn new() -> Self {
        Self {
            outbound: Channel::new(),
            inbound: Channel::new(),
        }
    }

    /// Next packet written by the host.
    pub async fn host_packet(&self) -> HostPacket {
        self.outbound.receive().await
    }

    /// Next packet written by the host, if one is queued.
    pub fn try_host_packet(&self) -> Option<HostPacket> {
        self.outbound.try_receive().ok()
    }

    /// Inject a raw event packet.
    pub async fn raise_event(&self, code: u8, params: &[u8]) {
        let packet = ControllerPacket::Event {
            code,
            params: unwrap!(Vec::from_slice(params)),
        };
        self.inbound.send(packet).await;
    }

    /// Inject a Command Complete event for `opcode`.
    pub async fn complete_command(&self, opcode: u16, return_params: &[u8]) {
        let mut params: Vec<u8, EVENT_MAX> = Vec::new();
        unwrap!(params.push(1));
        unwrap!(params.extend_from_slice(&opcode.to_le_bytes()));
        unwrap!(params.extend_from_slice(return_params));
        self.inbound.send(ControllerPacket::Event { code: 0x0e, params }).await;
    }

    /// Inject a Command Status event for `opcode`.
    pub async fn status_command(&self, opcode: u16, status: u8) {
        let mut params: Vec<u8, EVENT_MAX> = Vec::new();
        unwrap!(params.push(status));
        unwrap!(params.push(1));
        unwrap!(params.extend_from_slice(&opcode.to_le_bytes()));
        self.inbound.send(ControllerPacket::Event { code: 0x0f, params }).await;
    }

    /// Inject an LE Connection Complete event.
    pub async fn connection_complete(&self, status: u8, handle: ConnHandle, role: u8, kind: AddrKind, addr: BdAddr) {
        let mut params: Vec<u8, EVENT_MAX> = Vec::new();
        unwrap!(params.push(0x01));
        unwrap!(params.push(status));
        unwrap!(params.extend_from_slice(&handle.raw().to_le_bytes()));
        unwrap!(params.push(role));
        unwrap!(params.push(kind.raw()));
        unwrap!(params.extend_from_slice(&addr.raw()));
        // conn_interval, peripheral_latency, supervision_timeout, clock accuracy
        unwrap!(params.extend_from_slice(&[0x28, 0x00, 0x00, 0x00, 0x20, 0x03, 0x00]));
        self.inbound.send(ControllerPacket::Event { code: 0x3e, params }).await;
    }

    /// Inject a Disconnection Complete event.
    pub async fn disconnection_complete(&self, handle: ConnHandle, reason: u8) {
        let mut params: Vec<u8, EVENT_MAX> = Vec::new();
        unwrap!(params.push(0));
        unwrap!(params.extend_from_slice(&handle.raw().to_le_bytes()));
        unwrap!(params.push(reason));
        self.inbound.send(ControllerPacket::Event { code: 0x05, params }).await;
    }

    /// Inject a Number Of Completed Packets event for one connection.
    pub async fn completed_packets(&self, handle: ConnHandle, count: u16) {
        let mut params: Vec<u8, EVENT_MAX> = Vec::new();
        unwrap!(params.push(1));
        unwrap!(params.extend_from_slice(&handle.raw().to_le_bytes()));
        unwrap!(params.extend_from_slice(&count.to_le_bytes()));
        self.inbound.send(ControllerPacket::Event { code: 0x13, params }).await;
    }

    /// Inject an LE Advertising Report event with a single report.
    pub async fn advertising_report(&self, kind: AddrKind, addr: BdAddr, data: &[u8], rssi: i8) {
        let mut params: Vec<u8, EVENT_MAX> = Vec::new();
        unwrap!(params.push(0x02));
        unwrap!(params.push(1));
        unwrap!(params.push(0x00));
        unwrap!(params.push(kind.raw()));
        unwrap!(params.extend_from_slice(&addr.raw()));
        unwrap!(params.push(data.len() as u8));
        unwrap!(params.extend_from_slice(data));
        unwrap!(params.push(rssi as u8));
        self.inbound.send(ControllerPacket::Event { code: 0x3e, params }).await;
    }

    /// Inject an inbound ACL data packet carrying a complete L2CAP frame.
    pub async fn inject_acl(&self, handle: ConnHandle, data: &[u8]) {
        let packet = ControllerPacket::Acl {
            handle,
            data: unwrap!(Vec::from_slice(data)),
        };
        self.inbound.send(packet).await;
    }
}

impl Transport for MockController {
    type Error = Infallible;

    async fn read<'a>(&self, rx: &'a mut [u8]) -> Result<ControllerToHostPacket<'a>, Self::Error> {
        match self.inbound.receive().await {
            ControllerPacket::Event { code, params } => {
                let n = params.len();
                rx[..n].copy_from_slice(&params);
                // Packets built by the test script are well formed.
                Ok(ControllerToHostPacket::Event(unwrap!(Event::decode(code, &rx[..n]))))
            }
            ControllerPacket::Acl { handle, data } => {
                let n = data.len();
                rx[..n].copy_from_slice(&data);
                Ok(ControllerToHostPacket::Acl(AclPacket::new(
                    handle,
                    AclPacketBoundary::FirstFlushable,
                    &rx[..n],
                )))
            }
        }
    }

    async fn write_command(&self, opcode: u16, params: &[u8]) -> Result<(), Self::Error> {
        let packet = HostPacket::Command {
            opcode,
            params: unwrap!(Vec::from_slice(params)),
        };
        self.outbound.send(packet).await;
        Ok(())
    }

    async fn write_acl(&self, packet: AclPacket<'_>) -> Result<(), Self::Error> {
        let packet = HostPacket::Acl {
            handle: packet.handle(),
            boundary: packet.boundary_flag(),
            data: unwrap!(Vec::from_slice(packet.data())),
        };
        self.outbound.send(packet).await;
        Ok(())
    }
}
