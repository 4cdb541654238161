//! Shared plumbing for integration tests: a scripted controller loop that
//! answers host commands the way a real controller would.
#![allow(dead_code)]

use ble_host::hci::data::AclPacketBoundary;
use ble_host::hci::{AddrKind, BdAddr, ConnHandle};
use ble_host::mock_controller::{HostPacket, MockController};
use tokio::sync::mpsc;

pub const PEER_ADDR: [u8; 6] = [0xff, 0xee, 0xdd, 0xcc, 0xbb, 0xaa];
pub const CONN: ConnHandle = ConnHandle::new(1);

pub fn setup() {
    let _ = env_logger::try_init();
}

/// One reassembled L2CAP frame written by the host.
#[derive(Debug)]
pub struct OutboundFrame {
    pub handle: ConnHandle,
    pub channel: u16,
    pub payload: Vec<u8>,
}

/// Answer commands with canned completions and reassemble outbound ACL
/// data into L2CAP frames. Runs until the test finishes.
pub async fn controller_task(controller: &MockController, frames: mpsc::UnboundedSender<OutboundFrame>) {
    let mut partial: Option<(ConnHandle, usize, Vec<u8>)> = None;
    loop {
        match controller.host_packet().await {
            HostPacket::Command { opcode, params } => match opcode {
                // Disconnect
                0x0406 => {
                    let handle = ConnHandle::new(u16::from_le_bytes([params[0], params[1]]));
                    let reason = params[2];
                    controller.status_command(opcode, 0).await;
                    controller.disconnection_complete(handle, reason).await;
                }
                // LE Create Connection
                0x200d => {
                    let kind = AddrKind::new(params[5]);
                    let mut addr = [0u8; 6];
                    addr.copy_from_slice(&params[6..12]);
                    controller.status_command(opcode, 0).await;
                    controller
                        .connection_complete(0, CONN, 0x00, kind, BdAddr::new(addr))
                        .await;
                }
                // Read BD_ADDR
                0x1009 => {
                    let mut ret = vec![0u8];
                    ret.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
                    controller.complete_command(opcode, &ret).await;
                }
                // LE Read Buffer Size: 27 byte packets, 8 in flight
                0x2002 => {
                    controller.complete_command(opcode, &[0, 27, 0, 8]).await;
                }
                // Read RSSI
                0x1405 => {
                    let mut ret = vec![0u8];
                    ret.extend_from_slice(&params[0..2]);
                    ret.push(-40i8 as u8);
                    controller.complete_command(opcode, &ret).await;
                }
                _ => {
                    controller.complete_command(opcode, &[0]).await;
                }
            },
            HostPacket::Acl { handle, boundary, data } => {
                match boundary {
                    AclPacketBoundary::FirstNonFlushable | AclPacketBoundary::FirstFlushable => {
                        let length = u16::from_le_bytes([data[0], data[1]]) as usize;
                        partial = Some((handle, length, data.to_vec()));
                    }
                    AclPacketBoundary::Continuing => {
                        let (_, _, buf) = partial.as_mut().expect("continuation without start");
                        buf.extend_from_slice(&data);
                    }
                    AclPacketBoundary::Complete => panic!("unexpected boundary flag"),
                }
                // Return the link credit for this fragment.
                controller.completed_packets(handle, 1).await;

                if let Some((handle, length, buf)) = partial.take() {
                    if buf.len() >= length + 4 {
                        let channel = u16::from_le_bytes([buf[2], buf[3]]);
                        let frame = OutboundFrame {
                            handle,
                            channel,
                            payload: buf[4..4 + length].to_vec(),
                        };
                        frames.send(frame).expect("test went away");
                    } else {
                        partial = Some((handle, length, buf));
                    }
                }
            }
        }
    }
}

/// Wrap an ATT payload in a basic L2CAP header for the attribute channel.
pub fn att_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(&0x0004u16.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}
