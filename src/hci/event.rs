//! HCI event decoding.

use crate::codec::Error as CodecError;
use crate::cursor::ReadCursor;

use super::{AddrKind, BdAddr, ConnHandle, LeConnRole, Status};

pub(crate) const EVENT_DISCONNECTION_COMPLETE: u8 = 0x05;
pub(crate) const EVENT_COMMAND_COMPLETE: u8 = 0x0e;
pub(crate) const EVENT_COMMAND_STATUS: u8 = 0x0f;
pub(crate) const EVENT_NUMBER_OF_COMPLETED_PACKETS: u8 = 0x13;
pub(crate) const EVENT_LE_META: u8 = 0x3e;

pub(crate) const LE_EVENT_CONNECTION_COMPLETE: u8 = 0x01;
pub(crate) const LE_EVENT_ADVERTISING_REPORT: u8 = 0x02;

/// A decoded HCI event, borrowing its payload from the receive buffer.
#[derive(Debug)]
pub enum Event<'d> {
    CommandComplete {
        num_hci_command_packets: u8,
        opcode: u16,
        /// Return parameters, status first for most commands.
        return_params: &'d [u8],
    },
    CommandStatus {
        status: Status,
        num_hci_command_packets: u8,
        opcode: u16,
    },
    DisconnectionComplete {
        status: Status,
        handle: ConnHandle,
        reason: Status,
    },
    NumberOfCompletedPackets {
        completed: CompletedPacketsIter<'d>,
    },
    Le(LeEvent<'d>),
    /// An event this host does not route internally. Kept raw for
    /// registered event handlers.
    Unknown { code: u8, data: &'d [u8] },
}

/// LE meta events.
#[derive(Debug)]
pub enum LeEvent<'d> {
    ConnectionComplete {
        status: Status,
        handle: ConnHandle,
        role: LeConnRole,
        peer_addr_kind: AddrKind,
        peer_addr: BdAddr,
        /// In units of 1.25 ms.
        conn_interval: u16,
        peripheral_latency: u16,
        /// In units of 10 ms.
        supervision_timeout: u16,
    },
    AdvertisingReport {
        reports: AdvReportsIter<'d>,
    },
    Unknown { subcode: u8, data: &'d [u8] },
}

impl<'d> Event<'d> {
    pub fn decode(code: u8, data: &'d [u8]) -> Result<Self, CodecError> {
        let mut r = ReadCursor::new(data);
        match code {
            EVENT_COMMAND_COMPLETE => {
                let num_hci_command_packets: u8 = r.read()?;
                let opcode: u16 = r.read()?;
                Ok(Event::CommandComplete {
                    num_hci_command_packets,
                    opcode,
                    return_params: r.remaining(),
                })
            }
            EVENT_COMMAND_STATUS => {
                let status: Status = r.read()?;
                let num_hci_command_packets: u8 = r.read()?;
                let opcode: u16 = r.read()?;
                Ok(Event::CommandStatus {
                    status,
                    num_hci_command_packets,
                    opcode,
                })
            }
            EVENT_DISCONNECTION_COMPLETE => {
                let status: Status = r.read()?;
                let handle: u16 = r.read()?;
                let reason: Status = r.read()?;
                Ok(Event::DisconnectionComplete {
                    status,
                    handle: ConnHandle::new(handle),
                    reason,
                })
            }
            EVENT_NUMBER_OF_COMPLETED_PACKETS => {
                let count: u8 = r.read()?;
                let entries = r.slice(count as usize * 4)?;
                Ok(Event::NumberOfCompletedPackets {
                    completed: CompletedPacketsIter {
                        cursor: ReadCursor::new(entries),
                    },
                })
            }
            EVENT_LE_META => {
                let subcode: u8 = r.read()?;
                LeEvent::decode(subcode, r.remaining()).map(Event::Le)
            }
            code => Ok(Event::Unknown { code, data }),
        }
    }
}

impl<'d> LeEvent<'d> {
    fn decode(subcode: u8, data: &'d [u8]) -> Result<Self, CodecError> {
        let mut r = ReadCursor::new(data);
        match subcode {
            LE_EVENT_CONNECTION_COMPLETE => {
                let status: Status = r.read()?;
                let handle: u16 = r.read()?;
                let role: u8 = r.read()?;
                let peer_addr_kind: u8 = r.read()?;
                let peer_addr: BdAddr = r.read()?;
                let conn_interval: u16 = r.read()?;
                let peripheral_latency: u16 = r.read()?;
                let supervision_timeout: u16 = r.read()?;
                Ok(LeEvent::ConnectionComplete {
                    status,
                    handle: ConnHandle::new(handle),
                    role: if role == 0 {
                        LeConnRole::Central
                    } else {
                        LeConnRole::Peripheral
                    },
                    peer_addr_kind: AddrKind::new(peer_addr_kind),
                    peer_addr,
                    conn_interval,
                    peripheral_latency,
                    supervision_timeout,
                })
            }
            LE_EVENT_ADVERTISING_REPORT => {
                let count: u8 = r.read()?;
                Ok(LeEvent::AdvertisingReport {
                    reports: AdvReportsIter {
                        count,
                        cursor: ReadCursor::new(r.remaining()),
                    },
                })
            }
            subcode => Ok(LeEvent::Unknown {
                subcode,
                data,
            }),
        }
    }
}

/// Entries of a Number Of Completed Packets event.
#[derive(Debug, Clone)]
pub struct CompletedPacketsIter<'d> {
    cursor: ReadCursor<'d>,
}

impl Iterator for CompletedPacketsIter<'_> {
    type Item = (ConnHandle, u16);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.available() >= 4 {
            let handle: u16 = self.cursor.read().ok()?;
            let count: u16 = self.cursor.read().ok()?;
            Some((ConnHandle::new(handle), count))
        } else {
            None
        }
    }
}

/// One advertising report.
#[derive(Debug, Clone)]
pub struct AdvReport<'d> {
    pub event_kind: u8,
    pub addr_kind: AddrKind,
    pub addr: BdAddr,
    pub data: &'d [u8],
    pub rssi: i8,
}

/// Reports of an LE Advertising Report event.
#[derive(Debug, Clone)]
pub struct AdvReportsIter<'d> {
    count: u8,
    cursor: ReadCursor<'d>,
}

impl<'d> Iterator for AdvReportsIter<'d> {
    type Item = Result<AdvReport<'d>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.count == 0 {
            return None;
        }
        self.count -= 1;
        let res = (|| {
            let event_kind: u8 = self.cursor.read()?;
            let addr_kind: u8 = self.cursor.read()?;
            let addr: BdAddr = self.cursor.read()?;
            let len: u8 = self.cursor.read()?;
            let data = self.cursor.slice(len as usize)?;
            let rssi: u8 = self.cursor.read()?;
            Ok(AdvReport {
                event_kind,
                addr_kind: AddrKind::new(addr_kind),
                addr,
                data,
                rssi: rssi as i8,
            })
        })();
        Some(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_command_complete() {
        let data = [0x01, 0x03, 0x0c, 0x00];
        let Ok(Event::CommandComplete {
            num_hci_command_packets,
            opcode,
            return_params,
        }) = Event::decode(EVENT_COMMAND_COMPLETE, &data)
        else {
            panic!("expected command complete");
        };
        assert_eq!(num_hci_command_packets, 1);
        assert_eq!(opcode, 0x0c03);
        assert_eq!(return_params, &[0x00]);
    }

    #[test]
    fn decode_command_status() {
        let data = [0x00, 0x01, 0x0d, 0x20];
        let Ok(Event::CommandStatus { status, opcode, .. }) = Event::decode(EVENT_COMMAND_STATUS, &data) else {
            panic!("expected command status");
        };
        assert_eq!(status, Status::SUCCESS);
        assert_eq!(opcode, 0x200d);
    }

    #[test]
    fn decode_disconnection_complete() {
        let data = [0x00, 0x40, 0x00, 0x13];
        let Ok(Event::DisconnectionComplete { status, handle, reason }) =
            Event::decode(EVENT_DISCONNECTION_COMPLETE, &data)
        else {
            panic!("expected disconnection complete");
        };
        assert_eq!(status, Status::SUCCESS);
        assert_eq!(handle, ConnHandle::new(0x0040));
        assert_eq!(reason, Status::new(0x13));
    }

    #[test]
    fn decode_number_of_completed_packets() {
        let data = [0x02, 0x40, 0x00, 0x01, 0x00, 0x41, 0x00, 0x02, 0x00];
        let Ok(Event::NumberOfCompletedPackets { completed }) =
            Event::decode(EVENT_NUMBER_OF_COMPLETED_PACKETS, &data)
        else {
            panic!("expected number of completed packets");
        };
        let entries: heapless::Vec<_, 4> = completed.collect();
        assert_eq!(entries[0], (ConnHandle::new(0x0040), 1));
        assert_eq!(entries[1], (ConnHandle::new(0x0041), 2));
    }

    #[test]
    fn decode_le_connection_complete() {
        let mut data = heapless::Vec::<u8, 32>::new();
        data.extend_from_slice(&[0x01, 0x00, 0x40, 0x00, 0x00, 0x01]).unwrap();
        data.extend_from_slice(&[0xff, 0xee, 0xdd, 0xcc, 0xbb, 0xaa]).unwrap();
        data.extend_from_slice(&[0x40, 0x00, 0x00, 0x00, 0x20, 0x03]).unwrap();
        let Ok(Event::Le(LeEvent::ConnectionComplete {
            status,
            handle,
            role,
            peer_addr,
            ..
        })) = Event::decode(EVENT_LE_META, &data)
        else {
            panic!("expected connection complete");
        };
        assert_eq!(status, Status::SUCCESS);
        assert_eq!(handle, ConnHandle::new(0x0040));
        assert_eq!(role, LeConnRole::Central);
        assert_eq!(peer_addr, BdAddr::new([0xff, 0xee, 0xdd, 0xcc, 0xbb, 0xaa]));
    }

    #[test]
    fn decode_advertising_report() {
        let mut data = heapless::Vec::<u8, 32>::new();
        data.extend_from_slice(&[0x02, 0x01, 0x00, 0x01]).unwrap();
        data.extend_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]).unwrap();
        data.extend_from_slice(&[0x03, 0x02, 0x01, 0x06, 0xc8]).unwrap();
        let Ok(Event::Le(LeEvent::AdvertisingReport { reports })) = Event::decode(EVENT_LE_META, &data) else {
            panic!("expected advertising report");
        };
        let reports: heapless::Vec<_, 4> = reports.collect();
        assert_eq!(reports.len(), 1);
        let report = reports[0].as_ref().unwrap();
        assert_eq!(report.addr, BdAddr::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]));
        assert_eq!(report.data, &[0x02, 0x01, 0x06]);
        assert_eq!(report.rssi, -56);
    }
}
