use std::time::Duration;

use ble_host::attribute::CharacteristicProp;
use ble_host::connection::{ConnectConfig, ScanConfig};
use ble_host::gatt::client::GattClient;
use ble_host::hci::{AddrKind, BdAddr};
use ble_host::mock_controller::MockController;
use ble_host::types::uuid::Uuid;
use ble_host::{BleHost, BleHostError, Error};
use tokio::select;
use tokio::sync::mpsc;

mod common;

use common::{att_frame, controller_task, OutboundFrame, CONN, PEER_ADDR};

const SERVICE_UUID: Uuid = Uuid::new_long([
    0x1b, 0xc5, 0xd5, 0xa5, 0x02, 0x00, 0x04, 0x99, 0xe3, 0x11, 0x11, 0xc1, 0xc0, 0x95, 0xfc, 0x09,
]);
const COUNT_UUID: Uuid = Uuid::new_long([
    0x1c, 0xc5, 0xd5, 0xa5, 0x02, 0x00, 0x04, 0x99, 0xe3, 0x11, 0x11, 0xc1, 0xc0, 0x95, 0xfc, 0x09,
]);

// Handle layout of the emulated remote server.
const SVC_START: u16 = 0x0010;
const SVC_END: u16 = 0x0018;
const DECL_HANDLE: u16 = 0x0011;
const VALUE_HANDLE: u16 = 0x0012;
const CCCD_HANDLE: u16 = 0x0013;

fn connect_config<'d>(peer: &'d [(AddrKind, &'d BdAddr)]) -> ConnectConfig<'d> {
    ConnectConfig {
        connect_params: Default::default(),
        scan_config: ScanConfig {
            filter_accept_list: peer,
            ..Default::default()
        },
    }
}

/// Emulates a remote GATT server one attribute request at a time.
///
/// Writes to the value handle push queued values back: three notifications
/// when notifications are enabled, one indication when indications are. When
/// `answer_reads` is false a read request drops the link instead.
async fn remote_server(
    controller: &MockController,
    rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    answer_reads: bool,
) {
    let mut cccd: u16 = 0;
    while let Some(frame) = rx.recv().await {
        assert_eq!(frame.channel, 0x0004);
        let p = frame.payload;
        match p[0] {
            // Exchange MTU: this side supports 200.
            0x02 => controller.inject_acl(CONN, &att_frame(&[0x03, 200, 0])).await,
            // Find By Type Value: one service, then no more.
            0x06 => {
                let start = u16::from_le_bytes([p[1], p[2]]);
                if start <= SVC_START {
                    let mut rsp = vec![0x07];
                    rsp.extend_from_slice(&SVC_START.to_le_bytes());
                    rsp.extend_from_slice(&SVC_END.to_le_bytes());
                    controller.inject_acl(CONN, &att_frame(&rsp)).await;
                } else {
                    controller.inject_acl(CONN, &att_frame(&[0x01, 0x06, p[1], p[2], 0x0a])).await;
                }
            }
            // Read By Type: the characteristic declaration.
            0x08 => {
                let start = u16::from_le_bytes([p[1], p[2]]);
                if start <= DECL_HANDLE {
                    let mut rsp = vec![0x09, 21];
                    rsp.extend_from_slice(&DECL_HANDLE.to_le_bytes());
                    rsp.push(0x1a);
                    rsp.extend_from_slice(&VALUE_HANDLE.to_le_bytes());
                    rsp.extend_from_slice(COUNT_UUID.as_raw());
                    controller.inject_acl(CONN, &att_frame(&rsp)).await;
                } else {
                    controller.inject_acl(CONN, &att_frame(&[0x01, 0x08, p[1], p[2], 0x0a])).await;
                }
            }
            // Find Information: the configuration descriptor.
            0x04 => {
                let mut rsp = vec![0x05, 0x01];
                rsp.extend_from_slice(&CCCD_HANDLE.to_le_bytes());
                rsp.extend_from_slice(&[0x02, 0x29]);
                controller.inject_acl(CONN, &att_frame(&rsp)).await;
            }
            0x0a => {
                if answer_reads {
                    let mut rsp = vec![0x0b];
                    rsp.extend_from_slice(b"count: Read 0");
                    controller.inject_acl(CONN, &att_frame(&rsp)).await;
                } else {
                    controller.disconnection_complete(CONN, 0x13).await;
                }
            }
            0x12 => {
                let handle = u16::from_le_bytes([p[1], p[2]]);
                controller.inject_acl(CONN, &att_frame(&[0x13])).await;
                if handle == CCCD_HANDLE {
                    cccd = u16::from_le_bytes([p[3], p[4]]);
                } else if handle == VALUE_HANDLE && cccd == 0x0001 {
                    for i in 0..3u8 {
                        let mut ntf = vec![0x1b];
                        ntf.extend_from_slice(&VALUE_HANDLE.to_le_bytes());
                        ntf.push(i);
                        controller.inject_acl(CONN, &att_frame(&ntf)).await;
                    }
                } else if handle == VALUE_HANDLE && cccd == 0x0002 {
                    let mut ind = vec![0x1d];
                    ind.extend_from_slice(&VALUE_HANDLE.to_le_bytes());
                    ind.push(p[3]);
                    controller.inject_acl(CONN, &att_frame(&ind)).await;
                }
            }
            // Confirmations and commands need no response.
            0x1e | 0x52 => {}
            other => panic!("remote server got unexpected opcode {:#x}", other),
        }
    }
}

#[tokio::test]
async fn discover_read_write_subscribe() {
    common::setup();

    let controller = MockController::new();
    let host = BleHost::new(&controller);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let peer_addr = BdAddr::new(PEER_ADDR);
    let peer = [(AddrKind::PUBLIC, &peer_addr)];

    let test = async {
        let mut central = host.central();
        let conn = central.connect(&connect_config(&peer)).await.unwrap();
        let client: GattClient<'_, _, 4> = GattClient::new(&host, &conn);

        let inner = async {
            let mtu = client.exchange_mtu(185).await.unwrap();
            assert_eq!(mtu, 185);
            assert_eq!(conn.att_mtu(), 185);

            let services = client.services_by_uuid(&SERVICE_UUID).await.unwrap();
            assert_eq!(services.len(), 1);
            let service = services[0].clone();
            assert_eq!(*service.uuid(), SERVICE_UUID);

            let count = client.characteristic_by_uuid(&service, &COUNT_UUID).await.unwrap();
            assert_eq!(count.handle(), VALUE_HANDLE);
            assert_eq!(count.cccd_handle(), Some(CCCD_HANDLE));

            let mut buf = [0u8; 32];
            let len = client.read_characteristic(&count, &mut buf).await.unwrap();
            assert_eq!(&buf[..len], b"count: Read 0");

            client.write_characteristic(&count, &[0x2a]).await.unwrap();
            client.write_characteristic_without_response(&count, &[0x2b]).await.unwrap();

            let mut listener = client.subscribe(&count, false).await.unwrap();
            client.write_characteristic(&count, &[0x00]).await.unwrap();
            for i in 0..3u8 {
                let value = listener.next().await;
                assert_eq!(value.as_ref(), &[i]);
            }
            client.unsubscribe(&count).await.unwrap();
            drop(listener);

            let mut listener = client.subscribe(&count, true).await.unwrap();
            client.write_characteristic(&count, &[0x42]).await.unwrap();
            let value = listener.next().await;
            assert_eq!(value.as_ref(), &[0x42]);
        };

        select! {
            _ = client.task() => panic!("client task stopped"),
            _ = inner => {}
        }
    };

    let run = tokio::time::timeout(Duration::from_secs(10), async {
        select! {
            _ = host.run() => panic!("host stopped"),
            _ = controller_task(&controller, tx) => panic!("controller stopped"),
            _ = remote_server(&controller, &mut rx, true) => panic!("remote stopped"),
            _ = test => {}
        }
    });
    run.await.unwrap();
}

/// Remote with two services for full structure discovery: Generic Access
/// (handles 1..5, two read-only characteristics) and the 128-bit count
/// service (handles 0x10..0x18, one characteristic with a CCCD).
async fn structured_remote(controller: &MockController, rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) {
    while let Some(frame) = rx.recv().await {
        let p = frame.payload;
        let start = u16::from_le_bytes([p[1], p[2]]);
        let rsp: Vec<u8> = match p[0] {
            0x10 => {
                if start <= 0x0001 {
                    vec![0x11, 6, 0x01, 0x00, 0x05, 0x00, 0x00, 0x18]
                } else if start <= 0x0010 {
                    let mut rsp = vec![0x11, 20, 0x10, 0x00, 0x18, 0x00];
                    rsp.extend_from_slice(SERVICE_UUID.as_raw());
                    rsp
                } else {
                    vec![0x01, 0x10, p[1], p[2], 0x0a]
                }
            }
            0x08 => {
                if start <= 0x0002 && u16::from_le_bytes([p[3], p[4]]) == 0x0005 {
                    vec![
                        0x09, 7, 0x02, 0x00, 0x02, 0x03, 0x00, 0x00, 0x2a, 0x04, 0x00, 0x02, 0x05, 0x00, 0x01, 0x2a,
                    ]
                } else if start <= DECL_HANDLE && u16::from_le_bytes([p[3], p[4]]) == SVC_END {
                    let mut rsp = vec![0x09, 21];
                    rsp.extend_from_slice(&DECL_HANDLE.to_le_bytes());
                    rsp.push(0x1a);
                    rsp.extend_from_slice(&VALUE_HANDLE.to_le_bytes());
                    rsp.extend_from_slice(COUNT_UUID.as_raw());
                    rsp
                } else {
                    vec![0x01, 0x08, p[1], p[2], 0x0a]
                }
            }
            0x04 => match start {
                0x0004 => vec![0x05, 0x01, 0x04, 0x00, 0x03, 0x28],
                0x0013 => vec![0x05, 0x01, 0x13, 0x00, 0x02, 0x29],
                _ => vec![0x01, 0x04, p[1], p[2], 0x0a],
            },
            0x0a => vec![0x0b, 0x00, 0x00],
            0x12 => vec![0x13],
            other => panic!("remote server got unexpected opcode {:#x}", other),
        };
        controller.inject_acl(CONN, &att_frame(&rsp)).await;
    }
}

#[tokio::test]
async fn discovery_reproduces_remote_structure() {
    common::setup();

    let controller = MockController::new();
    let host = BleHost::new(&controller);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let peer_addr = BdAddr::new(PEER_ADDR);
    let peer = [(AddrKind::PUBLIC, &peer_addr)];

    let test = async {
        let mut central = host.central();
        let conn = central.connect(&connect_config(&peer)).await.unwrap();
        let client: GattClient<'_, _, 4> = GattClient::new(&host, &conn);

        let inner = async {
            let services = client.services().await.unwrap();
            assert_eq!(services.len(), 2);
            assert_eq!(services[0].handle_range(), (0x0001, 0x0005));
            assert_eq!(*services[0].uuid(), Uuid::new_short(0x1800));
            assert_eq!(services[1].handle_range(), (SVC_START, SVC_END));
            assert_eq!(*services[1].uuid(), SERVICE_UUID);

            let generic = client.characteristics(&services[0]).await.unwrap();
            assert_eq!(generic.len(), 2);
            assert_eq!(generic[0].declaration_handle(), 0x0002);
            assert_eq!(generic[0].handle(), 0x0003);
            assert_eq!(*generic[0].uuid(), Uuid::new_short(0x2a00));
            assert_eq!(generic[1].handle(), 0x0005);
            assert_eq!(*generic[1].uuid(), Uuid::new_short(0x2a01));
            assert!(!generic[0].properties().any(&[CharacteristicProp::Notify]));

            let count = client.characteristics(&services[1]).await.unwrap();
            assert_eq!(count.len(), 1);
            assert_eq!(count[0].handle(), VALUE_HANDLE);
            assert_eq!(*count[0].uuid(), COUNT_UUID);
            assert!(count[0].properties().any(&[CharacteristicProp::Notify]));

            // The next declaration bounds descriptor discovery.
            let none = client.descriptors(&services[0], &generic[0]).await.unwrap();
            assert!(none.is_empty());
            let none = client.descriptors(&services[0], &generic[1]).await.unwrap();
            assert!(none.is_empty());

            let descriptors = client.descriptors(&services[1], &count[0]).await.unwrap();
            assert_eq!(descriptors.len(), 1);
            assert_eq!(descriptors[0].handle(), CCCD_HANDLE);
            assert_eq!(*descriptors[0].uuid(), Uuid::new_short(0x2902));

            let mut buf = [0u8; 4];
            let len = client.read_descriptor(&descriptors[0], &mut buf).await.unwrap();
            assert_eq!(&buf[..len], &[0x00, 0x00]);
            client.write_descriptor(&descriptors[0], &[0x01, 0x00]).await.unwrap();
        };

        select! {
            _ = client.task() => panic!("client task stopped"),
            _ = inner => {}
        }
    };

    let run = tokio::time::timeout(Duration::from_secs(10), async {
        select! {
            _ = host.run() => panic!("host stopped"),
            _ = controller_task(&controller, tx) => panic!("controller stopped"),
            _ = structured_remote(&controller, &mut rx) => panic!("remote stopped"),
            _ = test => {}
        }
    });
    run.await.unwrap();
}

#[tokio::test]
async fn disconnect_aborts_outstanding_request() {
    common::setup();

    let controller = MockController::new();
    let host = BleHost::new(&controller);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let peer_addr = BdAddr::new(PEER_ADDR);
    let peer = [(AddrKind::PUBLIC, &peer_addr)];

    let test = async {
        let mut central = host.central();
        let conn = central.connect(&connect_config(&peer)).await.unwrap();
        let client: GattClient<'_, _, 4> = GattClient::new(&host, &conn);

        let inner = async {
            let services = client.services_by_uuid(&SERVICE_UUID).await.unwrap();
            let service = services[0].clone();
            let count = client.characteristic_by_uuid(&service, &COUNT_UUID).await.unwrap();

            // The remote drops the link instead of answering the read.
            let mut buf = [0u8; 8];
            let result = client.read_characteristic(&count, &mut buf).await;
            assert!(matches!(result, Err(BleHostError::BleHost(Error::Disconnected))));
        };

        select! {
            _ = client.task() => panic!("client task stopped"),
            _ = inner => {}
        }
    };

    let run = tokio::time::timeout(Duration::from_secs(10), async {
        select! {
            _ = host.run() => panic!("host stopped"),
            _ = controller_task(&controller, tx) => panic!("controller stopped"),
            _ = remote_server(&controller, &mut rx, false) => panic!("remote stopped"),
            _ = test => {}
        }
    });
    run.await.unwrap();
}
