use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use ble_host::ad_structure::{AdStructure, BR_EDR_NOT_SUPPORTED, LE_GENERAL_DISCOVERABLE};
use ble_host::advertise::Advertisement;
use ble_host::attribute::{AttributeHandler, AttributeTable, CharacteristicProp, Service, Uuid};
use ble_host::connection::ConnectionEvent;
use ble_host::gatt::{GattEvent, GattServer};
use ble_host::hci::{AddrKind, BdAddr};
use ble_host::mock_controller::MockController;
use ble_host::att::AttErrorCode;
use ble_host::{BleHost, BleHostError, Error};
use tokio::select;
use tokio::sync::mpsc;

mod common;

use common::{att_frame, controller_task, CONN, PEER_ADDR};

const SERVICE_UUID: Uuid = Uuid::new_long([
    0x1b, 0xc5, 0xd5, 0xa5, 0x02, 0x00, 0x04, 0x99, 0xe3, 0x11, 0x11, 0xc1, 0xc0, 0x95, 0xfc, 0x09,
]);
const COUNT_UUID: Uuid = Uuid::new_long([
    0x1c, 0xc5, 0xd5, 0xa5, 0x02, 0x00, 0x04, 0x99, 0xe3, 0x11, 0x11, 0xc1, 0xc0, 0x95, 0xfc, 0x09,
]);
const STATE_UUID: Uuid = Uuid::new_long([
    0x1d, 0xc5, 0xd5, 0xa5, 0x02, 0x00, 0x04, 0x99, 0xe3, 0x11, 0x11, 0xc1, 0xc0, 0x95, 0xfc, 0x09,
]);

struct ReadCounter {
    count: AtomicU32,
}

impl AttributeHandler for ReadCounter {
    fn read(&self, offset: usize, dest: &mut [u8]) -> Result<usize, AttErrorCode> {
        if offset != 0 {
            return Err(AttErrorCode::INVALID_OFFSET);
        }
        let n = self.count.fetch_add(1, Ordering::Relaxed);
        let value = format!("count: Read {}", n);
        let len = value.len().min(dest.len());
        dest[..len].copy_from_slice(&value.as_bytes()[..len]);
        Ok(len)
    }
}

fn adv_payload() -> [u8; 31] {
    let mut adv_data = [0; 31];
    AdStructure::encode_slice(
        &[AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED)],
        &mut adv_data[..],
    )
    .unwrap();
    adv_data
}

#[tokio::test]
async fn serves_reads_from_value_handler() {
    common::setup();

    let controller = MockController::new();
    let host = BleHost::new(&controller);
    let (tx, mut rx) = mpsc::unbounded_channel::<common::OutboundFrame>();

    let counter = ReadCounter {
        count: AtomicU32::new(0),
    };
    let mut table: AttributeTable<'_, _, 10> = AttributeTable::new();
    let count = {
        let mut svc = table.add_service(Service::new(SERVICE_UUID.clone()));
        svc.add_characteristic_handler(COUNT_UUID.clone(), &[CharacteristicProp::Read], &counter)
            .build()
    };
    let server = GattServer::new(&host, &table);

    let test = async {
        let mut peripheral = host.peripheral();
        let adv_data = adv_payload();
        let advertiser = peripheral
            .advertise(
                &Default::default(),
                Advertisement::ConnectableScannableUndirected {
                    adv_data: &adv_data,
                    scan_data: &[],
                },
            )
            .await
            .unwrap();
        controller
            .connection_complete(0, CONN, 0x01, AddrKind::PUBLIC, BdAddr::new(PEER_ADDR))
            .await;
        let conn = advertiser.accept().await.unwrap();

        // MTU negotiation applies the minimum of both sides.
        controller.inject_acl(CONN, &att_frame(&[0x02, 185, 0])).await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.channel, 0x0004);
        assert_eq!(frame.payload, vec![0x03, 247, 0]);
        assert_eq!(conn.att_mtu(), 185);

        let handle = count.handle().to_le_bytes();
        controller.inject_acl(CONN, &att_frame(&[0x0a, handle[0], handle[1]])).await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.payload[0], 0x0b);
        assert_eq!(&frame.payload[1..], b"count: Read 0");

        controller.inject_acl(CONN, &att_frame(&[0x0a, handle[0], handle[1]])).await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(&frame.payload[1..], b"count: Read 1");
    };

    let run = tokio::time::timeout(Duration::from_secs(10), async {
        select! {
            _ = host.run() => panic!("host stopped"),
            _ = controller_task(&controller, tx) => panic!("controller stopped"),
            _ = server.run() => panic!("server stopped"),
            _ = test => {}
        }
    });
    run.await.unwrap();
}

#[tokio::test]
async fn notifications_stop_after_unsubscribe() {
    common::setup();

    let controller = MockController::new();
    let host = BleHost::new(&controller);
    let (tx, mut rx) = mpsc::unbounded_channel::<common::OutboundFrame>();

    let mut storage = [0u8; 1];
    let mut table: AttributeTable<'_, _, 10> = AttributeTable::new();
    let value = {
        let mut svc = table.add_service(Service::new(SERVICE_UUID.clone()));
        svc.add_characteristic(
            COUNT_UUID.clone(),
            &[CharacteristicProp::Read, CharacteristicProp::Notify],
            &mut storage,
        )
        .build()
    };
    let cccd = value.cccd_handle().expect("missing descriptor");
    let server = GattServer::new(&host, &table);

    let test = async {
        let mut peripheral = host.peripheral();
        let adv_data = adv_payload();
        let advertiser = peripheral
            .advertise(
                &Default::default(),
                Advertisement::ConnectableScannableUndirected {
                    adv_data: &adv_data,
                    scan_data: &[],
                },
            )
            .await
            .unwrap();
        controller
            .connection_complete(0, CONN, 0x01, AddrKind::PUBLIC, BdAddr::new(PEER_ADDR))
            .await;
        let conn = advertiser.accept().await.unwrap();

        // Subscribe.
        let cccd_bytes = cccd.to_le_bytes();
        controller
            .inject_acl(CONN, &att_frame(&[0x12, cccd_bytes[0], cccd_bytes[1], 0x01, 0x00]))
            .await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.payload, vec![0x13]);
        assert_eq!(
            server.next_event().await,
            GattEvent::Subscribed {
                connection: CONN,
                cccd_handle: cccd
            }
        );

        for i in 0..3u8 {
            server.notify(&conn, &value, &[i]).await.unwrap();
            let frame = rx.recv().await.unwrap();
            let handle = value.handle().to_le_bytes();
            assert_eq!(frame.payload, vec![0x1b, handle[0], handle[1], i]);
        }

        // Unsubscribe, no further values may go out.
        controller
            .inject_acl(CONN, &att_frame(&[0x12, cccd_bytes[0], cccd_bytes[1], 0x00, 0x00]))
            .await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.payload, vec![0x13]);
        assert_eq!(
            server.next_event().await,
            GattEvent::Unsubscribed {
                connection: CONN,
                cccd_handle: cccd
            }
        );

        let result = server.notify(&conn, &value, &[9]).await;
        assert!(matches!(result, Err(BleHostError::BleHost(Error::NotSubscribed))));
        assert!(rx.try_recv().is_err());
    };

    let run = tokio::time::timeout(Duration::from_secs(10), async {
        select! {
            _ = host.run() => panic!("host stopped"),
            _ = controller_task(&controller, tx) => panic!("controller stopped"),
            _ = server.run() => panic!("server stopped"),
            _ = test => {}
        }
    });
    run.await.unwrap();
}

#[tokio::test]
async fn disconnect_aborts_pending_indication() {
    common::setup();

    let controller = MockController::new();
    let host = BleHost::new(&controller);
    let (tx, mut rx) = mpsc::unbounded_channel::<common::OutboundFrame>();

    let mut storage = [0u8; 1];
    let mut table: AttributeTable<'_, _, 10> = AttributeTable::new();
    let value = {
        let mut svc = table.add_service(Service::new(SERVICE_UUID.clone()));
        svc.add_characteristic(
            COUNT_UUID.clone(),
            &[CharacteristicProp::Read, CharacteristicProp::Indicate],
            &mut storage,
        )
        .build()
    };
    let cccd = value.cccd_handle().expect("missing descriptor");
    let server = GattServer::new(&host, &table);

    let test = async {
        let mut peripheral = host.peripheral();
        let adv_data = adv_payload();
        let advertiser = peripheral
            .advertise(
                &Default::default(),
                Advertisement::ConnectableScannableUndirected {
                    adv_data: &adv_data,
                    scan_data: &[],
                },
            )
            .await
            .unwrap();
        controller
            .connection_complete(0, CONN, 0x01, AddrKind::PUBLIC, BdAddr::new(PEER_ADDR))
            .await;
        let conn = advertiser.accept().await.unwrap();

        let cccd_bytes = cccd.to_le_bytes();
        controller
            .inject_acl(CONN, &att_frame(&[0x12, cccd_bytes[0], cccd_bytes[1], 0x02, 0x00]))
            .await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.payload, vec![0x13]);

        // Tear the link down while the indication waits for its confirmation.
        let indicate = server.indicate(&conn, &value, &[1]);
        let disconnect = async {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.payload[0], 0x1d);
            controller.disconnection_complete(CONN, 0x13).await;
            loop {
                match conn.next().await {
                    ConnectionEvent::Disconnected { .. } => break,
                }
            }
        };
        let (result, ()) = tokio::join!(indicate, disconnect);
        assert!(matches!(result, Err(BleHostError::BleHost(Error::Disconnected))));
    };

    let run = tokio::time::timeout(Duration::from_secs(10), async {
        select! {
            _ = host.run() => panic!("host stopped"),
            _ = controller_task(&controller, tx) => panic!("controller stopped"),
            _ = server.run() => panic!("server stopped"),
            _ = test => {}
        }
    });
    run.await.unwrap();
}

#[tokio::test]
async fn rejected_write_produces_no_event() {
    common::setup();

    let controller = MockController::new();
    let host = BleHost::new(&controller);
    let (tx, mut rx) = mpsc::unbounded_channel::<common::OutboundFrame>();

    let mut readonly_storage = [0u8; 1];
    let mut writable_storage = [0u8; 1];
    let mut table: AttributeTable<'_, _, 10> = AttributeTable::new();
    let (readonly, writable) = {
        let mut svc = table.add_service(Service::new(SERVICE_UUID.clone()));
        let readonly = svc
            .add_characteristic(COUNT_UUID.clone(), &[CharacteristicProp::Read], &mut readonly_storage)
            .build();
        let writable = svc
            .add_characteristic(
                STATE_UUID.clone(),
                &[CharacteristicProp::Read, CharacteristicProp::Write],
                &mut writable_storage,
            )
            .build();
        (readonly, writable)
    };
    let server = GattServer::new(&host, &table);

    let test = async {
        let mut peripheral = host.peripheral();
        let adv_data = adv_payload();
        let advertiser = peripheral
            .advertise(
                &Default::default(),
                Advertisement::ConnectableScannableUndirected {
                    adv_data: &adv_data,
                    scan_data: &[],
                },
            )
            .await
            .unwrap();
        controller
            .connection_complete(0, CONN, 0x01, AddrKind::PUBLIC, BdAddr::new(PEER_ADDR))
            .await;
        let _conn = advertiser.accept().await.unwrap();

        // A write to a read-only attribute is answered with an error and
        // must not surface as a write event.
        let ro = readonly.handle().to_le_bytes();
        controller.inject_acl(CONN, &att_frame(&[0x12, ro[0], ro[1], 0x01])).await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.payload, vec![0x01, 0x12, ro[0], ro[1], 0x03]);

        // Same for a write command, which gets no response at all.
        controller.inject_acl(CONN, &att_frame(&[0x52, ro[0], ro[1], 0x01])).await;

        let wr = writable.handle().to_le_bytes();
        controller.inject_acl(CONN, &att_frame(&[0x12, wr[0], wr[1], 0x2a])).await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.payload, vec![0x13]);

        // The accepted write is the first and only event.
        assert_eq!(
            server.next_event().await,
            GattEvent::Write {
                connection: CONN,
                handle: writable.handle()
            }
        );
        assert!(rx.try_recv().is_err());
    };

    let run = tokio::time::timeout(Duration::from_secs(10), async {
        select! {
            _ = host.run() => panic!("host stopped"),
            _ = controller_task(&controller, tx) => panic!("controller stopped"),
            _ = server.run() => panic!("server stopped"),
            _ = test => {}
        }
    });
    run.await.unwrap();
}
