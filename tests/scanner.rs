use std::time::Duration;

use ble_host::connection::ScanConfig;
use ble_host::hci::{AddrKind, BdAddr};
use ble_host::mock_controller::MockController;
use ble_host::BleHost;
use tokio::select;
use tokio::sync::mpsc;

mod common;

use common::controller_task;

// Must exceed config::SCAN_QUEUE_SIZE.
const REPORTS: u8 = 7;
const QUEUE_DEPTH: u8 = 4;

fn addr(i: u8) -> BdAddr {
    BdAddr::new([i, 0, 0, 0, 0, 0xc0])
}

#[tokio::test]
async fn slow_consumer_drops_reports_in_order() {
    common::setup();

    let controller = MockController::new();
    let host = BleHost::new(&controller);
    let (tx, _rx) = mpsc::unbounded_channel();

    let test = async {
        let mut scanner = host.scanner(&ScanConfig::default()).await.unwrap();

        for i in 0..REPORTS {
            controller
                .advertising_report(AddrKind::PUBLIC, addr(i), &[0x02, 0x01, 0x06], -50)
                .await;
        }

        // The queue holds the oldest reports, the overflow is counted.
        while scanner.dropped() != (REPORTS - QUEUE_DEPTH) as u32 {
            tokio::task::yield_now().await;
        }
        for i in 0..QUEUE_DEPTH {
            let report = scanner.next().await;
            assert_eq!(report.addr, addr(i));
            assert_eq!(report.rssi, -50);
            assert_eq!(report.data(), &[0x02, 0x01, 0x06]);
        }

        scanner.stop().await.unwrap();
    };

    let run = tokio::time::timeout(Duration::from_secs(10), async {
        select! {
            _ = host.run() => panic!("host stopped"),
            _ = controller_task(&controller, tx) => panic!("controller stopped"),
            _ = test => {}
        }
    });
    run.await.unwrap();
}

#[tokio::test]
async fn reports_stop_after_scanner_drop() {
    common::setup();

    let controller = MockController::new();
    let host = BleHost::new(&controller);
    let (tx, _rx) = mpsc::unbounded_channel();

    let test = async {
        let mut scanner = host.scanner(&ScanConfig::default()).await.unwrap();
        controller
            .advertising_report(AddrKind::PUBLIC, addr(1), &[0x02, 0x01, 0x06], -44)
            .await;
        let report = scanner.next().await;
        assert_eq!(report.addr, addr(1));
        drop(scanner);

        // Reports arriving after the scanner is gone are discarded, a
        // fresh session starts with an empty queue and a zero counter.
        controller
            .advertising_report(AddrKind::PUBLIC, addr(2), &[], -44)
            .await;
        tokio::task::yield_now().await;

        let mut scanner = host.scanner(&ScanConfig::default()).await.unwrap();
        assert_eq!(scanner.dropped(), 0);
        controller
            .advertising_report(AddrKind::PUBLIC, addr(3), &[], -44)
            .await;
        let report = scanner.next().await;
        assert_eq!(report.addr, addr(3));
        scanner.stop().await.unwrap();
    };

    let run = tokio::time::timeout(Duration::from_secs(10), async {
        select! {
            _ = host.run() => panic!("host stopped"),
            _ = controller_task(&controller, tx) => panic!("controller stopped"),
            _ = test => {}
        }
    });
    run.await.unwrap();
}
