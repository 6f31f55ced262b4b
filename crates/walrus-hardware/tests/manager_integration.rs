//! Manager lifecycle tests against the mock transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use walrus_card::DecoderRegistry;
use walrus_core::constants::{
    CHAMELEON_MINI_PID, CHAMELEON_MINI_VID, PROX_READER_PID, PROX_READER_VID,
};
use walrus_core::{ConnectionState, DeviceId, UsbIdentity, WalrusConfig};
use walrus_hardware::mock::{MockReader, MockTransport};
use walrus_hardware::{
    CardDeviceManager, ConnectivityEvent, DeviceRegistry, HardwareError, UsbEvent,
};

const READ: Duration = Duration::from_millis(500);

fn chameleon() -> UsbIdentity {
    UsbIdentity::new(CHAMELEON_MINI_VID, CHAMELEON_MINI_PID, "/dev/ttyACM0")
}

fn prox() -> UsbIdentity {
    UsbIdentity::new(PROX_READER_VID, PROX_READER_PID, "/dev/ttyUSB0")
}

fn keyboard() -> UsbIdentity {
    UsbIdentity::new(0x046D, 0xC31C, "/dev/hidraw0")
}

fn manager(transport: &MockTransport) -> CardDeviceManager {
    CardDeviceManager::new(
        Arc::new(transport.clone()),
        DeviceRegistry::with_defaults(),
        DecoderRegistry::with_defaults(),
        WalrusConfig::default(),
    )
}

async fn next_event(events: &mut broadcast::Receiver<ConnectivityEvent>) -> ConnectivityEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

fn assert_no_event(events: &mut broadcast::Receiver<ConnectivityEvent>) {
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn test_unknown_device_is_ignored() {
    let transport = MockTransport::new();
    transport.attach(keyboard(), MockReader::new(walrus_protocol::Charset::Ascii));
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    assert!(manager.scan_for_devices().await.unwrap().is_empty());
    assert!(manager.attach(keyboard()).await.is_none());
    manager.handle_usb_event(UsbEvent::attached(keyboard())).await.unwrap();

    assert_eq!(manager.device_count(), 0);
    assert_eq!(manager.state(DeviceId::new(1)), ConnectionState::Unknown);
    assert_no_event(&mut events);
}

#[tokio::test]
async fn test_scan_connects_known_devices() {
    let transport = MockTransport::new();
    transport.attach(chameleon(), MockReader::chameleon_mini());
    transport.attach(prox(), MockReader::prox_reader());
    transport.attach(keyboard(), MockReader::new(walrus_protocol::Charset::Ascii));
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    let ids = manager.scan_for_devices().await.unwrap();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    let mut names: Vec<_> = manager
        .devices()
        .into_iter()
        .map(|record| {
            assert_eq!(record.state, ConnectionState::Connected);
            record.metadata.name
        })
        .collect();
    names.sort();
    assert_eq!(names, vec!["Chameleon Mini", "Prox Reader"]);

    for _ in 0..2 {
        assert!(next_event(&mut events).await.added);
    }

    // Already connected devices are not identified again.
    assert!(manager.scan_for_devices().await.unwrap().is_empty());
    assert_no_event(&mut events);
}

#[tokio::test]
async fn test_attach_then_immediate_detach_registers_nothing() {
    let transport = MockTransport::new();
    transport.attach(
        prox(),
        MockReader::prox_reader().with_delay(Duration::from_millis(100)),
    );
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    let attach = manager.handle_usb_event(UsbEvent::attached(prox()));
    let detach = manager.handle_usb_event(UsbEvent::detached(prox()));
    attach.await.unwrap();
    detach.await.unwrap();

    assert_eq!(manager.device_count(), 0);
    assert_ne!(manager.state(DeviceId::new(1)), ConnectionState::Connected);
    assert_no_event(&mut events);
}

#[tokio::test]
async fn test_detach_during_identification_cancels_it() {
    let transport = MockTransport::new();
    transport.attach(
        prox(),
        MockReader::prox_reader().with_delay(Duration::from_millis(200)),
    );
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    let attach = manager.handle_usb_event(UsbEvent::attached(prox()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.state(DeviceId::new(1)), ConnectionState::Identifying);

    manager.handle_usb_event(UsbEvent::detached(prox())).await.unwrap();
    attach.await.unwrap();

    assert_eq!(manager.device_count(), 0);
    assert_eq!(manager.state(DeviceId::new(1)), ConnectionState::Disconnected);
    assert_no_event(&mut events);
}

#[tokio::test]
async fn test_concurrent_attach_and_independent_detach() {
    let transport = MockTransport::new();
    transport.attach(chameleon(), MockReader::chameleon_mini());
    transport.attach(prox(), MockReader::prox_reader());
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    let (first, second) = tokio::join!(manager.attach(chameleon()), manager.attach(prox()));
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_ne!(first, second);
    next_event(&mut events).await;
    next_event(&mut events).await;

    transport.detach(&chameleon());
    assert!(manager.detach(chameleon()).await);

    let removed = next_event(&mut events).await;
    assert_eq!(removed.device_id, first);
    assert_eq!(removed.device_name, "Chameleon Mini");
    assert!(!removed.added);

    assert_eq!(manager.state(first), ConnectionState::Disconnected);
    assert_eq!(manager.state(second), ConnectionState::Connected);
    assert!(manager.read_card(second, READ).await.is_ok());
}

#[tokio::test]
async fn test_reattach_reuses_id() {
    let transport = MockTransport::new();
    transport.attach(prox(), MockReader::prox_reader());
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    let id = manager.attach(prox()).await.unwrap();
    assert!(manager.detach(prox()).await);
    let again = manager.attach(prox()).await.unwrap();

    assert_eq!(id, again);
    assert_eq!(manager.state(id), ConnectionState::Connected);

    let sequence: Vec<bool> = vec![
        next_event(&mut events).await.added,
        next_event(&mut events).await.added,
        next_event(&mut events).await.added,
    ];
    assert_eq!(sequence, vec![true, false, true]);
}

#[tokio::test]
async fn test_read_card() {
    let transport = MockTransport::new();
    transport.attach(chameleon(), MockReader::chameleon_mini());
    let manager = manager(&transport);

    let id = manager.attach(chameleon()).await.unwrap();
    let card = manager.read_card(id, READ).await.unwrap();

    assert_eq!(card.to_string(), "EM 0F0012D687");
    assert_eq!(card.to_record().fields["unique_id"], "1234567");
}

#[tokio::test]
async fn test_recoverable_errors_keep_device() {
    let transport = MockTransport::new();
    let reader = transport.attach(prox(), MockReader::prox_reader());
    let manager = manager(&transport);
    let mut events = manager.subscribe();
    let id = manager.attach(prox()).await.unwrap();
    next_event(&mut events).await;

    reader.clear_reply("READ");
    let err = manager
        .read_card(id, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, HardwareError::Timeout { .. }));

    reader.set_reply("READ", ["AWID 0102"]);
    let err = manager.read_card(id, READ).await.unwrap_err();
    assert!(matches!(err, HardwareError::Decode(_)));

    reader.set_reply("READ", ["ERR NO CARD"]);
    let err = manager.read_card(id, READ).await.unwrap_err();
    assert!(matches!(err, HardwareError::InvalidData { .. }));

    assert_eq!(manager.state(id), ConnectionState::Connected);
    assert_eq!(manager.device_count(), 1);
    assert_no_event(&mut events);
}

#[tokio::test]
async fn test_fatal_error_tears_down() {
    let transport = MockTransport::new();
    let reader = transport.attach(chameleon(), MockReader::chameleon_mini());
    let manager = manager(&transport);
    let mut events = manager.subscribe();
    let id = manager.attach(chameleon()).await.unwrap();
    next_event(&mut events).await;

    reader.hang_up();
    let err = manager.read_card(id, READ).await.unwrap_err();
    assert!(err.is_fatal());

    let removed = next_event(&mut events).await;
    assert_eq!(removed.device_id, id);
    assert!(!removed.added);
    assert_eq!(manager.state(id), ConnectionState::Disconnected);
    assert!(manager.device(id).is_none());
}

#[tokio::test]
async fn test_detach_fails_pending_read() {
    let transport = MockTransport::new();
    let reader = transport.attach(prox(), MockReader::prox_reader());
    let manager = manager(&transport);
    let mut events = manager.subscribe();
    let id = manager.attach(prox()).await.unwrap();
    next_event(&mut events).await;

    reader.clear_reply("READ");
    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.read_card(id, Duration::from_secs(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    manager.handle_usb_event(UsbEvent::detached(prox())).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("read should fail promptly")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, HardwareError::Disconnected { .. }));

    assert!(!next_event(&mut events).await.added);
    assert_no_event(&mut events);
}

#[tokio::test]
async fn test_read_unknown_device() {
    let manager = manager(&MockTransport::new());
    let err = manager
        .read_card(DeviceId::new(7), READ)
        .await
        .unwrap_err();
    assert!(matches!(err, HardwareError::UnknownDevice(id) if id == DeviceId::new(7)));
}

#[tokio::test]
async fn test_run_consumes_notifications() {
    let transport = MockTransport::new();
    transport.attach(prox(), MockReader::prox_reader());
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    let (tx, rx) = mpsc::channel(8);
    let runner = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.run(rx).await })
    };

    tx.send(UsbEvent::attached(prox())).await.unwrap();
    let added = next_event(&mut events).await;
    assert!(added.added);
    assert_eq!(added.device_name, "Prox Reader");

    tx.send(UsbEvent::detached(prox())).await.unwrap();
    assert!(!next_event(&mut events).await.added);

    drop(tx);
    runner.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_removes_all() {
    let transport = MockTransport::new();
    transport.attach(chameleon(), MockReader::chameleon_mini());
    transport.attach(prox(), MockReader::prox_reader());
    let manager = manager(&transport);
    let mut events = manager.subscribe();

    manager.scan_for_devices().await.unwrap();
    next_event(&mut events).await;
    next_event(&mut events).await;

    manager.shutdown().await;

    assert_eq!(manager.device_count(), 0);
    assert!(!next_event(&mut events).await.added);
    assert!(!next_event(&mut events).await.added);

    manager.handle_usb_event(UsbEvent::attached(prox())).await.unwrap();
    assert_eq!(manager.device_count(), 0);
    assert_no_event(&mut events);
}
