use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walrus_card::DecoderRegistry;
use walrus_core::constants::{
    CHAMELEON_MINI_PID, CHAMELEON_MINI_VID, PROX_READER_PID, PROX_READER_VID,
};
use walrus_core::{DeviceId, UsbIdentity, WalrusConfig};
use walrus_hardware::mock::{MockReader, MockTransport};
use walrus_hardware::{CardDeviceManager, DeviceRegistry, UsbMonitor, UsbTransport};

/// Transport for this run: simulated readers or real serial ports.
pub fn transport(mock: bool, config: &WalrusConfig) -> Result<Arc<dyn UsbTransport>> {
    if mock {
        info!("Using simulated readers");
        return Ok(Arc::new(mock_transport()));
    }
    serial_transport(config)
}

#[cfg(feature = "hardware-serial")]
fn serial_transport(config: &WalrusConfig) -> Result<Arc<dyn UsbTransport>> {
    Ok(Arc::new(walrus_hardware::SerialPortTransport::new(
        config.serial.baud_rate,
    )))
}

#[cfg(not(feature = "hardware-serial"))]
fn serial_transport(_config: &WalrusConfig) -> Result<Arc<dyn UsbTransport>> {
    bail!("built without serial port support; rebuild with --features hardware-serial or pass --mock")
}

/// A bus with one of each bundled reader.
pub fn mock_transport() -> MockTransport {
    let transport = MockTransport::new();
    transport.attach(
        UsbIdentity::new(CHAMELEON_MINI_VID, CHAMELEON_MINI_PID, "mock://chameleon")
            .with_serial_number("CM-0001"),
        MockReader::chameleon_mini(),
    );
    transport.attach(
        UsbIdentity::new(PROX_READER_VID, PROX_READER_PID, "mock://prox"),
        MockReader::prox_reader(),
    );
    transport
}

pub fn manager(transport: Arc<dyn UsbTransport>, config: WalrusConfig) -> CardDeviceManager {
    CardDeviceManager::new(
        transport,
        DeviceRegistry::with_defaults(),
        DecoderRegistry::with_defaults(),
        config,
    )
}

pub async fn list(manager: &CardDeviceManager) -> Result<()> {
    manager.scan_for_devices().await?;

    let devices = manager.devices();
    if devices.is_empty() {
        println!("No card readers found");
        return Ok(());
    }

    println!("Found {} card reader(s):", devices.len());
    for device in devices {
        println!("  {} {} at {}", device.id, device.metadata.name, device.identity);
        if let Some(firmware) = &device.metadata.firmware_version {
            println!("    Firmware: {firmware}");
        }
    }
    Ok(())
}

pub async fn read(manager: &CardDeviceManager, device: Option<DeviceId>, timeout: Duration) -> Result<()> {
    let connected = manager.scan_for_devices().await?;

    let id = match device {
        Some(id) => id,
        None => match connected.first() {
            Some(id) => *id,
            None => bail!("no card reader connected"),
        },
    };

    let card = manager
        .read_card(id, timeout)
        .await
        .with_context(|| format!("failed to read a card from {id}"))?;

    println!("{}", serde_json::to_string_pretty(&card.to_record())?);
    Ok(())
}

pub async fn watch(manager: &CardDeviceManager) -> Result<()> {
    let mut events = manager.subscribe();
    let (tx, rx) = mpsc::channel(manager.config().manager.event_capacity);
    let cancel = CancellationToken::new();

    let monitor = UsbMonitor::new(manager.transport(), manager.config().manager.poll_interval());
    let monitor = tokio::spawn(monitor.run(tx, cancel.clone()));
    let runner = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.run(rx).await })
    };

    info!("Watching for card readers, press Ctrl-C to stop");
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed connectivity events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    monitor.await?;
    runner.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_list_and_read() {
        let manager = manager(Arc::new(mock_transport()), WalrusConfig::default());

        list(&manager).await.unwrap();
        assert_eq!(manager.device_count(), 2);

        read(&manager, None, Duration::from_secs(1)).await.unwrap();
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_read_unknown_device_fails() {
        let manager = manager(Arc::new(mock_transport()), WalrusConfig::default());

        let err = read(&manager, Some(DeviceId::new(9)), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("#9"));
    }

    #[cfg(not(feature = "hardware-serial"))]
    #[test]
    fn test_serial_requires_feature() {
        assert!(transport(false, &WalrusConfig::default()).is_err());
    }
}
