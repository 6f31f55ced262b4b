//! USB serial ports as a [`UsbTransport`].
//!
//! Enumeration lists the ports `serialport` reports as USB ports, with the
//! port name as the identity path. Opening a port yields a `tokio-serial`
//! stream, which must happen inside a Tokio runtime.

use serialport::SerialPortType;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;
use walrus_core::UsbIdentity;
use walrus_core::constants::DEFAULT_BAUD_RATE;

use crate::traits::{BoxedChannel, UsbTransport};
use crate::{HardwareError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialPortTransport {
    baud_rate: u32,
}

impl SerialPortTransport {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl Default for SerialPortTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl UsbTransport for SerialPortTransport {
    fn enumerate(&self) -> Result<Vec<UsbIdentity>> {
        let ports = serialport::available_ports().map_err(|e| {
            HardwareError::connection(format!("failed to enumerate serial ports: {e}"))
        })?;

        let mut identities: Vec<UsbIdentity> = ports
            .into_iter()
            .filter_map(|info| match info.port_type {
                SerialPortType::UsbPort(usb) => {
                    let identity = UsbIdentity::new(usb.vid, usb.pid, info.port_name);
                    Some(match usb.serial_number {
                        Some(serial) => identity.with_serial_number(serial),
                        None => identity,
                    })
                }
                _ => None,
            })
            .collect();
        identities.sort_by(|a, b| a.path.cmp(&b.path));

        debug!(count = identities.len(), "Enumerated USB serial ports");
        Ok(identities)
    }

    fn open(&self, identity: &UsbIdentity) -> Result<BoxedChannel> {
        let stream = tokio_serial::new(identity.path.as_str(), self.baud_rate)
            .open_native_async()
            .map_err(|e| {
                HardwareError::connection(format!("failed to open {}: {e}", identity.path))
            })?;
        debug!(path = %identity.path, baud_rate = self.baud_rate, "Serial port opened");
        Ok(Box::new(stream))
    }
}
