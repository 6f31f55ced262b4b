//! Common types shared by the manager, drivers and transports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walrus_card::CardTechnology;
use walrus_core::{ConnectionState, DeviceId, UsbIdentity};

/// Something a reader can do besides identifying itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Capability {
    /// Scan a presented card.
    Read,

    /// Write to a writable tag.
    Write,

    /// Emulate a card towards another reader.
    Emulate,
}

/// Static and handshake-reported information about a reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    /// Display name (e.g., "Chameleon Mini").
    pub name: String,

    pub vendor_id: u16,

    pub product_id: u16,

    /// Serial number, if the device reports one.
    pub serial_number: Option<String>,

    /// Firmware version as reported during the handshake.
    pub firmware_version: Option<String>,

    pub capabilities: Vec<Capability>,

    /// Card technologies the reader can scan.
    pub technologies: Vec<CardTechnology>,
}

impl DeviceMetadata {
    /// Create metadata for a device identity.
    pub fn new(name: impl Into<String>, identity: &UsbIdentity) -> Self {
        Self {
            name: name.into(),
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
            serial_number: identity.serial_number.clone(),
            firmware_version: None,
            capabilities: Vec::new(),
            technologies: Vec::new(),
        }
    }

    /// Set the firmware version.
    pub fn with_firmware_version(mut self, firmware_version: impl Into<String>) -> Self {
        self.firmware_version = Some(firmware_version.into());
        self
    }

    /// Set the capabilities.
    pub fn with_capabilities(mut self, capabilities: &[Capability]) -> Self {
        self.capabilities = capabilities.to_vec();
        self
    }

    /// Set the scannable technologies.
    pub fn with_technologies(mut self, technologies: &[CardTechnology]) -> Self {
        self.technologies = technologies.to_vec();
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// A USB attach or detach notification from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbEvent {
    pub identity: UsbIdentity,
    pub added: bool,
}

impl UsbEvent {
    pub fn attached(identity: UsbIdentity) -> Self {
        Self {
            identity,
            added: true,
        }
    }

    pub fn detached(identity: UsbIdentity) -> Self {
        Self {
            identity,
            added: false,
        }
    }
}

/// Broadcast when a device becomes connected or is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityEvent {
    pub device_id: DeviceId,

    /// Display name of the device.
    pub device_name: String,

    /// `true` when added, `false` when removed.
    pub added: bool,

    pub at: DateTime<Utc>,
}

impl ConnectivityEvent {
    pub fn added(device_id: DeviceId, device_name: impl Into<String>) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            added: true,
            at: Utc::now(),
        }
    }

    pub fn removed(device_id: DeviceId, device_name: impl Into<String>) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            added: false,
            at: Utc::now(),
        }
    }
}

/// Snapshot of a registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub identity: UsbIdentity,
    pub state: ConnectionState,
    pub metadata: DeviceMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> UsbIdentity {
        UsbIdentity::new(0x16D0, 0x04B2, "/dev/ttyACM0").with_serial_number("CM-01")
    }

    #[test]
    fn test_metadata_builder() {
        let metadata = DeviceMetadata::new("Chameleon Mini", &identity())
            .with_firmware_version("ChameleonMini RevE 180402")
            .with_capabilities(&[Capability::Read, Capability::Emulate])
            .with_technologies(&[CardTechnology::Em, CardTechnology::Hid]);

        assert_eq!(metadata.vendor_id, 0x16D0);
        assert_eq!(metadata.serial_number.as_deref(), Some("CM-01"));
        assert_eq!(
            metadata.firmware_version.as_deref(),
            Some("ChameleonMini RevE 180402")
        );
        assert!(metadata.has_capability(Capability::Emulate));
        assert!(!metadata.has_capability(Capability::Write));
    }

    #[test]
    fn test_usb_event_constructors() {
        assert!(UsbEvent::attached(identity()).added);
        assert!(!UsbEvent::detached(identity()).added);
    }

    #[test]
    fn test_connectivity_event_serialization() {
        let event = ConnectivityEvent::removed(DeviceId::new(2), "Prox Reader");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["device_id"], 2);
        assert_eq!(json["device_name"], "Prox Reader");
        assert_eq!(json["added"], false);

        let back: ConnectivityEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_device_record_serialization() {
        let record = DeviceRecord {
            id: DeviceId::new(1),
            identity: identity(),
            state: ConnectionState::Connected,
            metadata: DeviceMetadata::new("Chameleon Mini", &identity()),
        };
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["state"], "Connected");
        assert_eq!(json["identity"]["path"], "/dev/ttyACM0");
        assert_eq!(json["metadata"]["technologies"], serde_json::json!([]));
    }
}
