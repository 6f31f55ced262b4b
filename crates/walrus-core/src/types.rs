use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Manager-assigned device identifier.
///
/// Unique among the devices currently attached. An identity that is detached
/// and attached again gets the same id back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Create a device id from its raw value.
    #[must_use]
    pub fn new(id: u32) -> Self {
        DeviceId(id)
    }

    /// Get the raw id.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.strip_prefix('#').unwrap_or(s);
        raw.parse()
            .map(DeviceId)
            .map_err(|_| Error::InvalidIdentity(format!("Invalid device id: {s}")))
    }
}

/// Identity of a USB device as reported by the transport.
///
/// This is the key used to correlate attach and detach notifications with
/// the device they refer to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbIdentity {
    /// USB vendor id.
    pub vendor_id: u16,

    /// USB product id.
    pub product_id: u16,

    /// Serial number string, if the device reports one.
    pub serial_number: Option<String>,

    /// Transport path (e.g. `/dev/ttyACM0` or a bus/port address).
    pub path: String,
}

impl UsbIdentity {
    /// Create a new identity without a serial number.
    pub fn new(vendor_id: u16, product_id: u16, path: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            serial_number: None,
            path: path.into(),
        }
    }

    /// Set the serial number.
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// The (vendor id, product id) pair used to look up a device type.
    #[must_use]
    pub fn usb_id(&self) -> (u16, u16) {
        (self.vendor_id, self.product_id)
    }
}

impl fmt::Display for UsbIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x}@{}",
            self.vendor_id, self.product_id, self.path
        )?;
        if let Some(serial) = &self.serial_number {
            write!(f, " ({serial})")?;
        }
        Ok(())
    }
}

/// Connection state of a device id.
///
/// ```text
/// Unknown ──> Identifying ──> Connected ──> Disconnected
///                  │                             ^
///                  └─────────────────────────────┘
///                    identification failed/cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Never seen by the manager.
    Unknown,
    /// Matched a device type, handshake in progress.
    Identifying,
    /// Session open and registered.
    Connected,
    /// Torn down. Terminal for this attachment.
    Disconnected,
}

impl ConnectionState {
    /// Returns `true` if the transition `self -> next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Unknown, Identifying)
                | (Identifying, Connected)
                | (Identifying, Disconnected)
                | (Connected, Disconnected)
                // a reattached identity starts identifying again under its old id
                | (Disconnected, Identifying)
        )
    }

    /// Perform a checked transition.
    ///
    /// # Errors
    /// Returns `Error::InvalidStateTransition` if the transition is not part
    /// of the state machine.
    pub fn transition(self, next: ConnectionState) -> Result<ConnectionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Returns `true` if the state is `Connected`.
    #[inline]
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Unknown => write!(f, "Unknown"),
            ConnectionState::Identifying => write!(f, "Identifying"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("7", 7)]
    #[case("#7", 7)]
    #[case("4000000000", 4_000_000_000)]
    fn test_device_id_parse(#[case] input: &str, #[case] expected: u32) {
        let id: DeviceId = input.parse().unwrap();
        assert_eq!(id.as_u32(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("abc")]
    #[case("-1")]
    fn test_device_id_invalid(#[case] input: &str) {
        let result: Result<DeviceId> = input.parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_device_id_display() {
        assert_eq!(DeviceId::new(3).to_string(), "#3");
    }

    #[test]
    fn test_usb_identity_display() {
        let identity = UsbIdentity::new(0x16D0, 0x04B2, "/dev/ttyACM0");
        assert_eq!(identity.to_string(), "16d0:04b2@/dev/ttyACM0");

        let identity = identity.with_serial_number("A1B2");
        assert_eq!(identity.to_string(), "16d0:04b2@/dev/ttyACM0 (A1B2)");
        assert_eq!(identity.usb_id(), (0x16D0, 0x04B2));
    }

    #[rstest]
    #[case(ConnectionState::Unknown, ConnectionState::Identifying)]
    #[case(ConnectionState::Identifying, ConnectionState::Connected)]
    #[case(ConnectionState::Identifying, ConnectionState::Disconnected)]
    #[case(ConnectionState::Connected, ConnectionState::Disconnected)]
    #[case(ConnectionState::Disconnected, ConnectionState::Identifying)]
    fn test_state_valid_transitions(#[case] from: ConnectionState, #[case] to: ConnectionState) {
        assert_eq!(from.transition(to).unwrap(), to);
    }

    #[rstest]
    #[case(ConnectionState::Unknown, ConnectionState::Connected)]
    #[case(ConnectionState::Connected, ConnectionState::Identifying)]
    #[case(ConnectionState::Disconnected, ConnectionState::Connected)]
    #[case(ConnectionState::Connected, ConnectionState::Connected)]
    fn test_state_invalid_transitions(#[case] from: ConnectionState, #[case] to: ConnectionState) {
        let err = from.transition(to).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_state_serialization() {
        let value = toml::Value::try_from(ConnectionState::Connected).unwrap();
        assert_eq!(value.as_str(), Some("Connected"));
    }
}
