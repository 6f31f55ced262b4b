//! Card reader management for the Walrus reader core.
//!
//! This crate connects the framing layer (`walrus-protocol`) and the card
//! model (`walrus-card`) to physical readers:
//!
//! - [`traits`]: the [`CardDevice`] and [`UsbTransport`] seams
//! - [`devices`]: bundled drivers behind the [`AnyCardDevice`] enum
//! - [`registry`]: (vendor id, product id) to driver lookup
//! - [`manager`]: the [`CardDeviceManager`] attach/detach state machine
//! - [`monitor`]: polling hotplug detection
//! - [`mock`]: simulated readers for development and tests
//!
//! With the `hardware-serial` feature, `serial::SerialPortTransport`
//! exposes real USB serial ports.
//!
//! # Reading a card
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use walrus_card::DecoderRegistry;
//! use walrus_core::{UsbIdentity, WalrusConfig};
//! use walrus_core::constants::{PROX_READER_PID, PROX_READER_VID};
//! use walrus_hardware::mock::{MockReader, MockTransport};
//! use walrus_hardware::{CardDeviceManager, DeviceRegistry};
//!
//! #[tokio::main]
//! async fn main() -> walrus_hardware::Result<()> {
//!     let transport = MockTransport::new();
//!     let identity = UsbIdentity::new(PROX_READER_VID, PROX_READER_PID, "/dev/ttyUSB0");
//!     let _reader = transport.attach(identity, MockReader::prox_reader());
//!
//!     let manager = CardDeviceManager::new(
//!         Arc::new(transport),
//!         DeviceRegistry::with_defaults(),
//!         DecoderRegistry::with_defaults(),
//!         WalrusConfig::default(),
//!     );
//!
//!     let ids = manager.scan_for_devices().await?;
//!     let card = manager.read_card(ids[0], Duration::from_secs(1)).await?;
//!     assert_eq!(card.summary(), "FC 81 CN 57593 (26-bit)");
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod devices;
pub mod error;
pub mod manager;
pub mod mock;
pub mod monitor;
pub mod registry;
#[cfg(feature = "hardware-serial")]
pub mod serial;
pub mod traits;
pub mod types;

pub use devices::AnyCardDevice;
pub use error::{HardwareError, Result};
pub use manager::CardDeviceManager;
pub use monitor::UsbMonitor;
pub use registry::{DeviceContext, DeviceDescriptor, DeviceRegistry};
pub use traits::{BoxedChannel, CardDevice, SerialChannel, UsbTransport};
pub use types::{Capability, ConnectivityEvent, DeviceMetadata, DeviceRecord, UsbEvent};

#[cfg(feature = "hardware-serial")]
pub use serial::SerialPortTransport;
