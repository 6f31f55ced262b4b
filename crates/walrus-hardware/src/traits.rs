//! Core traits for card readers and the USB transport.
//!
//! `CardDevice` uses native `async fn` methods, so it is not object-safe.
//! The manager dispatches through [`AnyCardDevice`](crate::devices::AnyCardDevice)
//! instead of `Box<dyn CardDevice>`.
//!
//! [`UsbTransport`] is object-safe: it only enumerates and opens channels,
//! and the manager holds it as `Arc<dyn UsbTransport>`.

#![allow(async_fn_in_trait)]

use std::time::Duration;

use walrus_card::CardData;
use walrus_core::UsbIdentity;
use walrus_protocol::SessionCloseHandle;

use crate::Result;
use crate::types::DeviceMetadata;

pub use walrus_protocol::{BoxedChannel, SerialChannel};

/// Source of attached USB identities and their byte channels.
pub trait UsbTransport: Send + Sync {
    /// List the identities currently attached.
    ///
    /// # Errors
    /// Returns `HardwareError::Io` or `Connection` if the bus cannot be read.
    fn enumerate(&self) -> Result<Vec<UsbIdentity>>;

    /// Open a raw channel to an attached device.
    ///
    /// # Errors
    /// Returns `HardwareError::Connection` if the device cannot be opened.
    fn open(&self, identity: &UsbIdentity) -> Result<BoxedChannel>;
}

/// A connected card reader.
///
/// A value of this type exists only after its handshake succeeded; drivers
/// open the session and identify the reader in their constructor.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use walrus_hardware::traits::CardDevice;
/// use walrus_hardware::Result;
///
/// async fn scan_summary<D: CardDevice>(device: &mut D) -> Result<String> {
///     let card = device.scan_for_card(Duration::from_secs(5)).await?;
///     Ok(card.summary())
/// }
/// ```
pub trait CardDevice: Send {
    /// Static and handshake-reported information about the reader.
    fn metadata(&self) -> &DeviceMetadata;

    /// Handle that closes the reader's session without borrowing the device.
    ///
    /// Closing through the handle makes a pending `scan_for_card` fail with
    /// `Disconnected`.
    fn close_handle(&self) -> SessionCloseHandle;

    /// Ask the reader for the card in its field.
    ///
    /// # Errors
    /// - `Timeout` if the reader did not answer in time
    /// - `Decode` if the payload does not decode for the reported technology
    /// - `InvalidData` if the reader rejected the command
    /// - `Disconnected` if the session was closed
    async fn scan_for_card(&mut self, timeout: Duration) -> Result<Box<dyn CardData>>;

    /// Close the reader's session. Idempotent.
    async fn close(&mut self) -> Result<()>;
}
