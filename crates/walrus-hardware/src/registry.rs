//! Device type identification.
//!
//! A [`DeviceRegistry`] maps a USB (vendor id, product id) pair to the
//! [`DeviceDescriptor`] of the driver that handles it. The manager looks up
//! every attached identity here; identities with no descriptor are ignored.
//!
//! ```
//! use walrus_hardware::registry::DeviceRegistry;
//! use walrus_core::constants::{CHAMELEON_MINI_PID, CHAMELEON_MINI_VID};
//!
//! let registry = DeviceRegistry::with_defaults();
//! let descriptor = registry.find(CHAMELEON_MINI_VID, CHAMELEON_MINI_PID).unwrap();
//! assert_eq!(descriptor.name, "Chameleon Mini");
//! assert!(registry.find(0x1234, 0x5678).is_none());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use walrus_card::DecoderRegistry;
use walrus_core::constants::{
    CHAMELEON_MINI_PID, CHAMELEON_MINI_VID, PROX_READER_PID, PROX_READER_VID,
};
use walrus_core::{SessionConfig, UsbIdentity};

use crate::Result;
use crate::devices::{AnyCardDevice, ChameleonMini, ProxReader};
use crate::traits::BoxedChannel;
use crate::types::Capability;

/// Everything a driver needs to open and identify a reader.
pub struct DeviceContext {
    pub identity: UsbIdentity,

    /// Raw channel opened by the transport.
    pub channel: BoxedChannel,

    pub decoders: Arc<DecoderRegistry>,

    pub session: SessionConfig,

    /// Bound on the whole handshake.
    pub handshake_timeout: Duration,
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("identity", &self.identity)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

/// Opens the session and performs the handshake.
pub type DeviceFactory = fn(DeviceContext) -> BoxFuture<'static, Result<AnyCardDevice>>;

/// A reader type the manager can identify.
#[derive(Clone)]
pub struct DeviceDescriptor {
    /// Display name, used in logs and connectivity events.
    pub name: &'static str,
    pub vendor_id: u16,
    pub product_id: u16,
    pub capabilities: &'static [Capability],
    pub factory: DeviceFactory,
}

impl DeviceDescriptor {
    pub fn chameleon_mini() -> Self {
        Self {
            name: ChameleonMini::NAME,
            vendor_id: CHAMELEON_MINI_VID,
            product_id: CHAMELEON_MINI_PID,
            capabilities: ChameleonMini::CAPABILITIES,
            factory: |ctx| {
                async move { ChameleonMini::connect(ctx).await.map(AnyCardDevice::from) }.boxed()
            },
        }
    }

    pub fn prox_reader() -> Self {
        Self {
            name: ProxReader::NAME,
            vendor_id: PROX_READER_VID,
            product_id: PROX_READER_PID,
            capabilities: ProxReader::CAPABILITIES,
            factory: |ctx| async move { ProxReader::connect(ctx).await.map(AnyCardDevice::from) }.boxed(),
        }
    }

    /// Run the factory.
    pub async fn connect(&self, ctx: DeviceContext) -> Result<AnyCardDevice> {
        (self.factory)(ctx).await
    }
}

impl fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("name", &self.name)
            .field("vendor_id", &format_args!("{:#06x}", self.vendor_id))
            .field("product_id", &format_args!("{:#06x}", self.product_id))
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Reader types keyed by (vendor id, product id).
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    descriptors: HashMap<(u16, u16), DeviceDescriptor>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled drivers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(DeviceDescriptor::chameleon_mini())
            .register(DeviceDescriptor::prox_reader());
        registry
    }

    /// Register a descriptor, replacing any previous one for the same ids.
    pub fn register(&mut self, descriptor: DeviceDescriptor) -> &mut Self {
        self.descriptors
            .insert((descriptor.vendor_id, descriptor.product_id), descriptor);
        self
    }

    pub fn find(&self, vendor_id: u16, product_id: u16) -> Option<&DeviceDescriptor> {
        self.descriptors.get(&(vendor_id, product_id))
    }

    /// Descriptor for an attached identity, if its type is known.
    pub fn identify(&self, identity: &UsbIdentity) -> Option<&DeviceDescriptor> {
        let (vendor_id, product_id) = identity.usb_id();
        self.find(vendor_id, product_id)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
