//! Bundled card reader drivers and the enum used to dispatch to them.
//!
//! `CardDevice` has native `async fn` methods and cannot be boxed, so the
//! manager holds readers as [`AnyCardDevice`]. Adding a driver means adding a
//! variant here and a descriptor in [`DeviceRegistry`](crate::registry::DeviceRegistry).

mod chameleon;
mod prox;

use std::time::Duration;

use tokio::time::Instant;
use walrus_card::CardData;
use walrus_protocol::{LineSession, ProtocolError, SessionCloseHandle};

use crate::traits::CardDevice;
use crate::types::DeviceMetadata;
use crate::{HardwareError, Result};

pub use chameleon::ChameleonMini;
pub use prox::ProxReader;

/// Enum wrapper for card reader dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyCardDevice {
    ChameleonMini(ChameleonMini),
    ProxReader(ProxReader),
}

impl CardDevice for AnyCardDevice {
    fn metadata(&self) -> &DeviceMetadata {
        match self {
            Self::ChameleonMini(device) => device.metadata(),
            Self::ProxReader(device) => device.metadata(),
        }
    }

    fn close_handle(&self) -> SessionCloseHandle {
        match self {
            Self::ChameleonMini(device) => device.close_handle(),
            Self::ProxReader(device) => device.close_handle(),
        }
    }

    async fn scan_for_card(&mut self, timeout: Duration) -> Result<Box<dyn CardData>> {
        match self {
            Self::ChameleonMini(device) => device.scan_for_card(timeout).await,
            Self::ProxReader(device) => device.scan_for_card(timeout).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::ChameleonMini(device) => device.close().await,
            Self::ProxReader(device) => device.close().await,
        }
    }
}

impl From<ChameleonMini> for AnyCardDevice {
    fn from(device: ChameleonMini) -> Self {
        Self::ChameleonMini(device)
    }
}

impl From<ProxReader> for AnyCardDevice {
    fn from(device: ProxReader) -> Self {
        Self::ProxReader(device)
    }
}

/// Receive one line before `deadline`.
///
/// A timeout is reported against the whole operation's `timeout`, not the
/// time left for this line.
pub(crate) async fn receive_line(
    session: &LineSession,
    deadline: Instant,
    timeout: Duration,
) -> Result<String> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    session.receive(remaining).await.map_err(|e| match e {
        ProtocolError::Timeout(_) => HardwareError::timeout(timeout.as_millis() as u64),
        other => other.into(),
    })
}
