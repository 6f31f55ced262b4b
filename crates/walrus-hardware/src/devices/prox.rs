//! Prox reader driver.
//!
//! An FTDI-bridged 125 kHz reader. The handshake is a single sync byte
//! exchanged in bytewise mode; everything after it is ASCII lines.
//!
//! ```text
//! > 0x55
//! < 0xAA
//! > INFO
//! < PROX-1 v2.3
//! > READ
//! < HID 2004A3C1F3
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};
use walrus_card::{CardData, CardTechnology, DecoderRegistry, parse_hex};
use walrus_core::constants::CRLF;
use walrus_protocol::{Charset, LineFramer, LineSession, SessionCloseHandle};

use super::receive_line;
use crate::registry::DeviceContext;
use crate::traits::CardDevice;
use crate::types::{Capability, DeviceMetadata};
use crate::{HardwareError, Result};

/// Sync byte sent by the host.
pub const SYNC_BYTE: u8 = 0x55;

/// Byte the reader answers the sync with.
pub const ACK_BYTE: u8 = 0xAA;

/// A Prox reader.
#[derive(Debug)]
pub struct ProxReader {
    session: LineSession,
    metadata: DeviceMetadata,
    decoders: Arc<DecoderRegistry>,
}

impl ProxReader {
    pub const NAME: &'static str = "Prox Reader";

    pub const CAPABILITIES: &'static [Capability] = &[Capability::Read];

    /// Open the session, sync with the reader and query its firmware.
    ///
    /// # Errors
    /// Returns `HardwareError::Connection` if the reader does not ack the
    /// sync byte or answer `INFO` within the handshake timeout.
    pub async fn connect(ctx: DeviceContext) -> Result<Self> {
        let DeviceContext {
            identity,
            channel,
            decoders,
            session: session_config,
            handshake_timeout,
        } = ctx;

        let framer = LineFramer::new(CRLF, Charset::Ascii);
        let session = LineSession::open(identity.path.clone(), channel, framer, &session_config);

        let firmware = match handshake(&session, handshake_timeout).await {
            Ok(firmware) => firmware,
            Err(e) => {
                session.close().await;
                return Err(HardwareError::connection(format!(
                    "{} handshake at {} failed: {e}",
                    Self::NAME,
                    identity.path
                )));
            }
        };

        info!(path = %identity.path, firmware = %firmware, "Prox reader identified");

        let metadata = DeviceMetadata::new(Self::NAME, &identity)
            .with_firmware_version(firmware)
            .with_capabilities(Self::CAPABILITIES)
            .with_technologies(&[CardTechnology::Em, CardTechnology::Hid]);

        Ok(Self {
            session,
            metadata,
            decoders,
        })
    }
}

async fn handshake(session: &LineSession, timeout: Duration) -> Result<String> {
    let deadline = Instant::now() + timeout;

    session.set_bytewise(true);
    session.send_byte(SYNC_BYTE).await?;
    let remaining = deadline.saturating_duration_since(Instant::now());
    let ack = session.receive_byte(remaining).await?;
    session.set_bytewise(false);

    if ack != ACK_BYTE {
        return Err(HardwareError::invalid_data(format!(
            "expected ack {ACK_BYTE:#04x}, got {ack:#04x}"
        )));
    }

    session.send_line("INFO").await?;
    receive_line(session, deadline, timeout).await
}

impl CardDevice for ProxReader {
    fn metadata(&self) -> &DeviceMetadata {
        &self.metadata
    }

    fn close_handle(&self) -> SessionCloseHandle {
        self.session.close_handle()
    }

    async fn scan_for_card(&mut self, timeout: Duration) -> Result<Box<dyn CardData>> {
        let deadline = Instant::now() + timeout;
        self.session.clear_buffer();

        self.session.send_line("READ").await?;
        let line = receive_line(&self.session, deadline, timeout).await?;
        debug!(session = %self.session.name(), line = %line, "Prox reader answered");

        let (technology, payload) = parse_read_response(&line)?;
        Ok(self.decoders.decode(&technology, &payload)?)
    }

    async fn close(&mut self) -> Result<()> {
        self.session.close().await;
        Ok(())
    }
}

/// Parse `<TECH> <HEX>`, or `ERR <reason>`.
fn parse_read_response(line: &str) -> Result<(CardTechnology, Vec<u8>)> {
    let line = line.trim();
    if let Some(reason) = line.strip_prefix("ERR") {
        return Err(HardwareError::invalid_data(format!(
            "READ rejected: {}",
            reason.trim()
        )));
    }

    let (technology, hex) = line
        .split_once(' ')
        .ok_or_else(|| HardwareError::invalid_data(format!("malformed READ response: {line:?}")))?;

    let technology: CardTechnology = technology.into();
    Ok((technology, parse_hex(hex)?))
}
