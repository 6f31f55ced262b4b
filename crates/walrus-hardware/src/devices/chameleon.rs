//! Chameleon Mini driver.
//!
//! The Chameleon speaks a CRLF line protocol in ISO-8859-1. Every command is
//! answered with a status line; `101:OK WITH TEXT` is followed by one line of
//! text.
//!
//! ```text
//! > VERSION?
//! < 101:OK WITH TEXT
//! < ChameleonMini RevE rebooted 180402
//! > CONFIG?
//! < 101:OK WITH TEXT
//! < EM4102
//! > UID?
//! < 101:OK WITH TEXT
//! < 0F0012D687
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use walrus_card::{CardData, CardError, CardTechnology, DecoderRegistry, parse_hex};
use walrus_core::constants::CRLF;
use walrus_protocol::{Charset, LineFramer, LineSession, SessionCloseHandle};

use super::receive_line;
use crate::registry::DeviceContext;
use crate::traits::CardDevice;
use crate::types::{Capability, DeviceMetadata};
use crate::{HardwareError, Result};

const STATUS_OK: &str = "100";
const STATUS_OK_WITH_TEXT: &str = "101";

/// A Chameleon Mini in reader mode.
#[derive(Debug)]
pub struct ChameleonMini {
    session: LineSession,
    metadata: DeviceMetadata,
    decoders: Arc<DecoderRegistry>,
}

impl ChameleonMini {
    pub const NAME: &'static str = "Chameleon Mini";

    pub const CAPABILITIES: &'static [Capability] = &[Capability::Read, Capability::Emulate];

    /// Open the session and query the firmware version.
    ///
    /// # Errors
    /// Returns `HardwareError::Connection` if the reader does not answer
    /// `VERSION?` within the handshake timeout. The session is closed first.
    pub async fn connect(ctx: DeviceContext) -> Result<Self> {
        let DeviceContext {
            identity,
            channel,
            decoders,
            session: session_config,
            handshake_timeout,
        } = ctx;

        let framer = LineFramer::new(CRLF, Charset::Iso8859_1);
        let session = LineSession::open(identity.path.clone(), channel, framer, &session_config);

        let deadline = Instant::now() + handshake_timeout;
        let version = match command(&session, "VERSION?", deadline, handshake_timeout).await {
            Ok(Some(version)) => version,
            Ok(None) => {
                session.close().await;
                return Err(HardwareError::connection(format!(
                    "{} at {} sent no version text",
                    Self::NAME,
                    identity.path
                )));
            }
            Err(e) => {
                session.close().await;
                return Err(HardwareError::connection(format!(
                    "{} handshake at {} failed: {e}",
                    Self::NAME,
                    identity.path
                )));
            }
        };

        info!(path = %identity.path, version = %version, "Chameleon Mini identified");

        let metadata = DeviceMetadata::new(Self::NAME, &identity)
            .with_firmware_version(version)
            .with_capabilities(Self::CAPABILITIES)
            .with_technologies(&[CardTechnology::Em, CardTechnology::Hid]);

        Ok(Self {
            session,
            metadata,
            decoders,
        })
    }

    /// Query a command that must answer with text.
    async fn query(&self, cmd: &str, deadline: Instant, timeout: Duration) -> Result<String> {
        command(&self.session, cmd, deadline, timeout)
            .await?
            .ok_or_else(|| HardwareError::invalid_data(format!("{cmd} returned no text")))
    }
}

impl CardDevice for ChameleonMini {
    fn metadata(&self) -> &DeviceMetadata {
        &self.metadata
    }

    fn close_handle(&self) -> SessionCloseHandle {
        self.session.close_handle()
    }

    async fn scan_for_card(&mut self, timeout: Duration) -> Result<Box<dyn CardData>> {
        let deadline = Instant::now() + timeout;
        self.session.clear_buffer();

        let config = self.query("CONFIG?", deadline, timeout).await?;
        let technology = technology_for_config(&config)
            .ok_or_else(|| CardError::UnknownTechnology(config.clone()))?;

        let uid = self.query("UID?", deadline, timeout).await?;
        let payload = parse_hex(&uid)?;
        debug!(
            session = %self.session.name(),
            config = %config,
            uid = %uid,
            "Chameleon Mini reported card"
        );

        Ok(self.decoders.decode(&technology, &payload)?)
    }

    async fn close(&mut self) -> Result<()> {
        self.session.close().await;
        Ok(())
    }
}

/// Send a command and read its status line, plus the text line if any.
async fn command(
    session: &LineSession,
    cmd: &str,
    deadline: Instant,
    timeout: Duration,
) -> Result<Option<String>> {
    session.send_line(cmd).await?;
    let status = receive_line(session, deadline, timeout).await?;

    match status_code(&status) {
        STATUS_OK => Ok(None),
        STATUS_OK_WITH_TEXT => Ok(Some(receive_line(session, deadline, timeout).await?)),
        _ => {
            warn!(session = %session.name(), command = cmd, status = %status, "Command rejected");
            Err(HardwareError::invalid_data(format!(
                "{cmd} rejected: {status}"
            )))
        }
    }
}

fn status_code(status: &str) -> &str {
    status.split(':').next().unwrap_or_default().trim()
}

/// Map a reader configuration name to the technology it scans.
fn technology_for_config(config: &str) -> Option<CardTechnology> {
    match config.trim() {
        "EM4102" | "EM4100" => Some(CardTechnology::Em),
        "HID_PROX" | "HIDPROX" => Some(CardTechnology::Hid),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("101:OK WITH TEXT", "101")]
    #[case("100:OK", "100")]
    #[case("200:UNKNOWN COMMAND", "200")]
    #[case("garbage", "garbage")]
    #[case("", "")]
    fn test_status_code(#[case] status: &str, #[case] code: &str) {
        assert_eq!(status_code(status), code);
    }

    #[rstest]
    #[case("EM4102", Some(CardTechnology::Em))]
    #[case("EM4100", Some(CardTechnology::Em))]
    #[case(" HID_PROX ", Some(CardTechnology::Hid))]
    #[case("MF_CLASSIC_1K", None)]
    #[case("NONE", None)]
    fn test_technology_for_config(#[case] config: &str, #[case] expected: Option<CardTechnology>) {
        assert_eq!(technology_for_config(config), expected);
    }
}
