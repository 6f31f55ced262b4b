//! Scripted reader firmware for the mock transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use walrus_core::constants::CRLF;
use walrus_protocol::{Charset, FramingCodec, LineFramer};

/// Behaviour of a simulated reader.
///
/// A reader answers each command line with a fixed list of reply lines.
/// Commands without a reply are ignored, which the host sees as a timeout.
///
/// # Examples
///
/// ```
/// use walrus_hardware::mock::MockReader;
///
/// let reader = MockReader::prox_reader()
///     .with_reply("READ", ["EM 0F0012D687"]);
/// assert_eq!(reader.reply("READ"), Some(&["EM 0F0012D687".to_string()][..]));
/// ```
#[derive(Debug, Clone)]
pub struct MockReader {
    charset: Charset,
    sync: Option<(u8, u8)>,
    replies: HashMap<String, Vec<String>>,
    delay: Duration,
    fail_open: bool,
}

impl MockReader {
    /// A silent reader speaking CRLF lines in `charset`.
    pub fn new(charset: Charset) -> Self {
        Self {
            charset,
            sync: None,
            replies: HashMap::new(),
            delay: Duration::ZERO,
            fail_open: false,
        }
    }

    /// A Chameleon Mini in EM4102 reader mode with a card in the field.
    pub fn chameleon_mini() -> Self {
        Self::new(Charset::Iso8859_1)
            .with_reply(
                "VERSION?",
                ["101:OK WITH TEXT", "ChameleonMini RevE rebooted 180402"],
            )
            .with_reply("CONFIG?", ["101:OK WITH TEXT", "EM4102"])
            .with_reply("UID?", ["101:OK WITH TEXT", "0F0012D687"])
    }

    /// A Prox reader with a HID card in the field.
    pub fn prox_reader() -> Self {
        Self::new(Charset::Ascii)
            .with_sync(0x55, 0xAA)
            .with_reply("INFO", ["PROX-1 v2.3"])
            .with_reply("READ", ["HID 2004A3C1F3"])
    }

    /// Expect `sync` in bytewise mode first and answer it with `ack`.
    pub fn with_sync(mut self, sync: u8, ack: u8) -> Self {
        self.sync = Some((sync, ack));
        self
    }

    pub fn with_reply<I, S>(mut self, command: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replies
            .insert(command.into(), lines.into_iter().map(Into::into).collect());
        self
    }

    pub fn without_reply(mut self, command: &str) -> Self {
        self.replies.remove(command);
        self
    }

    /// Wait this long before answering each command.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make the transport refuse to open this reader.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn reply(&self, command: &str) -> Option<&[String]> {
        self.replies.get(command).map(Vec::as_slice)
    }

    pub fn fails_open(&self) -> bool {
        self.fail_open
    }
}

/// Shared state of one attached mock reader.
#[derive(Debug)]
pub(crate) struct MockPort {
    pub(crate) reader: MockReader,
    pub(crate) disconnect: CancellationToken,
}

pub(crate) type SharedPort = Arc<Mutex<MockPort>>;

pub(crate) fn lock(port: &SharedPort) -> MutexGuard<'_, MockPort> {
    port.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Controls an attached mock reader.
#[derive(Debug, Clone)]
pub struct MockReaderHandle {
    port: SharedPort,
}

impl MockReaderHandle {
    pub(crate) fn new(port: SharedPort) -> Self {
        Self { port }
    }

    /// Replace the reply to `command`, e.g. to present a different card.
    pub fn set_reply<I, S>(&self, command: impl Into<String>, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut port = lock(&self.port);
        port.reader.replies
            .insert(command.into(), lines.into_iter().map(Into::into).collect());
    }

    /// Stop answering `command`.
    pub fn clear_reply(&self, command: &str) {
        lock(&self.port).reader.replies.remove(command);
    }

    pub fn set_delay(&self, delay: Duration) {
        lock(&self.port).reader.delay = delay;
    }

    /// Drop every open channel to this reader without detaching it.
    ///
    /// Hosts see end of stream. Later opens get a fresh channel.
    pub fn hang_up(&self) {
        let mut port = lock(&self.port);
        port.disconnect.cancel();
        port.disconnect = CancellationToken::new();
    }
}

/// Serve one opened channel until the host hangs up or the reader is
/// disconnected.
pub(crate) async fn serve(channel: DuplexStream, port: SharedPort, cancel: CancellationToken) {
    let (charset, sync) = {
        let port = lock(&port);
        (port.reader.charset, port.reader.sync)
    };

    let mut framer = LineFramer::new(CRLF, charset);
    framer.set_bytewise(sync.is_some());
    let mut framed = Framed::new(channel, FramingCodec::new(framer));

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = framed.next() => next,
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(error = %e, "Mock reader framing error");
                break;
            }
            None => break,
        };

        if framed.codec().framer().is_bytewise() {
            let Some((expected, ack)) = sync else { break };
            let received = message.chars().next().map(u32::from);
            if received == Some(u32::from(expected)) {
                if framed.send(char::from(ack).to_string()).await.is_err() {
                    break;
                }
                framed.codec_mut().framer_mut().set_bytewise(false);
            } else {
                trace!(?received, "Mock reader ignored byte before sync");
            }
            continue;
        }

        let (lines, delay) = {
            let port = lock(&port);
            (port.reader.replies.get(&message).cloned(), port.reader.delay)
        };
        let Some(lines) = lines else {
            trace!(command = %message, "Mock reader has no reply");
            continue;
        };

        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        for line in lines {
            if framed.send(line).await.is_err() {
                return;
            }
        }
    }

    trace!("Mock reader channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let chameleon = MockReader::chameleon_mini();
        assert_eq!(chameleon.charset(), Charset::Iso8859_1);
        assert_eq!(chameleon.reply("UID?").unwrap()[1], "0F0012D687");

        let prox = MockReader::prox_reader();
        assert_eq!(prox.charset(), Charset::Ascii);
        assert_eq!(prox.reply("READ").unwrap(), ["HID 2004A3C1F3"]);
    }

    #[test]
    fn test_builder() {
        let reader = MockReader::prox_reader()
            .without_reply("READ")
            .with_delay(Duration::from_millis(20))
            .failing_open();

        assert!(reader.reply("READ").is_none());
        assert!(reader.fails_open());
    }

    #[tokio::test]
    async fn test_serve_sync_then_lines() {
        let port = Arc::new(Mutex::new(MockPort {
            reader: MockReader::prox_reader(),
            disconnect: CancellationToken::new(),
        }));
        let (host, device) = tokio::io::duplex(1024);
        tokio::spawn(serve(device, port, CancellationToken::new()));

        let mut framer = LineFramer::new(CRLF, Charset::Ascii);
        framer.set_bytewise(true);
        let mut host = Framed::new(host, FramingCodec::new(framer));

        host.send(char::from(0x55).to_string()).await.unwrap();
        let ack = host.next().await.unwrap().unwrap();
        assert_eq!(ack, char::from(0xAA).to_string());

        host.codec_mut().framer_mut().set_bytewise(false);
        host.send("READ".to_string()).await.unwrap();
        assert_eq!(host.next().await.unwrap().unwrap(), "HID 2004A3C1F3");
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let port = Arc::new(Mutex::new(MockPort {
            reader: MockReader::chameleon_mini(),
            disconnect: CancellationToken::new(),
        }));
        let cancel = CancellationToken::new();
        let (host, device) = tokio::io::duplex(1024);
        let task = tokio::spawn(serve(device, port, cancel.clone()));

        cancel.cancel();
        task.await.unwrap();

        let mut host = Framed::new(
            host,
            FramingCodec::new(LineFramer::new(CRLF, Charset::Iso8859_1)),
        );
        assert!(host.next().await.is_none());
    }
}
