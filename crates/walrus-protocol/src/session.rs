//! Request/response sessions over a serial channel.
//!
//! A [`SerialSession`] owns one [`FramingEngine`] and one byte channel. A pump
//! task reads the channel in chunks and feeds the engine in arrival order;
//! callers extract framed messages with [`SerialSession::receive`] and write
//! with [`SerialSession::send`].
//!
//! ```text
//!            ┌──────────── pump task ────────────┐
//! channel ──>│ read chunk ─> engine.feed ─> wake │
//!            └───────────────────────────────────┘
//!                                │
//! receive(timeout) <── try_extract_next
//! send(message) ──> engine.encode ──> writer ──> channel
//! ```
//!
//! Closing is cooperative: [`SerialSession::close`] (or a cloned
//! [`SessionCloseHandle`]) cancels the pump and makes pending and later
//! receives fail with [`ProtocolError::Disconnected`]. Channel EOF and read
//! errors close the session too, but messages already received stay
//! readable until drained.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use walrus_core::SessionConfig;

use crate::engine::{Framer, FramingEngine};
use crate::{ProtocolError, Result};

/// A raw bidirectional byte channel.
pub trait SerialChannel: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> SerialChannel for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased serial channel, as handed out by transports.
pub type BoxedChannel = Box<dyn SerialChannel>;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Closes a session without borrowing it.
#[derive(Debug, Clone)]
pub struct SessionCloseHandle {
    name: Arc<str>,
    cancel: CancellationToken,
}

impl SessionCloseHandle {
    /// Mark the session closed. Pending receives fail promptly.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!(session = %self.name, "Closing session through handle");
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A framed session over one serial channel.
pub struct SerialSession<F: Framer> {
    name: Arc<str>,
    engine: Arc<Mutex<FramingEngine<F>>>,
    notify: Arc<Notify>,
    writer: tokio::sync::Mutex<BoxedWriter>,
    cancel: CancellationToken,
    /// Set by the pump when the peer ended the stream.
    hung_up: Arc<AtomicBool>,
    shut_down: AtomicBool,
    stall_threshold: usize,
}

impl<F: Framer> SerialSession<F> {
    /// Open a session and start its pump task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open<C: SerialChannel>(
        name: impl Into<String>,
        channel: C,
        framer: F,
        config: &SessionConfig,
    ) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (reader, writer) = tokio::io::split(channel);
        let engine = Arc::new(Mutex::new(FramingEngine::new(framer)));
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let hung_up = Arc::new(AtomicBool::new(false));

        tokio::spawn(pump(
            Arc::clone(&name),
            reader,
            Arc::clone(&engine),
            Arc::clone(&notify),
            cancel.clone(),
            Arc::clone(&hung_up),
            config.read_chunk_size.max(1),
        ));

        debug!(session = %name, "Session opened");

        Self {
            name,
            engine,
            notify,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            cancel,
            hung_up,
            shut_down: AtomicBool::new(false),
            stall_threshold: config.stall_threshold,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next complete message.
    ///
    /// After the peer hangs up, messages already buffered are still returned
    /// before `Disconnected`.
    ///
    /// # Errors
    /// - `Disconnected` if the session is or becomes closed
    /// - `FramingStall` if the deadline elapses with at least
    ///   `stall_threshold` unconsumed bytes buffered
    /// - `Timeout` otherwise when the deadline elapses
    pub async fn receive(&self, timeout: Duration) -> Result<F::Message> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let closed = self.cancel.is_cancelled();
            if closed && !self.hung_up.load(Ordering::Acquire) {
                return Err(ProtocolError::Disconnected);
            }

            let extracted = self.engine().try_extract_next();
            if let Some((message, consumed)) = extracted {
                trace!(session = %self.name, consumed, "Framed message");
                return Ok(message);
            }
            if closed {
                return Err(ProtocolError::Disconnected);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let buffered = self.buffered_len();
                    if buffered >= self.stall_threshold {
                        warn!(session = %self.name, buffered, "Framing stalled");
                        return Err(ProtocolError::FramingStall { buffered });
                    }
                    trace!(session = %self.name, "Receive timed out");
                    return Err(ProtocolError::Timeout(timeout.as_millis() as u64));
                }
            }
        }
    }

    /// Encode and write one message.
    pub async fn send(&self, message: &F::Message) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::Disconnected);
        }

        let bytes = self.engine().encode(message)?;
        trace!(session = %self.name, bytes = bytes.len(), "Sending message");

        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!(session = %self.name, error = %e, "Write failed, closing session");
            self.cancel.cancel();
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the session. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(session = %self.name, error = %e, "Writer shutdown failed");
        }
        debug!(session = %self.name, "Session closed");
    }

    pub fn close_handle(&self) -> SessionCloseHandle {
        SessionCloseHandle {
            name: Arc::clone(&self.name),
            cancel: self.cancel.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of received bytes not yet framed.
    pub fn buffered_len(&self) -> usize {
        self.engine().buffered_len()
    }

    /// Discard received bytes not yet framed.
    pub fn clear_buffer(&self) {
        self.engine().clear();
    }

    pub(crate) fn engine(&self) -> MutexGuard<'_, FramingEngine<F>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F: Framer> Drop for SerialSession<F> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<F: Framer> std::fmt::Debug for SerialSession<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSession")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn pump<F, R>(
    name: Arc<str>,
    mut reader: R,
    engine: Arc<Mutex<FramingEngine<F>>>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    hung_up: Arc<AtomicBool>,
    chunk_size: usize,
) where
    F: Framer,
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; chunk_size];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                debug!(session = %name, "Channel reached EOF");
                hung_up.store(true, Ordering::Release);
                break;
            }
            Ok(n) => {
                trace!(session = %name, bytes = n, "Received chunk");
                engine
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .feed(&chunk[..n]);
                notify.notify_waiters();
            }
            Err(e) => {
                warn!(session = %name, error = %e, "Channel read failed");
                hung_up.store(true, Ordering::Release);
                break;
            }
        }
    }

    cancel.cancel();
    notify.notify_waiters();
}
