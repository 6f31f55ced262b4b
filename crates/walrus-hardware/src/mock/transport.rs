use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;
use walrus_core::UsbIdentity;

use super::reader::{MockPort, MockReader, MockReaderHandle, SharedPort, lock, serve};
use crate::traits::{BoxedChannel, UsbTransport};
use crate::{HardwareError, Result};

/// Buffer size of each simulated serial link.
const CHANNEL_CAPACITY: usize = 4096;

/// In-memory USB bus populated with simulated readers.
///
/// Each `open` creates a fresh in-memory duplex link served by a task playing
/// the attached [`MockReader`]. Must be opened from within a Tokio runtime.
///
/// # Examples
///
/// ```
/// use walrus_core::UsbIdentity;
/// use walrus_core::constants::{PROX_READER_PID, PROX_READER_VID};
/// use walrus_hardware::mock::{MockReader, MockTransport};
/// use walrus_hardware::traits::UsbTransport;
///
/// let transport = MockTransport::new();
/// let identity = UsbIdentity::new(PROX_READER_VID, PROX_READER_PID, "/dev/ttyUSB0");
/// let _handle = transport.attach(identity.clone(), MockReader::prox_reader());
///
/// assert_eq!(transport.enumerate().unwrap(), vec![identity.clone()]);
/// transport.detach(&identity);
/// assert!(transport.enumerate().unwrap().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    ports: Arc<Mutex<HashMap<UsbIdentity, SharedPort>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug a reader in, replacing whatever was at `identity`.
    pub fn attach(&self, identity: UsbIdentity, reader: MockReader) -> MockReaderHandle {
        let port = Arc::new(Mutex::new(MockPort {
            reader,
            disconnect: CancellationToken::new(),
        }));
        debug!(identity = %identity, "Mock reader attached");

        if let Some(previous) = self.ports().insert(identity, Arc::clone(&port)) {
            lock(&previous).disconnect.cancel();
        }
        MockReaderHandle::new(port)
    }

    /// Unplug the reader at `identity`. Open channels see end of stream.
    ///
    /// Returns `false` if nothing was attached there.
    pub fn detach(&self, identity: &UsbIdentity) -> bool {
        let removed = self.ports().remove(identity);
        match removed {
            Some(port) => {
                lock(&port).disconnect.cancel();
                debug!(identity = %identity, "Mock reader detached");
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self, identity: &UsbIdentity) -> bool {
        self.ports().contains_key(identity)
    }

    fn ports(&self) -> MutexGuard<'_, HashMap<UsbIdentity, SharedPort>> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UsbTransport for MockTransport {
    fn enumerate(&self) -> Result<Vec<UsbIdentity>> {
        let mut identities: Vec<_> = self.ports().keys().cloned().collect();
        identities.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(identities)
    }

    fn open(&self, identity: &UsbIdentity) -> Result<BoxedChannel> {
        let port = self
            .ports()
            .get(identity)
            .cloned()
            .ok_or_else(|| HardwareError::connection(format!("no device at {}", identity.path)))?;

        let cancel = {
            let port = lock(&port);
            if port.reader.fails_open() {
                return Err(HardwareError::connection(format!(
                    "cannot open {}: permission denied",
                    identity.path
                )));
            }
            port.disconnect.child_token()
        };

        let (host, device) = tokio::io::duplex(CHANNEL_CAPACITY);
        tokio::spawn(serve(device, port, cancel));
        debug!(identity = %identity, "Mock channel opened");

        Ok(Box::new(host))
    }
}
