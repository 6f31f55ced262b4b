//! Hotplug detection by polling.
//!
//! [`UsbMonitor`] enumerates the transport at a fixed interval and reports
//! the difference to the previous enumeration as [`UsbEvent`]s. The first
//! poll reports every attached device as added.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walrus_core::UsbIdentity;

use crate::Result;
use crate::traits::UsbTransport;
use crate::types::UsbEvent;

pub struct UsbMonitor {
    transport: Arc<dyn UsbTransport>,
    interval: Duration,
    known: HashSet<UsbIdentity>,
}

impl UsbMonitor {
    pub fn new(transport: Arc<dyn UsbTransport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
            known: HashSet::new(),
        }
    }

    /// Enumerate once and diff against the previous enumeration.
    ///
    /// Detaches are reported before attaches; within each group events are
    /// sorted by path.
    ///
    /// # Errors
    /// Returns the transport's error; the known set is left unchanged.
    pub fn poll_once(&mut self) -> Result<Vec<UsbEvent>> {
        let current: HashSet<UsbIdentity> = self.transport.enumerate()?.into_iter().collect();

        let mut removed: Vec<_> = self.known.difference(&current).cloned().collect();
        let mut added: Vec<_> = current.difference(&self.known).cloned().collect();
        removed.sort_by(|a, b| a.path.cmp(&b.path));
        added.sort_by(|a, b| a.path.cmp(&b.path));

        self.known = current;

        Ok(removed
            .into_iter()
            .map(UsbEvent::detached)
            .chain(added.into_iter().map(UsbEvent::attached))
            .collect())
    }

    /// Identities seen by the last successful poll.
    pub fn known(&self) -> &HashSet<UsbIdentity> {
        &self.known
    }

    /// Poll until cancelled or the receiver is dropped.
    pub async fn run(mut self, events: mpsc::Sender<UsbEvent>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "USB monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let polled = match self.poll_once() {
                Ok(polled) => polled,
                Err(e) => {
                    warn!(error = %e, "USB enumeration failed");
                    continue;
                }
            };

            for event in polled {
                debug!(identity = %event.identity, added = event.added, "USB change");
                if events.send(event).await.is_err() {
                    info!("USB event receiver closed, stopping monitor");
                    return;
                }
            }
        }

        info!("USB monitor stopped");
    }
}

impl std::fmt::Debug for UsbMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbMonitor")
            .field("interval", &self.interval)
            .field("known", &self.known.len())
            .finish_non_exhaustive()
    }
}
