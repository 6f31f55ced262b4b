//! Card device manager.
//!
//! The [`CardDeviceManager`] owns every connected reader. It turns USB attach
//! and detach notifications into identified [`AnyCardDevice`]s, tracks each
//! device id through its connection state machine and broadcasts a
//! [`ConnectivityEvent`] whenever a reader is added or removed.
//!
//! # Architecture
//!
//! ```text
//!  UsbEvent ──> handle_usb_event ──┬─ attach: register pending ticket ──> spawn identify
//!                                  └─ detach: cancel pending ticket   ──> spawn teardown
//!
//!  identify/teardown ──(per-identity lock)──> registry ──> broadcast ConnectivityEvent
//! ```
//!
//! The order-sensitive half of every notification runs synchronously, so a
//! stream handled in order keeps its per-device meaning even though the slow
//! half runs in spawned tasks. Each notification gets a generation number; a
//! detach only tears down devices attached under an earlier generation, and
//! an attach that lost the race to a later detach registers nothing.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use walrus_card::DecoderRegistry;
//! use walrus_core::WalrusConfig;
//! use walrus_hardware::manager::CardDeviceManager;
//! use walrus_hardware::mock::MockTransport;
//! use walrus_hardware::registry::DeviceRegistry;
//!
//! #[tokio::main]
//! async fn main() -> walrus_hardware::Result<()> {
//!     let manager = CardDeviceManager::new(
//!         Arc::new(MockTransport::new()),
//!         DeviceRegistry::with_defaults(),
//!         DecoderRegistry::with_defaults(),
//!         WalrusConfig::default(),
//!     );
//!
//!     for id in manager.scan_for_devices().await? {
//!         let card = manager.read_card(id, Duration::from_secs(5)).await?;
//!         println!("{id}: {card}");
//!     }
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use walrus_card::{CardData, DecoderRegistry};
use walrus_core::{ConnectionState, DeviceId, UsbIdentity, WalrusConfig};
use walrus_protocol::SessionCloseHandle;

use crate::devices::AnyCardDevice;
use crate::registry::{DeviceContext, DeviceDescriptor, DeviceRegistry};
use crate::traits::{CardDevice, UsbTransport};
use crate::types::{ConnectivityEvent, DeviceMetadata, DeviceRecord, UsbEvent};
use crate::{HardwareError, Result};

type IdentityLock = Arc<tokio::sync::Mutex<()>>;

/// Owns the connected card readers.
///
/// Cheap to clone; clones share the same devices. Call
/// [`shutdown`](Self::shutdown) to close every reader.
#[derive(Clone)]
pub struct CardDeviceManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn UsbTransport>,
    registry: DeviceRegistry,
    decoders: Arc<DecoderRegistry>,
    config: WalrusConfig,
    state: Mutex<State>,
    events: broadcast::Sender<ConnectivityEvent>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct State {
    devices: HashMap<DeviceId, DeviceEntry>,
    states: HashMap<DeviceId, ConnectionState>,
    /// Ids handed out so far; a reattached identity gets its id back.
    ids: HashMap<UsbIdentity, DeviceId>,
    /// Dropped once the identity is idle with no live device.
    slots: HashMap<UsbIdentity, IdentitySlot>,
    /// Cancellation shared by attaches not yet superseded by a detach.
    pending: HashMap<UsbIdentity, Pending>,
    next_id: u32,
    generation: u64,
}

impl State {
    fn is_live(&self, identity: &UsbIdentity) -> bool {
        self.ids
            .get(identity)
            .is_some_and(|id| self.devices.contains_key(id))
    }
}

#[derive(Default)]
struct IdentitySlot {
    lock: IdentityLock,
    last_detach: u64,
    /// Attaches, detaches and teardowns begun but not yet finished.
    in_flight: usize,
}

struct Pending {
    cancel: CancellationToken,
    latest: u64,
}

struct DeviceEntry {
    identity: UsbIdentity,
    metadata: DeviceMetadata,
    generation: u64,
    device: Arc<tokio::sync::Mutex<AnyCardDevice>>,
    close_handle: SessionCloseHandle,
}

struct AttachTicket {
    generation: u64,
    cancel: CancellationToken,
}

impl CardDeviceManager {
    /// Create a manager. No device is touched until the first scan or
    /// notification.
    pub fn new(
        transport: Arc<dyn UsbTransport>,
        registry: DeviceRegistry,
        decoders: DecoderRegistry,
        config: WalrusConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.manager.event_capacity.max(1));

        Self {
            inner: Arc::new(Inner {
                transport,
                registry,
                decoders: Arc::new(decoders),
                config,
                state: Mutex::new(State::default()),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &WalrusConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> Arc<dyn UsbTransport> {
        Arc::clone(&self.inner.transport)
    }

    /// Receive connectivity events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.events.subscribe()
    }

    /// Identify every attached reader that is not connected yet.
    ///
    /// Identifications run concurrently. Identities of unknown type are
    /// skipped silently.
    ///
    /// # Returns
    /// Ids of the devices that became connected, sorted.
    ///
    /// # Errors
    /// Returns the transport's error if enumeration fails.
    pub async fn scan_for_devices(&self) -> Result<Vec<DeviceId>> {
        let identities = self.inner.transport.enumerate()?;
        debug!(count = identities.len(), "Scanning for card devices");

        let mut tasks = JoinSet::new();
        for identity in identities {
            if self.connected_id(&identity).is_some() {
                continue;
            }
            let Some(ticket) = self.begin_attach(&identity) else {
                continue;
            };
            let manager = self.clone();
            tasks.spawn(async move { manager.finish_attach(identity, ticket).await });
        }

        let mut connected = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(id)) => connected.push(id),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Identification task failed"),
            }
        }
        connected.sort();
        Ok(connected)
    }

    /// Handle one USB notification.
    ///
    /// Registering or cancelling the pending identification happens before
    /// this returns; identification and teardown run in the returned task.
    pub fn handle_usb_event(&self, event: UsbEvent) -> JoinHandle<()> {
        let manager = self.clone();
        let UsbEvent { identity, added } = event;

        if added {
            let ticket = self.begin_attach(&identity);
            tokio::spawn(async move {
                if let Some(ticket) = ticket {
                    manager.finish_attach(identity, ticket).await;
                }
            })
        } else {
            let generation = self.begin_detach(&identity);
            tokio::spawn(async move {
                manager.finish_detach(identity, generation).await;
            })
        }
    }

    /// Consume notifications until the sender closes or the manager shuts
    /// down.
    pub async fn run(&self, mut events: mpsc::Receiver<UsbEvent>) {
        info!("Card device manager running");
        loop {
            let event = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Some(event) => {
                    self.handle_usb_event(event);
                }
                None => break,
            }
        }
        info!("Card device manager stopped");
    }

    /// Identify a single attached device.
    ///
    /// # Returns
    /// The device id if the device is (or already was) connected, `None` if
    /// its type is unknown, identification failed or it was detached first.
    pub async fn attach(&self, identity: UsbIdentity) -> Option<DeviceId> {
        let ticket = self.begin_attach(&identity)?;
        self.finish_attach(identity, ticket).await
    }

    /// Handle the removal of a device.
    ///
    /// # Returns
    /// `true` if a connected device was torn down.
    pub async fn detach(&self, identity: UsbIdentity) -> bool {
        let generation = self.begin_detach(&identity);
        self.finish_detach(identity, generation).await
    }

    /// Scan a card on a connected device.
    ///
    /// A fatal error tears the device down and emits its removal; other
    /// errors leave it connected.
    ///
    /// # Errors
    /// - `UnknownDevice` if `id` is not connected
    /// - whatever the device's scan fails with
    pub async fn read_card(&self, id: DeviceId, timeout: Duration) -> Result<Box<dyn CardData>> {
        let device = self
            .shared()
            .devices
            .get(&id)
            .map(|entry| Arc::clone(&entry.device))
            .ok_or(HardwareError::UnknownDevice(id))?;

        let result = {
            let mut guard = device.lock().await;
            guard.scan_for_card(timeout).await
        };

        match result {
            Ok(card) => {
                debug!(device = %id, card = %card, "Card read");
                Ok(card)
            }
            Err(e) if e.is_fatal() => {
                warn!(device = %id, error = %e, "Card device failed, removing");
                self.force_teardown(id, &device).await;
                Err(e)
            }
            Err(e) => {
                warn!(device = %id, error = %e, "Card scan failed");
                Err(e)
            }
        }
    }

    /// Snapshot of a connected device.
    pub fn device(&self, id: DeviceId) -> Option<DeviceRecord> {
        let state = self.shared();
        let entry = state.devices.get(&id)?;
        Some(record(id, entry, &state))
    }

    /// Snapshots of all connected devices, sorted by id.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let state = self.shared();
        let mut records: Vec<_> = state
            .devices
            .iter()
            .map(|(id, entry)| record(*id, entry, &state))
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Connection state of an id; `Unknown` for ids never handed out.
    pub fn state(&self, id: DeviceId) -> ConnectionState {
        self.shared()
            .states
            .get(&id)
            .copied()
            .unwrap_or(ConnectionState::Unknown)
    }

    pub fn device_count(&self) -> usize {
        self.shared().devices.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Cancel pending identifications and close every device.
    ///
    /// A removal event is emitted per connected device. Later notifications
    /// are ignored.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down card device manager");
        self.inner.shutdown.cancel();

        // Pending identities are detached too; the detach waits on the
        // identity lock until an in-flight identification has finished.
        let identities: HashSet<UsbIdentity> = {
            let state = self.shared();
            state
                .devices
                .values()
                .map(|entry| entry.identity.clone())
                .chain(state.pending.keys().cloned())
                .collect()
        };

        join_all(
            identities
                .into_iter()
                .map(|identity| self.detach(identity)),
        )
        .await;
    }

    fn begin_attach(&self, identity: &UsbIdentity) -> Option<AttachTicket> {
        if self.inner.shutdown.is_cancelled() {
            return None;
        }
        if self.inner.registry.identify(identity).is_none() {
            trace!(identity = %identity, "Ignoring unknown USB device");
            return None;
        }

        let mut state = self.shared();
        state.generation += 1;
        let generation = state.generation;
        let pending = state
            .pending
            .entry(identity.clone())
            .or_insert_with(|| Pending {
                cancel: CancellationToken::new(),
                latest: generation,
            });
        pending.latest = generation;
        let cancel = pending.cancel.clone();
        state.slots.entry(identity.clone()).or_default().in_flight += 1;

        Some(AttachTicket { generation, cancel })
    }

    async fn finish_attach(&self, identity: UsbIdentity, ticket: AttachTicket) -> Option<DeviceId> {
        let lock = self.identity_lock(&identity);
        let guard = lock.lock().await;

        let result = self.identify_locked(&identity, &ticket).await;

        {
            let mut state = self.shared();
            if state
                .pending
                .get(&identity)
                .is_some_and(|pending| pending.latest == ticket.generation)
            {
                state.pending.remove(&identity);
            }
        }
        drop(guard);
        self.release(&identity);
        result
    }

    async fn identify_locked(&self, identity: &UsbIdentity, ticket: &AttachTicket) -> Option<DeviceId> {
        if self.superseded(identity, ticket) {
            debug!(identity = %identity, "Attach superseded by detach");
            return None;
        }
        let descriptor = self.inner.registry.identify(identity)?.clone();
        if let Some(id) = self.connected_id(identity) {
            return Some(id);
        }

        let id = self.assign_id(identity);
        self.set_state(id, ConnectionState::Identifying);
        debug!(device = %id, identity = %identity, name = descriptor.name, "Identifying card device");

        let identified = tokio::select! {
            _ = ticket.cancel.cancelled() => None,
            _ = self.inner.shutdown.cancelled() => None,
            result = self.identify(&descriptor, identity) => Some(result),
        };

        match identified {
            Some(Ok(device)) if !self.superseded(identity, ticket) => {
                let metadata = device.metadata().clone();
                let name = metadata.name.clone();
                let entry = DeviceEntry {
                    identity: identity.clone(),
                    close_handle: device.close_handle(),
                    metadata,
                    generation: ticket.generation,
                    device: Arc::new(tokio::sync::Mutex::new(device)),
                };
                self.shared().devices.insert(id, entry);
                self.set_state(id, ConnectionState::Connected);

                info!(device = %id, name = %name, identity = %identity, "Card device connected");
                self.emit(ConnectivityEvent::added(id, name));
                Some(id)
            }
            Some(Ok(mut device)) => {
                debug!(device = %id, "Detached during identification, closing");
                if let Err(e) = device.close().await {
                    debug!(device = %id, error = %e, "Close failed");
                }
                self.set_state(id, ConnectionState::Disconnected);
                None
            }
            Some(Err(e)) => {
                warn!(device = %id, identity = %identity, error = %e, "Identification failed");
                self.set_state(id, ConnectionState::Disconnected);
                None
            }
            None => {
                debug!(device = %id, "Identification cancelled");
                self.set_state(id, ConnectionState::Disconnected);
                None
            }
        }
    }

    async fn identify(
        &self,
        descriptor: &DeviceDescriptor,
        identity: &UsbIdentity,
    ) -> Result<AnyCardDevice> {
        let channel = self.inner.transport.open(identity)?;
        let ctx = DeviceContext {
            identity: identity.clone(),
            channel,
            decoders: Arc::clone(&self.inner.decoders),
            session: self.inner.config.session.clone(),
            handshake_timeout: self.inner.config.manager.handshake_timeout(),
        };
        descriptor.connect(ctx).await
    }

    fn begin_detach(&self, identity: &UsbIdentity) -> u64 {
        let mut state = self.shared();
        state.generation += 1;
        let generation = state.generation;
        let slot = state.slots.entry(identity.clone()).or_default();
        slot.last_detach = generation;
        slot.in_flight += 1;
        if let Some(pending) = state.pending.remove(identity) {
            debug!(identity = %identity, "Cancelling pending identification");
            pending.cancel.cancel();
        }
        generation
    }

    async fn finish_detach(&self, identity: UsbIdentity, generation: u64) -> bool {
        let lock = self.identity_lock(&identity);
        let guard = lock.lock().await;

        let removed = {
            let mut state = self.shared();
            let id = state.ids.get(&identity).copied();
            match id {
                Some(id)
                    if state
                        .devices
                        .get(&id)
                        .is_some_and(|entry| entry.generation < generation) =>
                {
                    state.devices.remove(&id).map(|entry| (id, entry))
                }
                _ => None,
            }
        };

        let torn_down = match removed {
            Some((id, entry)) => {
                self.teardown(id, entry).await;
                true
            }
            None => {
                trace!(identity = %identity, "Detach of unconnected device");
                false
            }
        };
        drop(guard);
        self.release(&identity);
        torn_down
    }

    /// Tear down `id` after a fatal error, unless it was already replaced
    /// or removed.
    async fn force_teardown(&self, id: DeviceId, device: &Arc<tokio::sync::Mutex<AnyCardDevice>>) {
        let (identity, lock) = {
            let mut state = self.shared();
            let Some(identity) = state.devices.get(&id).map(|entry| entry.identity.clone()) else {
                return;
            };
            let slot = state.slots.entry(identity.clone()).or_default();
            slot.in_flight += 1;
            (identity, Arc::clone(&slot.lock))
        };
        let guard = lock.lock().await;

        let removed = {
            let mut state = self.shared();
            let same = state
                .devices
                .get(&id)
                .is_some_and(|entry| Arc::ptr_eq(&entry.device, device));
            if same { state.devices.remove(&id) } else { None }
        };
        if let Some(entry) = removed {
            self.teardown(id, entry).await;
        }
        drop(guard);
        self.release(&identity);
    }

    async fn teardown(&self, id: DeviceId, entry: DeviceEntry) {
        // Fail an in-flight scan before waiting for the device.
        entry.close_handle.close();
        {
            let mut device = entry.device.lock().await;
            if let Err(e) = device.close().await {
                debug!(device = %id, error = %e, "Close failed");
            }
        }
        self.set_state(id, ConnectionState::Disconnected);

        info!(device = %id, name = %entry.metadata.name, identity = %entry.identity, "Card device removed");
        self.emit(ConnectivityEvent::removed(id, entry.metadata.name));
    }

    fn superseded(&self, identity: &UsbIdentity, ticket: &AttachTicket) -> bool {
        ticket.cancel.is_cancelled()
            || self.inner.shutdown.is_cancelled()
            || self
                .shared()
                .slots
                .get(identity)
                .is_some_and(|slot| slot.last_detach > ticket.generation)
    }

    fn connected_id(&self, identity: &UsbIdentity) -> Option<DeviceId> {
        let state = self.shared();
        let id = state.ids.get(identity).copied()?;
        state.devices.contains_key(&id).then_some(id)
    }

    fn assign_id(&self, identity: &UsbIdentity) -> DeviceId {
        let mut state = self.shared();
        if let Some(id) = state.ids.get(identity) {
            return *id;
        }
        state.next_id += 1;
        let id = DeviceId::new(state.next_id);
        state.ids.insert(identity.clone(), id);
        id
    }

    fn set_state(&self, id: DeviceId, next: ConnectionState) {
        let mut state = self.shared();
        let current = state
            .states
            .get(&id)
            .copied()
            .unwrap_or(ConnectionState::Unknown);
        match current.transition(next) {
            Ok(next) => {
                trace!(device = %id, from = %current, to = %next, "State transition");
                state.states.insert(id, next);
            }
            Err(e) => error!(device = %id, error = %e, "Rejected state transition"),
        }
    }

    /// Lock of an identity whose in-flight count the caller already holds.
    fn identity_lock(&self, identity: &UsbIdentity) -> IdentityLock {
        let mut state = self.shared();
        Arc::clone(&state.slots.entry(identity.clone()).or_default().lock)
    }

    /// Finish one in-flight operation, dropping the slot once idle.
    fn release(&self, identity: &UsbIdentity) {
        let mut state = self.shared();
        let idle = state.slots.get_mut(identity).is_some_and(|slot| {
            slot.in_flight = slot.in_flight.saturating_sub(1);
            slot.in_flight == 0
        });
        if idle && !state.pending.contains_key(identity) && !state.is_live(identity) {
            state.slots.remove(identity);
        }
    }

    fn emit(&self, event: ConnectivityEvent) {
        if self.inner.events.send(event).is_err() {
            trace!("No connectivity subscribers");
        }
    }

    fn shared(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CardDeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDeviceManager")
            .field("devices", &self.device_count())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

fn record(id: DeviceId, entry: &DeviceEntry, state: &State) -> DeviceRecord {
    DeviceRecord {
        id,
        identity: entry.identity.clone(),
        state: state
            .states
            .get(&id)
            .copied()
            .unwrap_or(ConnectionState::Unknown),
        metadata: entry.metadata.clone(),
    }
}
