// ── Environment manager ──
//
// Owns the single broker session of one environment: ingests transport
// events, folds them into the device tree, fans change notifications out to
// listeners, and ref-counts per-device subscriptions with debounced
// teardown.

mod listeners;
mod ready;
mod subscriptions;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use strum::Display;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub use listeners::ListenerHandle;
pub use ready::DeviceReady;

use self::listeners::ListenerSet;
use self::subscriptions::{Acquired, SubscriptionTable};
use crate::config::EnvironmentConfig;
use crate::error::CoreError;
use crate::event::{self, HomieEvent};
use crate::model::{Device, PropertyPath};
use crate::store::DeviceTree;
use crate::stream::DeviceTreeStream;
use crate::transport::{Connector, QoS, Transport, TransportEvent, TransportLink, TransportStatus};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl From<TransportStatus> for ConnectionState {
    fn from(status: TransportStatus) -> Self {
        if status.connected {
            Self::Connected
        } else if status.reconnecting {
            Self::Reconnecting
        } else if status.disconnected {
            Self::Disconnected
        } else {
            Self::Connecting
        }
    }
}

// ── EnvironmentManager ───────────────────────────────────────────

/// The per-environment entry point for consumers.
///
/// Cheaply cloneable via `Arc<ManagerInner>`. Created connected; lives until
/// [`dispose`](Self::dispose) is called or the last clone is dropped, which
/// closes the transport the same way.
#[derive(Clone)]
pub struct EnvironmentManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    config: EnvironmentConfig,
    transport: Arc<dyn Transport>,
    tree: watch::Sender<DeviceTree>,
    connection_state: watch::Sender<ConnectionState>,
    listeners: Arc<ListenerSet>,
    subscriptions: SubscriptionTable,
    ready: Mutex<HashMap<String, DeviceReady>>,
    state_subscribed: AtomicBool,
    runtime: Handle,
    cancel: CancellationToken,
}

impl EnvironmentManager {
    /// Open the broker session and start ingesting.
    ///
    /// Must be called from within a Tokio runtime; timers and the ingestion
    /// task run on it.
    pub fn connect(config: EnvironmentConfig, connector: &dyn Connector) -> Result<Self, CoreError> {
        let runtime = Handle::try_current().map_err(|e| CoreError::Config {
            message: format!("environment manager needs a Tokio runtime: {e}"),
        })?;
        let TransportLink { transport, events } = connector.connect(&config)?;

        let (tree, _) = watch::channel(DeviceTree::new());
        let (connection_state, _) = watch::channel(ConnectionState::from(transport.status()));

        let inner = Arc::new(ManagerInner {
            config,
            transport,
            tree,
            connection_state,
            listeners: Arc::new(ListenerSet::default()),
            subscriptions: SubscriptionTable::default(),
            ready: Mutex::new(HashMap::new()),
            state_subscribed: AtomicBool::new(false),
            runtime,
            cancel: CancellationToken::new(),
        });

        inner.runtime.spawn(ingest_task(
            Arc::downgrade(&inner),
            events,
            inner.cancel.clone(),
        ));

        debug!(environment = %inner.config.id, "environment manager started");
        Ok(Self { inner })
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.inner.config
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    // ── Snapshots ────────────────────────────────────────────────

    /// The current device tree.
    pub fn snapshot(&self) -> DeviceTree {
        self.inner.tree.borrow().clone()
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<Device>> {
        self.inner.tree.borrow().get(device_id).cloned()
    }

    /// Subscribe to tree snapshots.
    pub fn stream(&self) -> DeviceTreeStream {
        DeviceTreeStream::new(self.inner.tree.subscribe())
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection_state.borrow()
    }

    pub fn connection_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    // ── Listeners ────────────────────────────────────────────────

    /// Register a change listener, invoked after every tree change and
    /// every connection status callback.
    ///
    /// The first registration also subscribes to `<ns>/5/+/$state`, which
    /// stays subscribed for the lifetime of the manager.
    pub fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerHandle {
        let id = self.inner.listeners.add(Arc::new(listener));

        if !self.inner.state_subscribed.swap(true, Ordering::AcqRel) {
            let filter = self.inner.config.state_filter();
            if let Err(e) = self.inner.transport.subscribe(&filter) {
                warn!(filter = %filter, error = %e, "state subscription failed");
            }
        }

        ListenerHandle::new(&self.inner.listeners, id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    // ── Device subscriptions ─────────────────────────────────────

    /// Hold a subscription to `<ns>/5/<device>/#`.
    ///
    /// Holders are counted; the broker subscription is issued for the first
    /// and withdrawn `teardown_delay` after the last one is dropped, unless
    /// a new holder shows up in between.
    pub fn subscribe_to_device(&self, device_id: &str) -> DeviceSubscription {
        match self.inner.subscriptions.acquire(device_id) {
            Acquired::First => {
                let filter = self.inner.config.device_filter(device_id);
                if let Err(e) = self.inner.transport.subscribe(&filter) {
                    warn!(filter = %filter, error = %e, "device subscription failed");
                }
            }
            Acquired::Resumed => trace!(device_id, "pending teardown cancelled"),
            Acquired::Shared => {}
        }

        DeviceSubscription {
            inner: Arc::downgrade(&self.inner),
            device_id: device_id.to_owned(),
        }
    }

    /// Number of live holders for `device_id`.
    pub fn subscriber_count(&self, device_id: &str) -> usize {
        self.inner.subscriptions.count(device_id)
    }

    /// `true` while the broker subscription for `device_id` is live,
    /// including during the teardown grace period.
    pub fn is_device_subscribed(&self, device_id: &str) -> bool {
        self.inner.subscriptions.is_active(device_id)
    }

    // ── Readiness ────────────────────────────────────────────────

    /// [`device_ready`](Self::device_ready) bounded by `timeout`.
    pub async fn ready_timeout(&self, device_id: &str, timeout: Duration) -> Result<(), CoreError> {
        tokio::time::timeout(timeout, self.device_ready(device_id))
            .await
            .map_err(|_| CoreError::Timeout {
                device_id: device_id.to_owned(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Publish `value` to `<root>/5/<device>/<node>/<property>/set`.
    ///
    /// QoS 0, not retained, no acknowledgement.
    pub fn set_property(&self, path: &PropertyPath, value: &str) -> Result<(), CoreError> {
        if self.is_disposed() {
            return Err(CoreError::Disposed);
        }

        let topic = self.inner.config.set_topic(path);
        debug!(topic = %topic, value, "set property");
        self.inner.transport.publish(
            &topic,
            Bytes::from(value.to_owned()),
            QoS::AtMostOnce,
            false,
        )
    }

    /// Check `value` against what the tree knows about the property.
    ///
    /// Unknown properties pass; the device is the final judge.
    pub fn validate_set(&self, path: &PropertyPath, value: &str) -> Result<(), CoreError> {
        let tree = self.snapshot();
        let Some(property) = tree.property(path) else {
            return Ok(());
        };
        if !property.settable && tree.is_device_ready(&path.device_id) {
            return Err(CoreError::NotSettable {
                path: path.to_string(),
            });
        }
        property.validate(value)?;
        Ok(())
    }

    // ── Ingestion ────────────────────────────────────────────────

    /// Process one transport event: decode and fold messages, track
    /// connection status, notify listeners.
    pub fn handle_event(&self, event: TransportEvent) {
        self.inner.handle_event(event);
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Close the session. Stops ingestion and cancels pending teardowns.
    pub fn dispose(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        info!(environment = %self.inner.config.id, "disposing environment manager");

        self.inner.cancel.cancel();
        self.inner.subscriptions.clear();
        self.inner.transport.close();
        self.inner
            .connection_state
            .send_replace(ConnectionState::Disconnected);
        self.inner.listeners.notify();
    }

    /// [`dispose`](Self::dispose), then wait up to `grace` for queued
    /// requests to reach the broker.
    pub async fn shutdown(&self, grace: Duration) {
        self.dispose();
        if tokio::time::timeout(grace, self.inner.transport.closed())
            .await
            .is_err()
        {
            warn!(environment = %self.inner.config.id, "transport did not close in time");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for EnvironmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentManager")
            .field("id", &self.inner.config.id)
            .field("state", &self.connection_state())
            .field("devices", &self.inner.tree.borrow().len())
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message { topic, payload } => self.ingest(&topic, &payload),
            TransportEvent::Connected | TransportEvent::Reconnecting | TransportEvent::Closed => {
                let state = ConnectionState::from(self.transport.status());
                let previous = self.connection_state.send_replace(state);
                if previous != state {
                    info!(environment = %self.config.id, %state, "connection state changed");
                }
                self.listeners.notify();
            }
        }
    }

    fn ingest(&self, topic: &str, payload: &[u8]) {
        let Some(event) = event::decode(topic, payload) else {
            trace!(topic, "ignoring topic");
            return;
        };

        if let HomieEvent::Error { message } = &event {
            debug!(topic, message = %message, "ignoring malformed message");
            return;
        }

        let changed = self.tree.send_if_modified(|tree| {
            let next = tree.apply(&event);
            if next.ptr_eq(tree) {
                false
            } else {
                *tree = next;
                true
            }
        });

        if changed {
            self.listeners.notify();
        }
    }

    fn release_device(self: &Arc<Self>, device_id: &str) {
        let Some(teardown) = self.subscriptions.release(device_id, &self.cancel) else {
            return;
        };

        // Created here so the window starts at release time. Drops may
        // happen off-runtime, hence the explicit enter.
        let delay = {
            let _guard = self.runtime.enter();
            tokio::time::sleep(self.config.teardown_delay)
        };
        let inner = Arc::downgrade(self);
        let device_id = device_id.to_owned();

        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                () = teardown.token.cancelled() => return,
                () = delay => {}
            }

            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner
                .subscriptions
                .finish_teardown(&device_id, teardown.generation)
            {
                let filter = inner.config.device_filter(&device_id);
                if let Err(e) = inner.transport.unsubscribe(&filter) {
                    warn!(filter = %filter, error = %e, "device unsubscribe failed");
                }
            }
        });
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        debug!(environment = %self.config.id, "last manager handle dropped, closing transport");
        self.cancel.cancel();
        self.subscriptions.clear();
        self.transport.close();
    }
}

async fn ingest_task(
    inner: Weak<ManagerInner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        let Some(event) = event else { break };
        let Some(inner) = inner.upgrade() else { break };
        inner.handle_event(event);
    }
    trace!("ingestion task exiting");
}

// ── DeviceSubscription ───────────────────────────────────────────

/// One holder of a device subscription. Dropping it releases the hold.
#[must_use = "the device subscription is released as soon as it is dropped"]
pub struct DeviceSubscription {
    inner: Weak<ManagerInner>,
    device_id: String,
}

impl DeviceSubscription {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Release now. Equivalent to dropping.
    pub fn release(self) {}
}

impl Drop for DeviceSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.release_device(&self.device_id);
        }
    }
}

impl std::fmt::Debug for DeviceSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSubscription")
            .field("device_id", &self.device_id)
            .finish()
    }
}

#[cfg(test)]
mod tests;
