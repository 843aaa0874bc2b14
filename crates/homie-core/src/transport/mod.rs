// ── Broker transport boundary ──
//
// The manager only talks to the broker through these traits. Requests are
// fire-and-forget (queued, not awaited); everything the broker sends back
// arrives in order on the `TransportEvent` channel.

mod mqtt;
#[cfg(test)]
pub(crate) mod recording;

use std::sync::Arc;

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;

pub use mqtt::MqttConnector;
pub use rumqttc::QoS;

use crate::config::EnvironmentConfig;
use crate::error::CoreError;

/// Tri-state connection flags as reported by the transport.
///
/// All three false means the first connection attempt is still in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStatus {
    pub connected: bool,
    pub reconnecting: bool,
    pub disconnected: bool,
}

/// Everything a transport reports back, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message { topic: String, payload: Bytes },
    Connected,
    Reconnecting,
    /// The session ended for good, either by `close()` or by giving up.
    Closed,
}

/// A live broker session.
pub trait Transport: Send + Sync {
    fn subscribe(&self, filter: &str) -> Result<(), CoreError>;

    fn unsubscribe(&self, filter: &str) -> Result<(), CoreError>;

    fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool)
    -> Result<(), CoreError>;

    fn status(&self) -> TransportStatus;

    /// End the session. Requests queued on a connected session are still
    /// delivered. Idempotent.
    fn close(&self);

    /// Resolves once the session has fully shut down.
    fn closed(&self) -> BoxFuture<'static, ()> {
        future::ready(()).boxed()
    }
}

/// A transport together with its event channel.
pub struct TransportLink {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens broker sessions. Must be called from within a Tokio runtime.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &EnvironmentConfig) -> Result<TransportLink, CoreError>;
}
