// ── rumqttc-backed transport ──
//
// One `AsyncClient` per environment. The event loop runs on a spawned task
// that forwards publishes and connection transitions to the manager, and
// keeps polling through errors so rumqttc can reconnect on its own.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use indexmap::IndexSet;
use futures::FutureExt;
use futures::future::BoxFuture;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Connector, Transport, TransportEvent, TransportLink, TransportStatus};
use crate::config::{EnvironmentConfig, ReconnectConfig};
use crate::error::CoreError;

/// Capacity of rumqttc's outgoing request queue.
const REQUEST_CAPACITY: usize = 128;

/// Descriptions of large devices easily exceed rumqttc's 10 KiB default.
const MAX_PACKET_SIZE: usize = 256 * 1024;

// ── Connector ────────────────────────────────────────────────────────

/// Opens real broker sessions with `rumqttc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

impl Connector for MqttConnector {
    fn connect(&self, config: &EnvironmentConfig) -> Result<TransportLink, CoreError> {
        let options = mqtt_options(config)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| CoreError::Config {
            message: format!("MQTT transport needs a Tokio runtime: {e}"),
        })?;

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            link: AtomicU8::new(LinkState::Connecting as u8),
            filters: Mutex::new(IndexSet::new()),
        });
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();

        info!(
            environment = %config.id,
            broker = %config.broker_url,
            "connecting to MQTT broker"
        );

        runtime.spawn(poll_loop(
            event_loop,
            client.clone(),
            Arc::clone(&shared),
            events_tx,
            config.reconnect.clone(),
            cancel.clone(),
            finished.clone(),
        ));

        let transport = MqttTransport {
            client,
            shared,
            cancel,
            finished,
        };

        Ok(TransportLink {
            transport: Arc::new(transport),
            events: events_rx,
        })
    }
}

// ── Options ──────────────────────────────────────────────────────────

fn mqtt_options(config: &EnvironmentConfig) -> Result<MqttOptions, CoreError> {
    let url = &config.broker_url;
    let invalid = |reason: &str| CoreError::InvalidBrokerUrl {
        url: url.to_string(),
        reason: reason.into(),
    };
    let client_id = config.client_id();

    let mut options = match url.scheme() {
        "mqtt" | "tcp" | "mqtts" | "ssl" => {
            let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
            let tls = matches!(url.scheme(), "mqtts" | "ssl");
            let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });
            let mut options = MqttOptions::new(client_id, host, port);
            if tls {
                options.set_transport(rumqttc::Transport::tls_with_default_config());
            }
            options
        }
        "ws" | "wss" => {
            if url.host_str().is_none() {
                return Err(invalid("missing host"));
            }
            // With websockets rumqttc takes the whole URL as the address.
            let tls = url.scheme() == "wss";
            let port = url.port().unwrap_or(if tls { 443 } else { 80 });
            let mut options = MqttOptions::new(client_id, url.as_str(), port);
            options.set_transport(if tls {
                rumqttc::Transport::wss_with_default_config()
            } else {
                rumqttc::Transport::Ws
            });
            options
        }
        other => {
            return Err(CoreError::UnsupportedScheme {
                scheme: other.to_owned(),
            });
        }
    };

    options
        .set_keep_alive(config.keep_alive)
        .set_clean_session(true)
        .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
        let password = config
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_owned())
            .unwrap_or_default();
        options.set_credentials(username, password);
    }

    Ok(options)
}

// ── Transport handle ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum LinkState {
    Connecting = 0,
    Connected = 1,
    Reconnecting = 2,
    Closed = 3,
}

impl LinkState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connected,
            2 => Self::Reconnecting,
            3 => Self::Closed,
            _ => Self::Connecting,
        }
    }
}

/// State shared between the handle and the poll task.
struct Shared {
    link: AtomicU8,
    /// Active filters, replayed after a reconnect that lost the session.
    filters: Mutex<IndexSet<String>>,
}

impl Shared {
    fn link(&self) -> LinkState {
        LinkState::from_u8(self.link.load(Ordering::Acquire))
    }

    /// Store `state`, returning the previous one.
    fn set_link(&self, state: LinkState) -> LinkState {
        LinkState::from_u8(self.link.swap(state as u8, Ordering::AcqRel))
    }

    fn filters(&self) -> MutexGuard<'_, IndexSet<String>> {
        self.filters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct MqttTransport {
    client: AsyncClient,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    /// Cancelled when the poll loop exits.
    finished: CancellationToken,
}

impl Transport for MqttTransport {
    fn subscribe(&self, filter: &str) -> Result<(), CoreError> {
        self.shared.filters().insert(filter.to_owned());
        debug!(filter, "subscribe");
        self.client.try_subscribe(filter, QoS::AtLeastOnce)?;
        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), CoreError> {
        self.shared.filters().shift_remove(filter);
        debug!(filter, "unsubscribe");
        self.client.try_unsubscribe(filter)?;
        Ok(())
    }

    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), CoreError> {
        trace!(topic, bytes = payload.len(), "publish");
        self.client.try_publish(topic, qos, retain, payload.to_vec())?;
        Ok(())
    }

    fn status(&self) -> TransportStatus {
        match self.shared.link() {
            LinkState::Connecting => TransportStatus::default(),
            LinkState::Connected => TransportStatus {
                connected: true,
                ..TransportStatus::default()
            },
            LinkState::Reconnecting => TransportStatus {
                reconnecting: true,
                ..TransportStatus::default()
            },
            LinkState::Closed => TransportStatus {
                disconnected: true,
                ..TransportStatus::default()
            },
        }
    }

    fn close(&self) {
        let previous = self.shared.set_link(LinkState::Closed);
        if previous == LinkState::Closed {
            return;
        }

        // A live session drains its request queue up to the DISCONNECT.
        let draining = previous == LinkState::Connected
            && match self.client.try_disconnect() {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "disconnect request not queued");
                    false
                }
            };
        if !draining {
            self.cancel.cancel();
        }
    }

    fn closed(&self) -> BoxFuture<'static, ()> {
        self.finished.clone().cancelled_owned().boxed()
    }
}

// ── Background poll loop ─────────────────────────────────────────────

async fn poll_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<TransportEvent>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    finished: CancellationToken,
) {
    let _finished = finished.drop_guard();
    let mut connected_once = false;
    let mut attempt: u32 = 0;

    loop {
        let polled = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            polled = event_loop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                attempt = 0;
                shared.set_link(LinkState::Connected);
                info!(session_present = ack.session_present, "MQTT connected");

                if connected_once && !ack.session_present {
                    resubscribe(&client, &shared);
                }
                connected_once = true;

                if !forward(&events, &shared, TransportEvent::Connected) {
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let event = TransportEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if !forward(&events, &shared, event) {
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(notification) => trace!(?notification, "MQTT event"),
            Err(e) => {
                if shared.link() == LinkState::Closed {
                    break;
                }
                warn!(error = %e, attempt, "MQTT connection error");

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        warn!(max_retries = max, "MQTT reconnection limit reached, giving up");
                        break;
                    }
                }

                if shared.set_link(LinkState::Reconnecting) != LinkState::Reconnecting
                    && events.send(TransportEvent::Reconnecting).is_err()
                {
                    break;
                }

                let delay = calculate_backoff(attempt, &reconnect);
                debug!(delay_ms = delay_millis(delay), attempt, "waiting before reconnect");

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }

    shared.set_link(LinkState::Closed);
    let _ = events.send(TransportEvent::Closed);
    debug!("MQTT poll loop exiting");
}

/// Hand an event to the manager. `false` means stop polling: nobody is
/// listening and the session is not draining.
fn forward(
    events: &mpsc::UnboundedSender<TransportEvent>,
    shared: &Shared,
    event: TransportEvent,
) -> bool {
    events.send(event).is_ok() || shared.link() == LinkState::Closed
}

fn resubscribe(client: &AsyncClient, shared: &Shared) {
    let filters: Vec<String> = shared.filters().iter().cloned().collect();
    for filter in filters {
        debug!(filter = %filter, "resubscribe");
        if let Err(e) = client.try_subscribe(filter, QoS::AtLeastOnce) {
            warn!(error = %e, "resubscribe failed");
        }
    }
}

/// `min(initial * 2^attempt, max)`.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
    config
        .initial_delay
        .checked_mul(factor)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

fn delay_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
