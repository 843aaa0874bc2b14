// In-memory transport for manager tests: records every request and lets
// the test inject broker events.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Connector, QoS, Transport, TransportEvent, TransportLink, TransportStatus};
use crate::config::EnvironmentConfig;
use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Subscribe(String),
    Unsubscribe(String),
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
    Close,
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    status: Mutex<TransportStatus>,
}

impl RecordingTransport {
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Subscribe(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn unsubscriptions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Unsubscribe(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn set_status(&self, status: TransportStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl Transport for RecordingTransport {
    fn subscribe(&self, filter: &str) -> Result<(), CoreError> {
        self.record(Call::Subscribe(filter.to_owned()));
        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), CoreError> {
        self.record(Call::Unsubscribe(filter.to_owned()));
        Ok(())
    }

    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), CoreError> {
        self.record(Call::Publish {
            topic: topic.to_owned(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    fn status(&self) -> TransportStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.set_status(TransportStatus {
            disconnected: true,
            ..TransportStatus::default()
        });
        self.record(Call::Close);
    }
}

/// Hands out one shared `RecordingTransport` and keeps the event sender so
/// tests can play the broker.
#[derive(Default)]
pub(crate) struct RecordingConnector {
    pub(crate) transport: Arc<RecordingTransport>,
    sender: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl RecordingConnector {
    pub(crate) fn sender(&self) -> Option<mpsc::UnboundedSender<TransportEvent>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Connector for RecordingConnector {
    fn connect(&self, _config: &EnvironmentConfig) -> Result<TransportLink, CoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(TransportLink {
            transport: Arc::clone(&self.transport) as Arc<dyn Transport>,
            events: rx,
        })
    }
}
