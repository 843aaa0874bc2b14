#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;

use super::*;
use crate::model::DeviceState;
use crate::transport::recording::{Call, RecordingConnector, RecordingTransport};

const DESCRIPTION: &str = r#"{"homie":"5.0","version":1,"name":"Lamp","nodes":{"light":{"properties":{"on":{"datatype":"boolean","settable":true},"level":{"datatype":"integer","format":"0:100","settable":true},"power":{"datatype":"float"}}}}}"#;

fn config() -> EnvironmentConfig {
    EnvironmentConfig::new("test-env", "mqtt://localhost".parse().unwrap())
}

fn start() -> (EnvironmentManager, Arc<RecordingTransport>, RecordingConnector) {
    let connector = RecordingConnector::default();
    let manager = EnvironmentManager::connect(config(), &connector).unwrap();
    let transport = Arc::clone(&connector.transport);
    (manager, transport, connector)
}

fn message(topic: &str, payload: &str) -> TransportEvent {
    TransportEvent::Message {
        topic: topic.into(),
        payload: Bytes::from(payload.to_owned()),
    }
}

/// Let spawned tasks run up to their next await point.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

async fn advance_ms(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

// ── Subscriptions ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn overlapping_holders_debounce_unsubscribe() {
    let (manager, transport, _connector) = start();

    let first = manager.subscribe_to_device("x");
    let second = manager.subscribe_to_device("x");
    assert_eq!(transport.subscriptions(), vec!["+/5/x/#".to_string()]);
    assert_eq!(manager.subscriber_count("x"), 2);

    drop(first);
    advance_ms(1500).await;
    assert!(transport.unsubscriptions().is_empty());
    drop(second);

    advance_ms(999).await;
    assert!(transport.unsubscriptions().is_empty());
    assert!(manager.is_device_subscribed("x"));

    advance_ms(1).await;
    assert_eq!(transport.unsubscriptions(), vec!["+/5/x/#".to_string()]);
    assert!(!manager.is_device_subscribed("x"));
}

#[tokio::test(start_paused = true)]
async fn resubscribe_within_window_cancels_teardown() {
    let (manager, transport, _connector) = start();

    drop(manager.subscribe_to_device("x"));
    advance_ms(400).await;
    let again = manager.subscribe_to_device("x");

    advance_ms(2000).await;
    assert!(transport.unsubscriptions().is_empty());
    assert_eq!(transport.subscriptions().len(), 1);
    assert_eq!(manager.subscriber_count("x"), 1);

    again.release();
    advance_ms(1000).await;
    assert_eq!(transport.unsubscriptions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn subscribing_after_teardown_subscribes_again() {
    let (manager, transport, _connector) = start();

    drop(manager.subscribe_to_device("x"));
    advance_ms(1000).await;
    let _held = manager.subscribe_to_device("x");

    assert_eq!(
        transport.calls(),
        vec![
            Call::Subscribe("+/5/x/#".into()),
            Call::Unsubscribe("+/5/x/#".into()),
            Call::Subscribe("+/5/x/#".into()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn dispose_cancels_pending_teardown() {
    let (manager, transport, _connector) = start();

    drop(manager.subscribe_to_device("x"));
    manager.dispose();
    advance_ms(2000).await;

    assert!(transport.unsubscriptions().is_empty());
    assert_eq!(transport.calls().last(), Some(&Call::Close));
}

#[tokio::test]
async fn state_topic_subscribed_once_on_first_listener() {
    let (manager, transport, _connector) = start();
    assert!(transport.subscriptions().is_empty());

    let _a = manager.add_listener(|| {});
    let _b = manager.add_listener(|| {});
    assert_eq!(transport.subscriptions(), vec!["+/5/+/$state".to_string()]);
}

// ── Ingestion and notification ───────────────────────────────────

#[tokio::test]
async fn listeners_run_in_order_on_change_only() {
    let (manager, _transport, _connector) = start();
    let order = Arc::new(Mutex::new(Vec::new()));

    let _handles: Vec<ListenerHandle> = ["a", "b", "c"]
        .into_iter()
        .map(|name| {
            let order = Arc::clone(&order);
            manager.add_listener(move || order.lock().unwrap().push(name))
        })
        .collect();

    manager.handle_event(message("homie/5/d/$state", "ready"));
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);

    manager.handle_event(message("homie/5/d/$state", "ready"));
    manager.handle_event(message("homie/5/d/$state", "bogus"));
    manager.handle_event(message("homie/5/d/$name", "Lamp"));
    manager.handle_event(message("homie/5/d/n/p/set", "1"));
    assert_eq!(order.lock().unwrap().len(), 3);

    assert_eq!(manager.device("d").unwrap().state, DeviceState::Ready);
}

#[tokio::test]
async fn dropped_listener_is_not_called() {
    let (manager, _transport, _connector) = start();
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = {
        let calls = Arc::clone(&calls);
        manager.add_listener(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };
    manager.handle_event(message("homie/5/d/n/p", "1"));
    drop(handle);
    manager.handle_event(message("homie/5/d/n/p", "2"));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.listener_count(), 0);
}

#[tokio::test]
async fn connection_status_follows_transport_flags() {
    let (manager, transport, _connector) = start();
    assert_eq!(manager.connection_state(), ConnectionState::Connecting);

    let calls = Arc::new(AtomicUsize::new(0));
    let _handle = {
        let calls = Arc::clone(&calls);
        manager.add_listener(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    transport.set_status(TransportStatus {
        connected: true,
        ..TransportStatus::default()
    });
    manager.handle_event(TransportEvent::Connected);
    assert_eq!(manager.connection_state(), ConnectionState::Connected);

    transport.set_status(TransportStatus {
        reconnecting: true,
        ..TransportStatus::default()
    });
    manager.handle_event(TransportEvent::Reconnecting);
    assert_eq!(manager.connection_state(), ConnectionState::Reconnecting);

    transport.set_status(TransportStatus {
        disconnected: true,
        ..TransportStatus::default()
    });
    manager.handle_event(TransportEvent::Closed);
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    assert!(!manager.is_disposed());

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn ingests_through_transport_channel() {
    let (manager, _transport, connector) = start();
    let mut stream = manager.stream();

    connector
        .sender()
        .unwrap()
        .send(message("homie/5/sensor/$description", DESCRIPTION))
        .unwrap();

    let tree = stream.changed().await.unwrap();
    assert!(tree.is_device_ready("sensor"));
    assert!(manager.snapshot().ptr_eq(&tree));
}

#[tokio::test]
async fn unchanged_fold_keeps_snapshot_identity() {
    let (manager, _transport, _connector) = start();
    manager.handle_event(message("homie/5/d/n/p", "1"));
    let before = manager.snapshot();
    manager.handle_event(message("homie/5/d/n/p", "1"));
    assert!(manager.snapshot().ptr_eq(&before));
}

// ── Readiness ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ready_resolves_on_description_and_releases_resources() {
    let (manager, transport, _connector) = start();

    let ready = manager.device_ready("lamp");
    assert_eq!(manager.subscriber_count("lamp"), 1);
    assert_eq!(manager.listener_count(), 1);
    assert!(transport.subscriptions().contains(&"+/5/lamp/#".to_string()));

    manager.handle_event(message("homie/5/lamp/$state", "ready"));
    assert_eq!(manager.subscriber_count("lamp"), 1);

    manager.handle_event(message("homie/5/lamp/$description", DESCRIPTION));
    ready.clone().await;

    assert!(ready.is_ready());
    assert_eq!(manager.subscriber_count("lamp"), 0);
    assert_eq!(manager.listener_count(), 0);

    advance_ms(1000).await;
    assert_eq!(transport.unsubscriptions(), vec!["+/5/lamp/#".to_string()]);
}

#[tokio::test]
async fn ready_is_immediate_for_loaded_device() {
    let (manager, transport, _connector) = start();
    manager.handle_event(message("homie/5/lamp/$description", DESCRIPTION));

    manager.device_ready("lamp").await;
    assert!(transport.subscriptions().is_empty());
}

#[tokio::test]
async fn concurrent_waiters_share_one_wait() {
    let (manager, transport, _connector) = start();

    let a = tokio::spawn(manager.device_ready("lamp"));
    let b = tokio::spawn(manager.device_ready("lamp"));
    assert_eq!(manager.subscriber_count("lamp"), 1);

    manager.handle_event(message("homie/5/lamp/$description", DESCRIPTION));
    a.await.unwrap();
    b.await.unwrap();

    let device_subscriptions = transport
        .subscriptions()
        .into_iter()
        .filter(|f| f == "+/5/lamp/#")
        .count();
    assert_eq!(device_subscriptions, 1);
}

#[tokio::test(start_paused = true)]
async fn ready_timeout_reports_device() {
    let (manager, _transport, _connector) = start();
    let err = manager
        .ready_timeout("ghost", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Timeout { device_id, timeout_ms: 5000 } if device_id == "ghost"
    ));
}

// ── Commands ─────────────────────────────────────────────────────

#[tokio::test]
async fn set_property_publishes_fire_and_forget() {
    let (manager, transport, _connector) = start();
    manager
        .set_property(&PropertyPath::new("lamp", "light", "on"), "true")
        .unwrap();

    assert_eq!(
        transport.calls(),
        vec![Call::Publish {
            topic: "homie/5/lamp/light/on/set".into(),
            payload: Bytes::from_static(b"true"),
            qos: QoS::AtMostOnce,
            retain: false,
        }]
    );
}

#[tokio::test]
async fn set_property_after_dispose_fails() {
    let (manager, _transport, _connector) = start();
    manager.dispose();
    assert!(manager.is_disposed());
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    assert!(matches!(
        manager.set_property(&PropertyPath::new("d", "n", "p"), "1"),
        Err(CoreError::Disposed)
    ));
}

#[tokio::test]
async fn shutdown_closes_transport() {
    let (manager, transport, _connector) = start();
    manager
        .set_property(&PropertyPath::new("lamp", "light", "on"), "false")
        .unwrap();
    manager.shutdown(Duration::from_secs(1)).await;

    assert!(manager.is_disposed());
    assert_eq!(transport.calls().last(), Some(&Call::Close));
}

#[tokio::test]
async fn dropping_last_handle_closes_transport() {
    let (manager, transport, connector) = start();
    let clone = manager.clone();
    drop(manager.add_listener(|| {}));

    drop(manager);
    settle().await;
    assert!(!transport.calls().contains(&Call::Close));

    drop(clone);
    settle().await;
    assert_eq!(transport.calls().last(), Some(&Call::Close));
    assert!(connector.sender().unwrap().is_closed());
}

#[tokio::test]
async fn validate_set_uses_description() {
    let (manager, _transport, _connector) = start();
    manager.handle_event(message("homie/5/lamp/$description", DESCRIPTION));

    let level = PropertyPath::new("lamp", "light", "level");
    assert!(manager.validate_set(&level, "50").is_ok());
    assert!(matches!(
        manager.validate_set(&level, "150"),
        Err(CoreError::ValidationFailed(_))
    ));
    assert!(matches!(
        manager.validate_set(&PropertyPath::new("lamp", "light", "power"), "1.0"),
        Err(CoreError::NotSettable { .. })
    ));
    assert!(
        manager
            .validate_set(&PropertyPath::new("other", "n", "p"), "anything")
            .is_ok()
    );
}

#[test]
fn connection_state_from_flags() {
    assert_eq!(
        ConnectionState::from(TransportStatus::default()),
        ConnectionState::Connecting
    );
    assert_eq!(
        ConnectionState::from(TransportStatus {
            disconnected: true,
            ..TransportStatus::default()
        }),
        ConnectionState::Disconnected
    );
    assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
}
