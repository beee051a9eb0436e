use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use leanplum::{Leanplum, MockTransport, Phase, TransportError};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const APP_ID: &str = "app_test";

fn attributes() -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("gender".into(), json!("female"));
    attrs.insert("age".into(), json!(27));
    attrs
}

fn start_body_with_vars() -> Value {
    json!({
        "response": [{
            "success": true,
            "vars": {"gender": "female", "age": 27},
        }]
    })
}

async fn recv_event(rx: &mut mpsc::UnboundedReceiver<&'static str>) -> &'static str {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("handler did not fire")
        .expect("event channel closed")
}

#[tokio::test]
async fn start_merges_variables_and_fires_handlers() {
    let (mock, _rx) = MockTransport::new();
    mock.script_response(start_body_with_vars());
    let client = Leanplum::new(Arc::new(mock));
    client.set_app_id_for_production_mode(APP_ID, "prod_key");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let tx = event_tx.clone();
    client.add_variables_changed_handler(move || {
        let _ = tx.send("vars");
    });
    let tx = event_tx.clone();
    client.add_start_response_handler(move |success| {
        let _ = tx.send(if success { "start-ok" } else { "start-err" });
    });

    let (done_tx, done_rx) = oneshot::channel();
    client.start("user-1", attributes(), move |success| {
        let _ = done_tx.send(success);
    });
    assert!(done_rx.await.unwrap());

    // The variables merge fires before the start handlers.
    assert_eq!(recv_event(&mut event_rx).await, "vars");
    assert_eq!(recv_event(&mut event_rx).await, "start-ok");

    assert_eq!(client.phase(), Phase::Started);
    let vars = client.get_variables();
    assert_eq!(vars["gender"], "female");
    assert_eq!(vars["age"], 27);
}

#[tokio::test]
async fn start_failure_reports_false_but_still_starts() {
    let (mock, _rx) = MockTransport::new();
    mock.script_failure(TransportError::Http {
        status: 500,
        body: "server error".into(),
    });
    let client = Leanplum::new(Arc::new(mock));
    client.set_app_id_for_production_mode(APP_ID, "prod_key");

    let (handler_tx, mut handler_rx) = mpsc::unbounded_channel();
    client.add_start_response_handler(move |success| {
        let _ = handler_tx.send(if success { "start-ok" } else { "start-err" });
    });

    let (done_tx, done_rx) = oneshot::channel();
    client.start("user-1", attributes(), move |success| {
        let _ = done_tx.send(success);
    });

    assert!(!done_rx.await.unwrap());
    assert_eq!(recv_event(&mut handler_rx).await, "start-err");
    assert_eq!(client.phase(), Phase::Started);
    assert!(client.get_variables().is_empty());
}

#[tokio::test]
async fn start_from_cache_needs_no_network() {
    let (mock, mut rx) = MockTransport::new();
    let client = Leanplum::new(Arc::new(mock));
    client.set_app_id_for_production_mode(APP_ID, "prod_key");

    let (done_tx, done_rx) = oneshot::channel();
    client.start_from_cache("user-1", attributes(), move |success| {
        let _ = done_tx.send(success);
    });

    assert!(done_rx.await.unwrap());
    assert_eq!(client.phase(), Phase::Started);
    assert!(
        timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
        "start_from_cache must not touch the transport"
    );
}

#[tokio::test]
async fn start_from_cache_restores_the_last_start_response() {
    let (mock, _rx) = MockTransport::new();
    mock.script_response(start_body_with_vars());
    let client = Leanplum::new(Arc::new(mock));
    client.set_app_id_for_production_mode(APP_ID, "prod_key");

    let (done_tx, done_rx) = oneshot::channel();
    client.start("user-1", attributes(), move |success| {
        let _ = done_tx.send(success);
    });
    assert!(done_rx.await.unwrap());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("start-cache.json");
    client.persist_start_cache(&path);

    // A fresh client in a "new process" bootstraps from the cache file.
    let (mock, mut rx) = MockTransport::new();
    let restored = Leanplum::new(Arc::new(mock));
    restored.set_app_id_for_production_mode(APP_ID, "prod_key");
    restored.load_start_cache(&path);

    let (done_tx, done_rx) = oneshot::channel();
    restored.start_from_cache("user-1", attributes(), move |success| {
        let _ = done_tx.send(success);
    });
    assert!(done_rx.await.unwrap());
    assert_eq!(restored.get_variables()["age"], 27);
    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
}

#[tokio::test]
async fn local_set_variables_does_not_fire_the_changed_handler() {
    let (mock, _rx) = MockTransport::new();
    let client = Leanplum::new(Arc::new(mock));
    client.set_app_id_for_production_mode(APP_ID, "prod_key");

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    client.add_variables_changed_handler(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    client.set_variables(attributes());
    assert_eq!(client.get_variables()["gender"], "female");
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn handlers_run_in_registration_order_and_persist() {
    let (mock, _rx) = MockTransport::new();
    mock.script_response(start_body_with_vars());
    let client = Leanplum::new(Arc::new(mock));
    client.set_app_id_for_production_mode(APP_ID, "prod_key");

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    for tag in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        client.add_start_response_handler(move |_| {
            order.lock().unwrap().push(tag);
        });
    }
    // Registered last, so its firing means the earlier handlers already ran.
    let (sentinel_tx, mut sentinel_rx) = mpsc::unbounded_channel();
    client.add_start_response_handler(move |_| {
        let _ = sentinel_tx.send("sentinel");
    });

    let (done_tx, done_rx) = oneshot::channel();
    client.start("user-1", attributes(), move |success| {
        let _ = done_tx.send(success);
    });
    assert!(done_rx.await.unwrap());
    assert_eq!(recv_event(&mut sentinel_rx).await, "sentinel");
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);

    // Handlers persist across start cycles: a cache bootstrap fires them
    // again, synchronously.
    let (done_tx, done_rx) = oneshot::channel();
    client.start_from_cache("user-1", attributes(), move |success| {
        let _ = done_tx.send(success);
    });
    assert!(done_rx.await.unwrap());
    assert_eq!(recv_event(&mut sentinel_rx).await, "sentinel");
    assert_eq!(order.lock().unwrap().len(), 6);

    client.clear_handlers();
    let (done_tx, done_rx) = oneshot::channel();
    client.start_from_cache("user-1", attributes(), move |success| {
        let _ = done_tx.send(success);
    });
    assert!(done_rx.await.unwrap());
    assert_eq!(order.lock().unwrap().len(), 6);
}

#[tokio::test]
async fn a_handler_may_clear_the_registry_while_firing() {
    let (mock, _rx) = MockTransport::new();
    let client = Arc::new(Leanplum::new(Arc::new(mock)));
    client.set_app_id_for_production_mode(APP_ID, "prod_key");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let registry = Arc::clone(&client);
    client.add_start_response_handler(move |_| {
        // Re-entrant registry access from inside a firing handler.
        registry.clear_handlers();
        let _ = event_tx.send("cleared");
    });

    let (done_tx, done_rx) = oneshot::channel();
    client.start("user-1", attributes(), move |success| {
        let _ = done_tx.send(success);
    });
    assert!(done_rx.await.unwrap());
    assert_eq!(recv_event(&mut event_rx).await, "cleared");

    // The registry is empty for the next cycle; the only sender lived in
    // the cleared handler, so the channel closes instead of firing again.
    let (done_tx, done_rx) = oneshot::channel();
    client.start_from_cache("user-1", attributes(), move |success| {
        let _ = done_tx.send(success);
    });
    assert!(done_rx.await.unwrap());
    assert!(timeout(Duration::from_secs(1), event_rx.recv())
        .await
        .unwrap()
        .is_none());
}
