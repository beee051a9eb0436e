//! Drives a client against the mock transport and prints the wire traffic.
//! Swap `MockTransport` for `Leanplum::with_http()` to talk to a real
//! backend.

use std::sync::Arc;
use std::time::Duration;

use leanplum::{Leanplum, MockTransport};
use serde_json::{json, Map};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let (mock, mut requests) = MockTransport::new();
    let client = Leanplum::new(Arc::new(mock));
    client.set_app_id_for_production_mode("app_demo", "prod_demo_key");
    client.set_request_batching(true, Some(5));
    client.set_batch_flush_delay(Duration::from_millis(50));

    let mut attrs = Map::new();
    attrs.insert("plan".into(), json!("trial"));

    client.start("demo-user", attrs, |success| {
        println!("start completed: success={success}");
    });

    client.track(Some("open"), None);
    client.advance_to(Some("onboarding"), None);
    client.flush();

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(request) = requests.try_recv() {
        println!(
            "POST {} -> {}",
            request.url,
            serde_json::to_string_pretty(&request.body)?
        );
    }
    Ok(())
}
