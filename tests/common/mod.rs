// Common test utilities shared across the integration tests
#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use nearbyscan::SessionSnapshot;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// Helper function to run an async operation with timeout
pub async fn with_timeout<T, F>(duration_secs: u64, future: F) -> Result<T, &'static str>
where
    F: Future<Output = T>,
{
    match timeout(Duration::from_secs(duration_secs), future).await {
        Ok(result) => Ok(result),
        Err(_) => Err("Operation timed out"),
    }
}

/// Wait for the next published snapshot
pub async fn next_snapshot(updates: &mut UnboundedReceiver<SessionSnapshot>) -> SessionSnapshot {
    with_timeout(2, updates.recv())
        .await
        .expect("timed out waiting for a snapshot")
        .expect("publisher closed")
}

/// Route library logs to the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Advertisement payload as the native layer delivers it
pub fn advertisement(address: &str, name: Option<&str>, rssi: i16) -> Value {
    let mut payload = json!({
        "address": address,
        "uuid": format!("uuid-{}", address),
        "rssi": rssi,
    });
    if let Some(name) = name {
        payload["name"] = json!(name);
    }
    payload
}
