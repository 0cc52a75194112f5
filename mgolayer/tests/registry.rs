mod common;

use std::sync::{Arc, Mutex};

use mgolayer::{memory::InMemoryDriver, prelude::*};

use common::{URI, init_tracing};

#[tokio::test]
async fn callbacks_run_in_registration_order_and_survive_failures() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = HookRegistry::<InMemoryDriver>::new();

    let first = log.clone();
    let failing = log.clone();
    let last = log.clone();
    registry
        .on_connected(URI, "first", move |_client| {
            first.lock().unwrap().push("connected:first");
            Ok(())
        })
        .on_connected(URI, "failing", move |_client| {
            failing.lock().unwrap().push("connected:failing");
            Err(MgoError::Hook("not ready".into()))
        })
        .on_connected(URI, "last", move |_client| {
            last.lock().unwrap().push("connected:last");
            Ok(())
        });

    let opened = log.clone();
    registry.on_opened(URI, "app", "indexes", move |db| {
        opened.lock().unwrap().push(if db.name() == "app" {
            "opened:app"
        } else {
            "opened:other"
        });
        Ok(())
    });

    let other = log.clone();
    registry.on_connected("mem://elsewhere", "ignored", move |_client| {
        other.lock().unwrap().push("connected:elsewhere");
        Ok(())
    });

    let driver = InMemoryDriver::builder().build().await.unwrap();
    let client = Client::connect(driver, Config::new(URI), Arc::new(registry))
        .await
        .unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["connected:first", "connected:failing", "connected:last"]
    );

    client.database("logs");
    client.database("app");
    client.database("app");
    assert_eq!(
        log.lock().unwrap()[3..].to_vec(),
        vec!["opened:app", "opened:app"]
    );
}

#[tokio::test]
async fn connected_callback_sees_a_usable_client() {
    init_tracing();
    let seen = Arc::new(Mutex::new(None));
    let mut registry = HookRegistry::<InMemoryDriver>::new();

    let slot = seen.clone();
    registry.on_connected(URI, "capture", move |client| {
        *slot.lock().unwrap() = Some(client.config().uri.clone());
        Ok(())
    });

    let driver = InMemoryDriver::builder().build().await.unwrap();
    let client = Client::connect(driver, Config::new(URI), Arc::new(registry))
        .await
        .unwrap();

    assert_eq!(seen.lock().unwrap().as_deref(), Some(URI));
    client.ping(std::time::Duration::from_secs(1)).await.unwrap();
    client.close().await.unwrap();
}
