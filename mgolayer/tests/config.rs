mod common;

use std::{sync::Arc, time::Duration};

use mgolayer::{memory::InMemoryDriver, prelude::*};

use common::{URI, init_tracing};

#[test]
fn deployment_record_loads_from_json() {
    let config: Config = serde_json::from_str(
        r#"{
            "uri": "mem://test",
            "auth": { "authSource": "admin", "username": "svc", "password": "p%40ss" },
            "connectTimeoutMS": 2500,
            "readPreference": { "mode": "secondaryPreferred", "maxStalenessMS": 90000 }
        }"#,
    )
    .unwrap();

    assert_eq!(config.uri, URI);
    assert_eq!(config.connect_timeout(), Some(Duration::from_millis(2500)));
    assert_eq!(config.read_preference().mode, ReadMode::SecondaryPreferred);

    let resolved = config.auth.as_ref().unwrap().resolve().unwrap();
    assert_eq!(resolved.password.as_deref(), Some("p@ss"));
}

#[tokio::test]
async fn invalid_credentials_fail_the_connection() {
    init_tracing();
    let mut config = Config::new(URI);
    config.auth = Some(Credential {
        username: "team/svc".into(),
        ..Default::default()
    });

    let driver = InMemoryDriver::builder().build().await.unwrap();
    let err = Client::connect(driver, config, Arc::new(HookRegistry::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, MgoError::NotSupportedUsername));
}
