//! Integration tests for the health endpoint

use std::net::TcpListener;
use std::sync::Arc;

use oauth2_server::clock::ManualClock;
use oauth2_server::configuration::get_configuration;
use oauth2_server::startup::{build_core, run};
use oauth2_server::store::{InMemoryTokenStore, TokenStoreBackend};

fn spawn_app() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.hashing.bcrypt_cost = 4;

    let clock = Arc::new(ManualClock::default());
    let store = TokenStoreBackend::InMemory(InMemoryTokenStore::new(clock.clone()));
    let core = build_core(&configuration, store, clock).expect("Failed to provision core");
    let server = run(listener, core).expect("Failed to create server");

    let _ = tokio::spawn(server);

    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn health_check_works() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/health_check", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["token_store"], "in-memory");
}

#[tokio::test]
async fn health_check_needs_no_token() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/health_check", addr))
        .header("Authorization", "Bearer not-a-token")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(200, response.status().as_u16());
}
