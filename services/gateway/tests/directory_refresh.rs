//! Directory refresh against a mock directory service.

use fleet_test_utils::MockDirectoryServer;
use gateway::cache::IdentifierCache;
use gateway::config::{DirectoryConfig, StalePolicy};
use gateway::directory::{refresh, DirectoryClient};
use std::time::Duration;

fn directory_config(server: &MockDirectoryServer) -> DirectoryConfig {
    DirectoryConfig {
        base_url: server.base_url(),
        user: "navuser".to_owned(),
        password: "navpass".to_owned(),
        rebuild_interval: Duration::from_secs(120),
        stale_policy: StalePolicy::Retain,
    }
}

fn devices_fixture() -> serde_json::Value {
    serde_json::json!([
        {
            "state": {"state": "ACTIVE"},
            "webId": 7001,
            "currentTransponder": {"transponderId": 9000}
        },
        {
            "state": {"state": "DEACTIVATED"},
            "webId": 7002,
            "currentTransponder": {"transponderId": 9001}
        }
    ])
}

fn accounts_fixture() -> serde_json::Value {
    serde_json::json!([
        {"accountId": 501, "apiId": 100},
        {"accountId": 502}
    ])
}

#[tokio::test]
async fn refresh_populates_cache_with_admitted_entries() {
    let server = MockDirectoryServer::start(devices_fixture(), accounts_fixture())
        .await
        .expect("server");
    let client = DirectoryClient::new(&directory_config(&server)).expect("client");
    let cache = IdentifierCache::shared();

    refresh(&client, &cache, StalePolicy::Retain)
        .await
        .expect("refresh");

    let c = cache.lock().await;
    assert!(c.is_populated());
    assert_eq!(c.resolve_device("9000").as_deref(), Some("7001"));
    assert_eq!(c.resolve_device("9001"), None); // DEACTIVATED skipped
    assert_eq!(c.resolve_account("100").as_deref(), Some("501"));
    assert_eq!(c.account_count(), 1);
    assert_eq!(c.successful_refreshes, 1);
    assert_eq!(c.failed_refreshes, 0);

    // Both endpoints hit, page limit and Basic credentials forwarded.
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].endpoint, "/v1/devices");
    assert_eq!(requests[1].endpoint, "/v1/accounts");
    for request in &requests {
        assert_eq!(request.query.as_deref(), Some("limit=10000"));
        let auth = request.authorization.as_deref().expect("basic auth");
        assert!(auth.starts_with("Basic "), "unexpected auth: {auth}");
    }
}

#[tokio::test]
async fn failed_refresh_counts_and_retains_existing_cache() {
    let server = MockDirectoryServer::start(devices_fixture(), accounts_fixture())
        .await
        .expect("server");
    let client = DirectoryClient::new(&directory_config(&server)).expect("client");
    let cache = IdentifierCache::shared();

    refresh(&client, &cache, StalePolicy::Retain)
        .await
        .expect("first refresh");

    server.set_status(503);
    let result = refresh(&client, &cache, StalePolicy::Retain).await;
    assert!(result.is_err());

    let c = cache.lock().await;
    // Prior mapping intact, failure counted.
    assert_eq!(c.resolve_device("9000").as_deref(), Some("7001"));
    assert_eq!(c.resolve_account("100").as_deref(), Some("501"));
    assert_eq!(c.successful_refreshes, 1);
    assert_eq!(c.failed_refreshes, 1);
}

#[tokio::test]
async fn clear_policy_drops_entries_missing_from_the_directory() {
    let server = MockDirectoryServer::start(devices_fixture(), accounts_fixture())
        .await
        .expect("server");
    let client = DirectoryClient::new(&directory_config(&server)).expect("client");
    let cache = IdentifierCache::shared();

    refresh(&client, &cache, StalePolicy::Clear)
        .await
        .expect("first refresh");

    // The device fleet turns over entirely.
    server.set_devices(serde_json::json!([
        {
            "state": {"state": "ACTIVE"},
            "webId": 7005,
            "currentTransponder": {"transponderId": 9005}
        }
    ]));
    refresh(&client, &cache, StalePolicy::Clear)
        .await
        .expect("second refresh");

    let c = cache.lock().await;
    assert_eq!(c.resolve_device("9000"), None);
    assert_eq!(c.resolve_device("9005").as_deref(), Some("7005"));
}

#[tokio::test]
async fn retain_policy_keeps_entries_missing_from_the_directory() {
    let server = MockDirectoryServer::start(devices_fixture(), accounts_fixture())
        .await
        .expect("server");
    let client = DirectoryClient::new(&directory_config(&server)).expect("client");
    let cache = IdentifierCache::shared();

    refresh(&client, &cache, StalePolicy::Retain)
        .await
        .expect("first refresh");

    server.set_devices(serde_json::json!([]));
    refresh(&client, &cache, StalePolicy::Retain)
        .await
        .expect("second refresh");

    let c = cache.lock().await;
    assert_eq!(c.resolve_device("9000").as_deref(), Some("7001"));
}
